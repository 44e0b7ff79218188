pub mod action;
pub mod agent;
pub mod condition;
pub mod log;
pub mod run;

pub use action::*;
pub use agent::*;
pub use condition::*;
pub use log::*;
pub use run::*;
