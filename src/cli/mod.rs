pub mod commands;
pub mod history;
pub mod logs;
pub mod run;
pub mod runtime;
pub mod serve;
pub mod trigger;
pub mod validate;

pub use commands::{Cli, Commands};
