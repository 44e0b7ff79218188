pub mod snapshot;
pub mod source;

pub use snapshot::{EventSet, FactSnapshot};
pub use source::{FactSource, FileFactSource, LayeredFactSource, StaticFactSource};
