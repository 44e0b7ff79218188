pub mod resolver;

pub use resolver::{resolve, ExecutionPlan, GraphError};
