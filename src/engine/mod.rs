pub mod dispatch;
pub mod executor;
pub mod state;
pub mod template;

pub use dispatch::{
    ActionContext, ActionHandler, HandlerRegistry, NotificationActionHandler, ProcessHandler,
    TemplateCommandHandler,
};
pub use executor::{EngineSettings, ExecutionEngine};
pub use state::aggregate_status;
