pub mod registry;
pub mod runner;
pub mod slots;

pub use registry::{AgentRegistry, RegisteredAgent, RunClaim};
pub use runner::{RunHandle, Scheduler, SchedulerSettings, Submission};
pub use slots::RunSlots;
