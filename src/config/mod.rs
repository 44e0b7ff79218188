pub mod loader;
pub mod parser;
pub mod schema;
pub mod types;

pub use loader::{load_agent_file, parse_agent_definition, sync_agent_directory, SyncReport};
pub use parser::{parse_config, parse_config_str};
pub use types::*;
