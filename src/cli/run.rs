use std::path::Path;

use tracing::info;

use crate::cli::commands::RunArgs;
use crate::cli::runtime::Runtime;
use crate::errors::NightshiftError;

pub async fn handle_run(args: RunArgs, config: Option<&Path>) -> Result<(), NightshiftError> {
    let runtime = Runtime::build_daemon(config).await?;
    info!(
        agents = runtime.scheduler.registry().len(),
        database = %runtime.config.storage.database.display(),
        "Starting scheduler"
    );
    runtime.run_daemon(args.listen.as_deref()).await
}
