use std::path::Path;

use tracing::info;

use crate::cli::commands::ServeArgs;
use crate::cli::runtime::Runtime;
use crate::errors::NightshiftError;

pub async fn handle_serve(args: ServeArgs, config: Option<&Path>) -> Result<(), NightshiftError> {
    info!(host = %args.host, port = args.port, "Starting API server");

    let runtime = Runtime::build_daemon(config).await?;
    let addr = format!("{}:{}", args.host, args.port);
    runtime.run_daemon(Some(&addr)).await
}
