use crate::cli::{
    actions::{console, server, Action},
    telemetry,
};
use anyhow::Result;

/// Single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    let result = match action {
        Action::Server(args) => server::execute(args).await,
        Action::Console(args) => console::execute(args).await,
    };
    telemetry::shutdown_tracer();
    result
}
