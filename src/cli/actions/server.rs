use crate::cli::actions::Action;
use crate::sesamo;
use anyhow::Result;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server { port, dsn } => sesamo::new(port, dsn).await,
    }
}
