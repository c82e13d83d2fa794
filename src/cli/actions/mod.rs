pub mod console;
pub mod server;

// The match over `Action` lives in `run` so this file stays small.
mod run;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    Console(console::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
