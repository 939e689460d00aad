pub mod server;

/// What the parsed command line asks the process to do.
#[derive(Debug)]
pub enum Action {
    /// Serve the door API until interrupted.
    Server(server::Args),
}

impl Action {
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            Self::Server(args) => server::execute(args).await,
        }
    }
}
