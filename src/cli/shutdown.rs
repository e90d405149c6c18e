use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::InteractionError;

/// Cancels a token on Ctrl+C until dropped.
pub(crate) struct CtrlCWatcher {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CtrlCWatcher {
    pub(crate) fn spawn() -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl+C received, disconnecting");
                    token.cancel();
                }
                Err(source) => {
                    let error = InteractionError::CtrlC { source };
                    warn!(%error, "Ctrl+C handling unavailable");
                }
            }
        });
        Self { cancel, task }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for CtrlCWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
