//! Runtime control for [`FileServer`].

mod accept;
mod backoff;

use std::sync::Arc;

use accept::{AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
use futures::Future;
use log::info;
use tokio::{select, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{FileServer, ServerError};

impl FileServer {
    /// Serve until Ctrl+C is received.
    ///
    /// # Errors
    ///
    /// Accept failures are retried with back-off and never surface here; the
    /// result is reserved for listener setup failures.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Serve until `shutdown` resolves, then close every connection and wait
    /// for their tasks to finish.
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use filewire::{config::ServerConfig, server::FileServer, store::MemoryStore};
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # async fn demo() -> Result<(), filewire::server::ServerError> {
    /// let server = FileServer::new(ServerConfig::default(), Arc::new(MemoryStore::default())).await?;
    /// let token = CancellationToken::new();
    /// let stop = token.clone();
    /// tokio::spawn(async move { server.run_with_shutdown(stop.cancelled_owned()).await });
    /// token.cancel();
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let FileServer {
            listener,
            setup,
            state,
            backoff,
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        info!("file server listening: addr={:?}", listener.local_addr().ok());

        tracker.spawn(accept_loop(
            Arc::new(listener),
            AcceptLoopOptions {
                setup,
                state: Arc::clone(&state),
                shutdown: shutdown_token.clone(),
                tracker: tracker.clone(),
                backoff,
            },
        ));

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        state.sessions().prune();
        info!("file server stopped");
        Ok(())
    }
}
