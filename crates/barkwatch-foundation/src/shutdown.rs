use std::sync::Arc;
use tokio::sync::Notify;

/// Ctrl-C / SIGTERM handler. `install` registers the signal listeners once;
/// `wait` can be awaited from any task.
#[derive(Clone)]
pub struct ShutdownHandler {
    notify: Arc<Notify>,
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandler {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    pub async fn install(self) -> Self {
        let notify = Arc::clone(&self.notify);
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                ) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!("Failed to install SIGTERM handler: {}", e);
                        let _ = ctrl_c.await;
                        notify.notify_waiters();
                        return;
                    }
                };
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            tracing::info!("Shutdown signal received");
            notify.notify_waiters();
        });
        self
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Programmatic shutdown, used by tests and the runtime itself.
    pub fn trigger(&self) {
        self.notify.notify_waiters();
    }
}
