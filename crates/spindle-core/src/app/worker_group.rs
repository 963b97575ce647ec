use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a set of running worker loops.
/// - `request_shutdown()` で全ワーカーに停止を通知（実行中のタスクは最後まで走る）
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<(String, JoinHandle<()>)>,
}

impl WorkerGroup {
    pub(crate) fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Vec::new(),
        }
    }

    /// Receiver to hand to the next spawned loop.
    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub(crate) fn attach(&mut self, queue: &str, join: JoinHandle<()>) {
        self.joins.push((queue.to_string(), join));
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn request_shutdown(&self) {
        // ignore send error: every loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for (queue, join) in self.joins {
            if let Err(err) = join.await {
                tracing::error!(queue = %queue, error = %err, "worker task panicked");
            }
        }
    }
}
