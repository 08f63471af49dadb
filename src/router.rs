use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use stream_cancel::Trigger;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{interval, timeout},
};

use crate::{
    config::Config,
    container::{ContainerWorker, WorkerHandle},
    engine::Engine,
    internal_events::{StateCheckpointFailed, StateCheckpointed},
    metrics,
    sampler::Sampler,
    shutdown::ShutdownSignal,
    sink::{logstash_pair, LogstashSender},
    state,
    watcher::DockerWatcher,
};

const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Discovery and control messages. Everything that mutates the worker map,
/// including shutdown, funnels through one queue so tear-down is serialized
/// with discovery.
#[derive(Debug)]
pub enum RouterMessage {
    Created { id: String },
    Destroyed { id: String },
    Checkpoint,
    Terminate,
}

/// Central dispatcher: owns the id → worker map, reconciles it against
/// discovery messages, and periodically snapshots every worker's cursor to
/// the state file.
pub struct Router {
    engine: Engine,
    sink: LogstashSender,
    sampler: Arc<Sampler>,
    state_file: PathBuf,
    checkpoint_interval: Duration,
    enable_metrics: bool,
    workers: HashMap<String, WorkerHandle>,
    tx: UnboundedSender<RouterMessage>,
    rx: UnboundedReceiver<RouterMessage>,
    writer_task: Option<JoinHandle<()>>,
}

impl Router {
    pub fn new(config: &Config, engine: Engine) -> Router {
        let (tx, rx) = mpsc::unbounded_channel();
        let (sink, writer) = logstash_pair(config.logstash_server.clone());
        let writer_task = tokio::spawn(writer.run());

        Router {
            engine,
            sink,
            sampler: Arc::new(config.sampler()),
            state_file: config.state_file.clone(),
            checkpoint_interval: config.state_checkpoint_interval,
            enable_metrics: config.enable_metrics,
            workers: HashMap::new(),
            tx,
            rx,
            writer_task: Some(writer_task),
        }
    }

    /// Handle for out-of-loop producers: the signal listener sends
    /// `Terminate` through this.
    pub fn handle(&self) -> UnboundedSender<RouterMessage> {
        self.tx.clone()
    }

    pub async fn run(mut self) {
        let (watcher_trigger, watcher_shutdown) = ShutdownSignal::new_wired();
        let watcher_task =
            DockerWatcher::spawn(self.engine.clone(), self.tx.clone(), watcher_shutdown);

        let metrics_task = if self.enable_metrics {
            metrics::spawn_server()
        } else {
            None
        };

        let cursors = state::load(&self.state_file);
        info!(
            message = "Loaded persisted cursors.",
            containers = %cursors.len(),
            path = %self.state_file.display(),
        );

        self.enumerate_existing(&cursors).await;

        let (ticker_trigger, ticker_shutdown) = ShutdownSignal::new_wired();
        let ticker_task = tokio::spawn(checkpoint_ticker(
            self.checkpoint_interval,
            self.tx.clone(),
            ticker_shutdown,
        ));

        while let Some(message) = self.rx.recv().await {
            match message {
                RouterMessage::Created { id } => self.handle_created(id, &cursors).await,
                RouterMessage::Destroyed { id } => self.handle_destroyed(&id),
                RouterMessage::Checkpoint => self.checkpoint(),
                RouterMessage::Terminate => {
                    info!(message = "Shutting down.");
                    drop(ticker_trigger);
                    drop(watcher_trigger);
                    self.terminate(watcher_task, ticker_task, metrics_task).await;
                    return;
                }
            }
        }
    }

    /// Containers already running at boot never produce a `start` event, so
    /// the map is seeded from the list endpoint, cursors inherited from the
    /// state file.
    async fn enumerate_existing(&mut self, cursors: &BTreeMap<String, String>) {
        let summaries = match self.engine.list_containers().await {
            Ok(summaries) => summaries,
            Err(error) => {
                error!(message = "Unable to list running containers.", %error);
                return;
            }
        };

        for summary in summaries {
            self.handle_created(summary.id, cursors).await;
        }
    }

    async fn handle_created(&mut self, id: String, cursors: &BTreeMap<String, String>) {
        if self.workers.contains_key(&id) {
            return;
        }

        let details = match self.engine.inspect_container(&id).await {
            Ok(details) => details,
            Err(error) if error.is_container_gone() => {
                // Raced a short-lived container; nothing to tail.
                trace!(message = "Discovered container vanished before inspect.", container_id = %id);
                return;
            }
            Err(error) => {
                error!(message = "Unable to inspect discovered container.", container_id = %id, %error);
                return;
            }
        };

        let handle = ContainerWorker::spawn(
            &details,
            cursors.get(&id).cloned(),
            self.engine.clone(),
            self.sink.clone(),
            Arc::clone(&self.sampler),
        );
        self.workers.insert(id, handle);
    }

    fn handle_destroyed(&mut self, id: &str) {
        // Dropping the handle cancels the worker's stream; it winds down on
        // its own, nothing here waits for it.
        if self.workers.remove(id).is_some() {
            debug!(message = "Retired worker for destroyed container.", container_id = %id);
        }
    }

    /// Snapshots every live cursor under its own mutex, never holding more
    /// than one at a time, and persists the result.
    fn checkpoint(&self) {
        let cursors: BTreeMap<String, String> = self
            .workers
            .values()
            .map(|handle| {
                (
                    handle.container.id.clone(),
                    handle.container.last_log_timestamp(),
                )
            })
            .collect();

        match state::save(&self.state_file, &cursors) {
            Ok(()) => emit!(StateCheckpointed {
                containers: cursors.len(),
            }),
            Err(error) => emit!(StateCheckpointFailed {
                path: &self.state_file,
                error: &error,
            }),
        }
    }

    async fn terminate(
        &mut self,
        watcher_task: JoinHandle<()>,
        ticker_task: JoinHandle<()>,
        metrics_task: Option<(Trigger, JoinHandle<()>)>,
    ) {
        // Signal every worker, then give them a bounded window to abort
        // their streams before the final cursor snapshot.
        let handles: Vec<WorkerHandle> = self.workers.drain().map(|(_, handle)| handle).collect();
        let containers: Vec<_> = handles
            .iter()
            .map(|handle| Arc::clone(&handle.container))
            .collect();

        let tasks: Vec<JoinHandle<()>> = handles.into_iter().map(WorkerHandle::into_task).collect();
        if timeout(WORKER_DRAIN_TIMEOUT, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!(message = "Some workers did not stop in time, snapshotting anyway.");
        }

        let cursors: BTreeMap<String, String> = containers
            .iter()
            .map(|container| (container.id.clone(), container.last_log_timestamp()))
            .collect();
        match state::save(&self.state_file, &cursors) {
            Ok(()) => emit!(StateCheckpointed {
                containers: cursors.len(),
            }),
            Err(error) => emit!(StateCheckpointFailed {
                path: &self.state_file,
                error: &error,
            }),
        }

        self.sink.stop();
        if let Some(writer_task) = self.writer_task.take() {
            if timeout(WORKER_DRAIN_TIMEOUT, writer_task).await.is_err() {
                warn!(message = "Logstash writer did not drain in time.");
            }
        }

        if let Some((metrics_trigger, metrics_task)) = metrics_task {
            drop(metrics_trigger);
            let _ = timeout(Duration::from_secs(1), metrics_task).await;
        }

        let _ = watcher_task.await;
        let _ = ticker_task.await;
        info!(message = "Shutdown complete.");
    }
}

/// Enqueues a checkpoint every interval until shut down. The first tick
/// fires immediately and is skipped; boot already starts from a fresh load.
async fn checkpoint_ticker(
    period: Duration,
    tx: UnboundedSender<RouterMessage>,
    mut shutdown: ShutdownSignal,
) {
    let mut ticker = interval(period);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = &mut shutdown => return,
            _ = ticker.tick() => {
                if tx.send(RouterMessage::Checkpoint).is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticker_enqueues_checkpoints() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (trigger, shutdown) = ShutdownSignal::new_wired();
        let task = tokio::spawn(checkpoint_ticker(Duration::from_secs(60), tx, shutdown));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(matches!(rx.recv().await, Some(RouterMessage::Checkpoint)));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(matches!(rx.recv().await, Some(RouterMessage::Checkpoint)));

        drop(trigger);
        task.await.unwrap();
    }
}
