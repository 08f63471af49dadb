use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle, time::sleep};
use tokio_retry::strategy::ExponentialBackoff;

use crate::{
    engine::{Engine, EngineError},
    internal_events::{WatcherError, WatcherEventReceived},
    router::RouterMessage,
    shutdown::ShutdownSignal,
    timestamp,
};

/// Long-polls the engine's event endpoint and translates container
/// lifecycle actions into router messages. Keeps its own `since` cursor so
/// a reconnect replays at most a small overlap.
pub struct DockerWatcher {
    engine: Engine,
    tx: UnboundedSender<RouterMessage>,
    since: String,
    shutdown: ShutdownSignal,
}

impl DockerWatcher {
    pub fn spawn(
        engine: Engine,
        tx: UnboundedSender<RouterMessage>,
        shutdown: ShutdownSignal,
    ) -> JoinHandle<()> {
        let watcher = DockerWatcher {
            engine,
            tx,
            since: timestamp::rfc3339_nanos(Utc::now()),
            shutdown,
        };
        tokio::spawn(watcher.run())
    }

    fn fresh_backoff() -> ExponentialBackoff {
        ExponentialBackoff::from_millis(2)
            .factor(250)
            .max_delay(Duration::from_secs(60))
    }

    async fn run(mut self) {
        info!(message = "Listening for container events.");
        let mut backoff = Self::fresh_backoff();
        loop {
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = &mut shutdown => return,
                result = self.watch() => match result {
                    // The engine closed a healthy stream; reconnect at once.
                    Ok(()) => backoff = Self::fresh_backoff(),
                    Err(error) => {
                        emit!(WatcherError { error: &error });
                        let delay = backoff.next().expect("backoff is infinite");
                        tokio::select! {
                            _ = &mut shutdown => return,
                            _ = sleep(delay) => {}
                        }
                    }
                },
            }
        }
    }

    async fn watch(&mut self) -> Result<(), EngineError> {
        let since = timestamp::since_query(&self.since).map_err(|error| {
            EngineError::EventStream {
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string()),
            }
        })?;
        let mut events = self.engine.events(&since).await?;

        while let Some(event) = events.next().await {
            let event = event?;
            if let Some(nanos) = event.time_nano {
                let stamp = timestamp::from_unix_nanos(nanos);
                if stamp > self.since {
                    self.since = stamp;
                }
            }

            if !event.is_container() {
                continue;
            }
            let id = match &event.id {
                Some(id) => id.clone(),
                None => continue,
            };
            emit!(WatcherEventReceived {
                action: &event.action,
                id: &id,
            });

            let message = match event.action.as_str() {
                // `start` for running containers, `create` so a worker can
                // pick the container up the moment it starts producing.
                "start" | "create" => RouterMessage::Created { id },
                // `die` is the one action every stop path passes through;
                // `destroy`/`kill` always follow it.
                "die" => RouterMessage::Destroyed { id },
                _ => continue,
            };
            if self.tx.send(message).is_err() {
                // Router is gone; shutdown will resolve momentarily.
                return Ok(());
            }
        }
        Ok(())
    }
}
