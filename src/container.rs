use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::DateTime;
use futures::StreamExt;
use regex::Regex;
use stream_cancel::Trigger;
use tokio::{task::JoinHandle, time::sleep};
use tokio_retry::strategy::ExponentialBackoff;

use crate::{
    chunk_parser::{ChunkParser, LogStream},
    engine::{ContainerDetails, Engine, EngineError},
    event::{self, deep_merge, ObjectMap, Value},
    internal_events::{
        ContainerCursorAdvanced, ContainerGone, ContainerLogCaptureDisabled,
        ContainerLogParseFailed, ContainerLogReceived, ContainerLogSent, ContainerReadError,
        ContainerWaitingForStart, ContainerWorkerStarted,
    },
    object,
    sampler::Sampler,
    shutdown::ShutdownSignal,
    sink::LogstashSender,
    syslog, timestamp,
};

const DISABLE_LABEL: &str = "org.discourse.mobystash.disable";
const FILTER_REGEX_LABEL: &str = "org.discourse.mobystash.filter_regex";
const PARSE_SYSLOG_LABEL: &str = "org.discourse.mobystash.parse_syslog";
const TAG_LABEL_PREFIX: &str = "org.discourse.mobystash.tag.";

/// Everything a worker knows about its container. Built once from the
/// engine's inspect record; only the cursor mutates afterwards, and the
/// router reads that under the same mutex during checkpoints.
#[derive(Debug)]
pub struct Container {
    pub id: String,
    pub name: String,
    tags: ObjectMap,
    capture_logs: bool,
    parse_syslog: bool,
    filter_regex: Option<Regex>,
    tty: bool,
    last_log_timestamp: Mutex<String>,
}

impl Container {
    pub fn new(details: &ContainerDetails, initial_cursor: Option<String>) -> Self {
        let name = details.name.trim_start_matches('/').to_string();

        let mut capture_logs = true;
        let mut parse_syslog = false;
        let mut filter_regex = None;
        let mut label_tags = ObjectMap::new();

        if let Some(labels) = &details.config.labels {
            for (label, value) in labels {
                match label.as_str() {
                    DISABLE_LABEL => capture_logs = !crate::config::truthy(value),
                    PARSE_SYSLOG_LABEL => parse_syslog = crate::config::truthy(value),
                    FILTER_REGEX_LABEL => match Regex::new(value) {
                        Ok(regex) => filter_regex = Some(regex),
                        Err(error) => {
                            warn!(
                                message = "Ignoring invalid filter_regex label.",
                                container_id = %details.id,
                                %error,
                            );
                        }
                    },
                    label => {
                        if let Some(path) = label.strip_prefix(TAG_LABEL_PREFIX) {
                            deep_merge(&mut label_tags, nested_tag(path, value));
                        }
                    }
                }
            }
        }

        let moby_tags = object! {
            "name" => name.clone(),
            "id" => details.id.clone(),
            "hostname" => details.config.hostname.clone(),
            "image" => details.config.image.clone(),
            "image_id" => details.image_id.clone(),
        };
        let mut tags = object! { "moby" => moby_tags.clone() };
        deep_merge(&mut tags, label_tags);

        // Label tags may extend moby.* but never displace it: a label path
        // of exactly `moby` merges as a scalar and would otherwise replace
        // the whole subtree, and the identifying pair is fixed either way.
        match tags.get_mut("moby") {
            Some(Value::Map(moby)) => {
                moby.insert("name".into(), Value::from(name.clone()));
                moby.insert("id".into(), Value::from(details.id.clone()));
            }
            _ => {
                tags.insert("moby".into(), Value::Map(moby_tags));
            }
        }

        // An inherited cursor that no longer parses (a hand-edited state
        // file) restarts the container from the epoch.
        let cursor = initial_cursor
            .filter(|cursor| DateTime::parse_from_rfc3339(cursor).is_ok())
            .unwrap_or_else(|| timestamp::EPOCH.to_string());

        Container {
            id: details.id.clone(),
            name,
            tags,
            capture_logs,
            parse_syslog,
            filter_regex,
            tty: details.config.tty,
            last_log_timestamp: Mutex::new(cursor),
        }
    }

    pub fn last_log_timestamp(&self) -> String {
        self.last_log_timestamp
            .lock()
            .expect("cursor mutex poisoned")
            .clone()
    }

    /// Moves the cursor forward. The canonical form is fixed-width, so a
    /// lexicographic comparison is a chronological one and the cursor can
    /// never go backwards.
    fn advance_cursor(&self, candidate: &str) {
        let mut cursor = self
            .last_log_timestamp
            .lock()
            .expect("cursor mutex poisoned");
        if candidate > cursor.as_str() {
            *cursor = candidate.to_string();
        }
    }

    fn streams(&self) -> &'static [LogStream] {
        if self.tty {
            &[LogStream::Tty]
        } else {
            &[LogStream::Stdout, LogStream::Stderr]
        }
    }
}

/// Builds `{a: {b: {c: value}}}` from a dotted label path.
fn nested_tag(path: &str, value: &str) -> ObjectMap {
    let mut segments = path.split('.').rev();
    let leaf = match segments.next() {
        Some(leaf) => leaf,
        None => return ObjectMap::new(),
    };
    let mut tree = object! { leaf => value };
    for segment in segments {
        tree = object! { segment => tree };
    }
    tree
}

/// Tails one container. Owns the read/parse/transform/forward pipeline and
/// the cursor; supervised restarts keep it alive across transient engine
/// failures until shutdown or the engine reports the container gone.
pub struct ContainerWorker {
    container: Arc<Container>,
    engine: Engine,
    sink: LogstashSender,
    sampler: Arc<Sampler>,
    shutdown: ShutdownSignal,
}

/// Router-side handle. Dropping it cancels the worker's in-flight engine
/// stream via the trigger.
pub struct WorkerHandle {
    pub container: Arc<Container>,
    _trigger: Trigger,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

impl ContainerWorker {
    pub fn spawn(
        details: &ContainerDetails,
        initial_cursor: Option<String>,
        engine: Engine,
        sink: LogstashSender,
        sampler: Arc<Sampler>,
    ) -> WorkerHandle {
        let container = Arc::new(Container::new(details, initial_cursor));
        let (trigger, shutdown) = ShutdownSignal::new_wired();

        let worker = ContainerWorker {
            container: Arc::clone(&container),
            engine,
            sink,
            sampler,
            shutdown,
        };
        let task = tokio::spawn(worker.run());

        WorkerHandle {
            container,
            _trigger: trigger,
            task,
        }
    }

    fn fresh_backoff() -> ExponentialBackoff {
        ExponentialBackoff::from_millis(2)
            .factor(250)
            .max_delay(Duration::from_secs(60))
    }

    async fn run(self) {
        let container = &self.container;
        emit!(ContainerWorkerStarted {
            name: &container.name,
            id: &container.id,
            streams: container.streams(),
        });

        if !container.capture_logs {
            emit!(ContainerLogCaptureDisabled {
                name: &container.name,
                id: &container.id,
            });
            self.shutdown.clone().await;
            return;
        }

        let mut backoff = Self::fresh_backoff();
        loop {
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = &mut shutdown => return,
                result = self.run_once() => match result {
                    Ok(()) => backoff = Self::fresh_backoff(),
                    Err(error) if error.is_container_gone() => {
                        emit!(ContainerGone {
                            name: &container.name,
                            id: &container.id,
                        });
                        return;
                    }
                    Err(error) => {
                        emit!(ContainerReadError {
                            name: &container.name,
                            id: &container.id,
                            error: &error,
                        });
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

    /// One iteration of the lifecycle loop: figure out whether the container
    /// is running, then either wait for it to start or follow its logs until
    /// the engine closes the stream.
    async fn run_once(&self) -> Result<(), EngineError> {
        let details = self.engine.inspect_container(&self.container.id).await?;
        if !details.state.is_running() {
            self.wait_for_start().await
        } else {
            self.follow_logs().await
        }
    }

    /// The container is stopped: watch the engine's event stream, advancing
    /// the cursor over event times, until an event for this container shows
    /// up. The enclosing loop then re-inspects.
    async fn wait_for_start(&self) -> Result<(), EngineError> {
        let container = &self.container;
        emit!(ContainerWaitingForStart {
            name: &container.name,
            id: &container.id,
        });

        let since = since_cursor(&container.last_log_timestamp())?;
        let mut events = self.engine.events(&since).await?;
        while let Some(event) = events.next().await {
            let event = event?;
            if let Some(nanos) = event.time_nano {
                container.advance_cursor(&timestamp::from_unix_nanos(nanos));
            }
            if event.is_container() && event.id.as_deref() == Some(container.id.as_str()) {
                return Ok(());
            }
        }
        // Stream ended without our event; the outer loop re-inspects.
        Ok(())
    }

    /// Follows the log endpoint from just past the cursor, piping chunks
    /// through the frame parser and forwarding each line. Returns when the
    /// engine closes the stream.
    async fn follow_logs(&self) -> Result<(), EngineError> {
        let container = &self.container;
        let since = since_cursor(&container.last_log_timestamp())?;
        let mut body = self.engine.logs(&container.id, &since).await?;

        let mut parser = ChunkParser::new(container.tty);
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| EngineError::Transport { source })?;
            parser.feed(&chunk, |line, stream| self.send_event(line, stream));
        }
        Ok(())
    }

    /// Transforms one log line into an event and hands it to the sink.
    fn send_event(&self, line: String, stream: LogStream) {
        let container = &self.container;
        emit!(ContainerLogReceived {
            name: &container.name,
            id: &container.id,
            stream,
        });

        let (stamp, message) = match line.split_once(' ') {
            Some(split) => split,
            None => {
                emit!(ContainerLogParseFailed {
                    name: &container.name,
                    id: &container.id,
                    reason: "no timestamp prefix",
                });
                return;
            }
        };
        let parsed = match DateTime::parse_from_rfc3339(stamp) {
            Ok(parsed) => parsed,
            Err(_) => {
                emit!(ContainerLogParseFailed {
                    name: &container.name,
                    id: &container.id,
                    reason: "unparseable timestamp prefix",
                });
                return;
            }
        };

        container.advance_cursor(stamp);
        emit!(ContainerCursorAdvanced {
            name: &container.name,
            id: &container.id,
            unix_seconds: timestamp::unix_seconds(&parsed),
        });

        let (message, syslog_fields) = if container.parse_syslog {
            syslog::parse(message)
        } else {
            (message.to_string(), ObjectMap::new())
        };

        let sample_metadata = match self.sampler.sample(&message) {
            Some(metadata) => metadata,
            None => return,
        };

        if let Some(filter) = &container.filter_regex {
            if filter.is_match(&message) {
                return;
            }
        }

        let mut assembled = object! {
            "message" => message,
            "@timestamp" => stamp,
            "moby" => object! { "stream" => stream.as_str() },
        };
        deep_merge(&mut assembled, syslog_fields);
        deep_merge(&mut assembled, sample_metadata);
        deep_merge(&mut assembled, container.tags.clone());

        let event = match event::finalize(assembled) {
            Ok(event) => event,
            Err(error) => {
                error!(message = "Dropping event that failed to finalize.", container_id = %container.id, %error);
                return;
            }
        };

        self.sink.send(event);
        emit!(ContainerLogSent {
            name: &container.name,
            id: &container.id,
            stream,
        });
    }
}

fn since_cursor(cursor: &str) -> Result<String, EngineError> {
    // Cursors are validated at construction and only ever advanced to
    // engine-issued timestamps.
    timestamp::since_query(cursor).map_err(|error| EngineError::EventStream {
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string()),
    })
}
