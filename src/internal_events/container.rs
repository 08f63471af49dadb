use metrics::{counter, gauge};

use super::InternalEvent;
use crate::chunk_parser::LogStream;

#[derive(Debug)]
pub struct ContainerWorkerStarted<'a> {
    pub name: &'a str,
    pub id: &'a str,
    pub streams: &'a [LogStream],
}

impl InternalEvent for ContainerWorkerStarted<'_> {
    fn emit_logs(&self) {
        info!(message = "Watching container logs.", container_name = %self.name, container_id = %self.id);
    }

    fn emit_metrics(&self) {
        // Prime the per-stream series so collectors see them at zero.
        for stream in self.streams {
            counter!(
                "log_entries_read_total", 0,
                "container_name" => self.name.to_owned(),
                "container_id" => self.id.to_owned(),
                "stream" => stream.as_str()
            );
            counter!(
                "log_entries_sent_total", 0,
                "container_name" => self.name.to_owned(),
                "container_id" => self.id.to_owned(),
                "stream" => stream.as_str()
            );
        }
    }
}

#[derive(Debug)]
pub struct ContainerLogCaptureDisabled<'a> {
    pub name: &'a str,
    pub id: &'a str,
}

impl InternalEvent for ContainerLogCaptureDisabled<'_> {
    fn emit_logs(&self) {
        info!(
            message = "Log capture disabled by label, sleeping until shutdown.",
            container_name = %self.name,
            container_id = %self.id
        );
    }
}

#[derive(Debug)]
pub struct ContainerLogReceived<'a> {
    pub name: &'a str,
    pub id: &'a str,
    pub stream: LogStream,
}

impl InternalEvent for ContainerLogReceived<'_> {
    fn emit_logs(&self) {
        trace!(message = "Received log line.", container_id = %self.id, stream = %self.stream.as_str());
    }

    fn emit_metrics(&self) {
        counter!(
            "log_entries_read_total", 1,
            "container_name" => self.name.to_owned(),
            "container_id" => self.id.to_owned(),
            "stream" => self.stream.as_str()
        );
    }
}

#[derive(Debug)]
pub struct ContainerLogSent<'a> {
    pub name: &'a str,
    pub id: &'a str,
    pub stream: LogStream,
}

impl InternalEvent for ContainerLogSent<'_> {
    fn emit_metrics(&self) {
        counter!(
            "log_entries_sent_total", 1,
            "container_name" => self.name.to_owned(),
            "container_id" => self.id.to_owned(),
            "stream" => self.stream.as_str()
        );
    }
}

#[derive(Debug)]
pub struct ContainerCursorAdvanced<'a> {
    pub name: &'a str,
    pub id: &'a str,
    pub unix_seconds: f64,
}

impl InternalEvent for ContainerCursorAdvanced<'_> {
    fn emit_metrics(&self) {
        gauge!(
            "last_log_entry_at_seconds", self.unix_seconds,
            "container_name" => self.name.to_owned(),
            "container_id" => self.id.to_owned()
        );
    }
}

#[derive(Debug)]
pub struct ContainerLogParseFailed<'a> {
    pub name: &'a str,
    pub id: &'a str,
    pub reason: &'a str,
}

impl InternalEvent for ContainerLogParseFailed<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Skipping unparseable log line.",
            container_id = %self.id,
            reason = %self.reason
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "log_parse_failures_total", 1,
            "container_name" => self.name.to_owned(),
            "container_id" => self.id.to_owned()
        );
    }
}

#[derive(Debug)]
pub struct ContainerReadError<'a> {
    pub name: &'a str,
    pub id: &'a str,
    pub error: &'a crate::engine::EngineError,
}

impl InternalEvent for ContainerReadError<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Error reading container logs, will retry.",
            container_name = %self.name,
            container_id = %self.id,
            error = %self.error
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "read_exceptions_total", 1,
            "container_name" => self.name.to_owned(),
            "container_id" => self.id.to_owned(),
            "exception" => self.error.kind()
        );
    }
}

#[derive(Debug)]
pub struct ContainerGone<'a> {
    pub name: &'a str,
    pub id: &'a str,
}

impl InternalEvent for ContainerGone<'_> {
    fn emit_logs(&self) {
        info!(
            message = "Container is gone, retiring its worker.",
            container_name = %self.name,
            container_id = %self.id
        );
    }
}

#[derive(Debug)]
pub struct ContainerWaitingForStart<'a> {
    pub name: &'a str,
    pub id: &'a str,
}

impl InternalEvent for ContainerWaitingForStart<'_> {
    fn emit_logs(&self) {
        debug!(
            message = "Container is not running, waiting for it to start.",
            container_name = %self.name,
            container_id = %self.id
        );
    }
}
