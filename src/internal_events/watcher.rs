use metrics::counter;

use super::InternalEvent;

#[derive(Debug)]
pub struct WatcherEventReceived<'a> {
    pub action: &'a str,
    pub id: &'a str,
}

impl InternalEvent for WatcherEventReceived<'_> {
    fn emit_logs(&self) {
        debug!(message = "Received container event.", action = %self.action, container_id = %self.id);
    }
}

#[derive(Debug)]
pub struct WatcherError<'a> {
    pub error: &'a crate::engine::EngineError,
}

impl InternalEvent for WatcherError<'_> {
    fn emit_logs(&self) {
        error!(message = "Container event stream failed, reconnecting.", error = %self.error);
    }

    fn emit_metrics(&self) {
        counter!("watch_errors_total", 1);
    }
}
