use std::net::SocketAddr;

use metrics::counter;

use super::InternalEvent;

#[derive(Debug)]
pub struct SinkConnectionEstablished {
    pub peer_addr: Option<SocketAddr>,
}

impl InternalEvent for SinkConnectionEstablished {
    fn emit_logs(&self) {
        if let Some(peer_addr) = self.peer_addr {
            debug!(message = "Connected to Logstash.", %peer_addr);
        } else {
            debug!(message = "Connected to Logstash.");
        }
    }
}

#[derive(Debug)]
pub struct SinkConnectionFailed<'a> {
    pub error: &'a std::io::Error,
}

impl InternalEvent for SinkConnectionFailed<'_> {
    fn emit_logs(&self) {
        error!(message = "Unable to connect to Logstash.", error = %self.error);
    }

    fn emit_metrics(&self) {
        counter!("sink_connect_errors_total", 1);
    }
}

#[derive(Debug)]
pub struct SinkEventSent {
    pub byte_size: usize,
}

impl InternalEvent for SinkEventSent {
    fn emit_metrics(&self) {
        counter!("sink_sent_events_total", 1);
        counter!("sink_sent_bytes_total", self.byte_size as u64);
    }
}

#[derive(Debug)]
pub struct SinkWriteError<'a> {
    pub error: &'a std::io::Error,
}

impl InternalEvent for SinkWriteError<'_> {
    fn emit_logs(&self) {
        error!(message = "Write to Logstash failed, reconnecting.", error = %self.error);
    }

    fn emit_metrics(&self) {
        counter!("sink_write_errors_total", 1);
    }
}
