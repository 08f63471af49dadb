use std::path::Path;

use metrics::counter;

use super::InternalEvent;

#[derive(Debug)]
pub struct StateCheckpointed {
    pub containers: usize,
}

impl InternalEvent for StateCheckpointed {
    fn emit_logs(&self) {
        debug!(message = "Checkpointed container cursors.", containers = %self.containers);
    }

    fn emit_metrics(&self) {
        counter!("state_checkpoints_total", 1);
    }
}

#[derive(Debug)]
pub struct StateCheckpointFailed<'a> {
    pub path: &'a Path,
    pub error: &'a std::io::Error,
}

impl InternalEvent for StateCheckpointFailed<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Unable to write state file.",
            path = %self.path.display(),
            error = %self.error,
        );
    }

    fn emit_metrics(&self) {
        counter!("state_checkpoint_failures_total", 1);
    }
}
