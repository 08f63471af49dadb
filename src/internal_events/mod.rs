mod container;
mod sink;
mod state;
mod watcher;

pub use container::*;
pub use sink::*;
pub use state::*;
pub use watcher::*;

/// One observable occurrence, with its log line and its metric updates kept
/// together so neither drifts from the other.
pub trait InternalEvent {
    fn emit_logs(&self) {}
    fn emit_metrics(&self) {}
}

pub fn emit(event: &impl InternalEvent) {
    event.emit_logs();
    event.emit_metrics();
}

#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::emit(&$event)
    };
}
