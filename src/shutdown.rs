use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::FutureExt;
use stream_cancel::{Trigger, Tripwire};

/// Cloneable signal that resolves once the matching [`Trigger`] is cancelled
/// or dropped. Passed to every long-lived task so that dropping a worker's
/// trigger aborts its in-flight engine stream.
#[derive(Clone, Debug)]
pub struct ShutdownSignal(Tripwire);

impl ShutdownSignal {
    pub fn new_wired() -> (Trigger, ShutdownSignal) {
        let (trigger, tripwire) = Tripwire::new();
        (trigger, ShutdownSignal(tripwire))
    }

    /// A signal that never fires. Test use only.
    pub fn noop() -> Self {
        let (trigger, tripwire) = Tripwire::new();
        std::mem::forget(trigger);
        ShutdownSignal(tripwire)
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.poll_unpin(cx).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_when_trigger_dropped() {
        let (trigger, shutdown) = ShutdownSignal::new_wired();
        let mut cloned = shutdown.clone();
        assert!(futures::poll!(&mut cloned).is_pending());
        drop(trigger);
        cloned.await;
        shutdown.await;
    }
}
