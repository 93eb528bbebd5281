//! Pluggable fault hooks.
//!
//! The chain engine itself decides *when* a fault matters; these traits let
//! the surrounding stack decide *what happens next*. A [`MessageObserver`]
//! receives the faulted message for outward dispatch (building a fault
//! response, notifying a transport), while a [`FaultListener`] gets a veto
//! over the engine's default fault logging.

use crate::message::Message;

/// Receives a message for dispatch outside the chain.
///
/// A chain's registered fault observer is handed the faulted message after
/// the unwind completes — unless the exchange is plain one-way, in which
/// case there is nobody to dispatch a fault to.
pub trait MessageObserver: Send + Sync {
    /// Called with the faulted message. The causing error is parked on the
    /// message (see [`Message::fault`]).
    fn on_message(&self, message: &mut Message);
}

/// Decides whether the engine's default fault logging should still occur.
///
/// Returning `false` suppresses the engine's own log line, for stacks that
/// do their own fault reporting.
pub trait FaultListener: Send + Sync {
    /// Called once per fault, before default logging.
    ///
    /// `description` names the failing service/operation when resolvable.
    fn fault_occurred(
        &self,
        error: &anyhow::Error,
        description: Option<&str>,
        message: &Message,
    ) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObserver(AtomicUsize);

    impl MessageObserver for CountingObserver {
        fn on_message(&self, _message: &mut Message) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_observer_is_object_safe() {
        let observer: Box<dyn MessageObserver> = Box::new(CountingObserver(AtomicUsize::new(0)));
        let mut msg = Message::default();
        observer.on_message(&mut msg);
    }

    struct QuietListener;

    impl FaultListener for QuietListener {
        fn fault_occurred(
            &self,
            _error: &anyhow::Error,
            _description: Option<&str>,
            _message: &Message,
        ) -> bool {
            false
        }
    }

    #[test]
    fn test_listener_is_object_safe() {
        let listener: Box<dyn FaultListener> = Box::new(QuietListener);
        let msg = Message::default();
        assert!(!listener.fault_occurred(&anyhow::anyhow!("x"), Some("Svc#op"), &msg));
    }
}
