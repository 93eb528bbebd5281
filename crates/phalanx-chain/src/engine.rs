//! Execution engine: drives a chain's cursor through its interceptors.
//!
//! The engine is a state machine over [`RunState`]. It owns no threads: it
//! runs synchronously on whatever thread calls [`PhaseChain::do_intercept`],
//! and concurrency safety comes from the clone-per-message discipline plus
//! one mutex guarding the run state. Cancellation is cooperative — state is
//! checked at the boundary between interceptors, never inside one.
//!
//! Suspension is a returned signal, not an unwound exception: an
//! interceptor that returns [`Outcome::Suspend`] leaves the cursor stepped
//! back one position (unless the message carries [`RESUME_FROM_NEXT`]), so
//! a later [`PhaseChain::resume`] re-executes the same interceptor.

use crate::chain::PhaseChain;
use crate::cursor::Cursor;
use crate::interceptor::Outcome;
use phalanx_core::{ChainError, ChainResult, Message, MessageId, RESUME_FROM_NEXT};
use std::sync::Arc;

/// The run state of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// The engine is (or is ready to start) walking the cursor forward.
    Executing,
    /// A suspension signal stopped the chain; a timely `resume` is expected.
    Paused,
    /// A caller detached the chain from its thread of control entirely.
    Suspended,
    /// A fault or an explicit `abort` terminated the chain.
    Aborted,
    /// The cursor was exhausted without fault or suspension.
    Complete,
}

/// Mutable execution state, guarded by the chain's mutex.
pub(crate) struct ExecState {
    pub(crate) state: RunState,
    pub(crate) cursor: Cursor,
    /// Set once per run when a fault is wrapped; prevents re-entrant
    /// invocations from double-reporting the same fault.
    pub(crate) fault_occurred: bool,
    /// Id of the interceptor currently inside `handle`, if any.
    pub(crate) executing: Option<String>,
    /// The message associated with the in-flight run.
    pub(crate) current_message: Option<MessageId>,
}

impl ExecState {
    pub(crate) fn new() -> Self {
        Self {
            state: RunState::Executing,
            cursor: Cursor::default(),
            fault_occurred: false,
            executing: None,
            current_message: None,
        }
    }
}

/// Scoped current-message association: set on entry, restored on every
/// exit path.
///
/// The executing-interceptor record is saved and restored alongside, so a
/// nested run issued from inside an interceptor's `handle` hands the outer
/// frame back its own record — the invoker is still the executing
/// interceptor after a nested `do_intercept` returns.
struct CurrentMessageScope<'a> {
    chain: &'a PhaseChain,
    previous: Option<MessageId>,
    previous_executing: Option<String>,
}

impl<'a> CurrentMessageScope<'a> {
    fn enter(chain: &'a PhaseChain, id: MessageId) -> Self {
        let mut exec = chain.exec.lock();
        let previous = std::mem::replace(&mut exec.current_message, Some(id));
        let previous_executing = exec.executing.take();
        Self {
            chain,
            previous,
            previous_executing,
        }
    }
}

impl Drop for CurrentMessageScope<'_> {
    fn drop(&mut self) {
        let mut exec = self.chain.exec.lock();
        exec.current_message = self.previous;
        exec.executing = self.previous_executing.take();
    }
}

impl PhaseChain {
    /// Drives the message through the chain.
    ///
    /// Returns `Ok(true)` iff the run ended [`RunState::Complete`],
    /// `Ok(false)` when the chain paused, suspended, or was aborted without
    /// a fault, and `Err` when an interceptor faulted — after the chain has
    /// unwound and the fault observer (if any) was notified.
    pub fn do_intercept(&self, message: &mut Message) -> ChainResult<bool> {
        let _scope = CurrentMessageScope::enter(self, message.id());
        self.run_loop(message)
    }

    /// Like [`PhaseChain::do_intercept`], but first scans the cursor
    /// forward past the interceptor with the given id, so execution starts
    /// at its successor.
    pub fn do_intercept_starting_after(
        &self,
        message: &mut Message,
        interceptor_id: &str,
    ) -> ChainResult<bool> {
        {
            let mut exec = self.exec.lock();
            while exec.state == RunState::Executing {
                let Some(idx) = exec.cursor.next(self) else {
                    break;
                };
                if self.node(idx).interceptor.id() == Some(interceptor_id) {
                    break;
                }
            }
        }
        self.do_intercept(message)
    }

    /// Like [`PhaseChain::do_intercept`], but first scans the cursor
    /// forward to the interceptor with the given id, so execution starts
    /// *at* it.
    pub fn do_intercept_starting_at(
        &self,
        message: &mut Message,
        interceptor_id: &str,
    ) -> ChainResult<bool> {
        {
            let mut exec = self.exec.lock();
            while exec.state == RunState::Executing {
                let Some(idx) = exec.cursor.next(self) else {
                    break;
                };
                if self.node(idx).interceptor.id() == Some(interceptor_id) {
                    exec.cursor.previous(self);
                    break;
                }
            }
        }
        self.do_intercept(message)
    }

    /// Returns the chain's current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.exec.lock().state
    }

    /// Stops the chain at the next interceptor boundary, expecting a timely
    /// `resume`.
    pub fn pause(&self) {
        self.update_state(RunState::Paused);
    }

    /// Returns a paused chain to [`RunState::Executing`] without replaying
    /// consumed work. Does not re-enter the run loop.
    ///
    /// A no-op in any state other than [`RunState::Paused`]; a suspended
    /// chain comes back through [`PhaseChain::resume`].
    pub fn unpause(&self) {
        let mut exec = self.exec.lock();
        if exec.state == RunState::Paused {
            tracing::debug!("Chain state Paused -> Executing");
            exec.state = RunState::Executing;
        }
    }

    /// Detaches the chain from the current thread of control entirely.
    ///
    /// Unlike [`PhaseChain::pause`], no timely resume is expected; the
    /// message may be picked up on another thread later.
    pub fn suspend(&self) {
        self.update_state(RunState::Suspended);
    }

    /// Resumes a paused or suspended chain with the message that was in
    /// flight, re-entering the run loop.
    ///
    /// A no-op on a chain in any other state: returns `Ok(true)` if the
    /// chain already completed, `Ok(false)` otherwise.
    pub fn resume(&self, message: &mut Message) -> ChainResult<bool> {
        {
            let mut exec = self.exec.lock();
            match exec.state {
                RunState::Paused | RunState::Suspended => {
                    tracing::debug!(from = ?exec.state, "Chain state -> Executing");
                    exec.state = RunState::Executing;
                }
                RunState::Complete => return Ok(true),
                RunState::Executing | RunState::Aborted => return Ok(false),
            }
        }
        self.do_intercept(message)
    }

    /// Forces the chain into [`RunState::Aborted`] from any state.
    ///
    /// Cancellation is cooperative: an interceptor already inside `handle`
    /// is not interrupted, but the run loop stops at the next boundary.
    pub fn abort(&self) {
        self.update_state(RunState::Aborted);
    }

    /// Rewinds the cursor to the front of the chain.
    ///
    /// A completed chain transitions back to [`RunState::Executing`] so it
    /// can run again; in any other state only the cursor (and the per-run
    /// fault flag) is reset.
    pub fn reset(&self) {
        let mut exec = self.exec.lock();
        exec.cursor.reset();
        exec.fault_occurred = false;
        if exec.state == RunState::Complete {
            exec.state = RunState::Executing;
        }
    }

    /// Returns the id of the message currently associated with this
    /// chain's in-flight run, if any.
    #[must_use]
    pub fn current_message_id(&self) -> Option<MessageId> {
        self.exec.lock().current_message
    }

    /// Redirects the chain's current-message association mid-run.
    ///
    /// Permitted only to the designated service-invoker interceptor (see
    /// [`PhaseChain::set_service_invoker`]) while it is the executing
    /// interceptor; any other caller gets [`ChainError::IllegalState`].
    pub fn swap_current_message(
        &self,
        caller_id: &str,
        message_id: MessageId,
    ) -> ChainResult<()> {
        let mut exec = self.exec.lock();
        let designated = self.service_invoker.as_deref() == Some(caller_id);
        let executing = exec.executing.as_deref() == Some(caller_id);
        if designated && executing {
            exec.current_message = Some(message_id);
            Ok(())
        } else {
            Err(ChainError::illegal_state(format!(
                "interceptor '{caller_id}' may not redirect the chain's current message"
            )))
        }
    }

    fn update_state(&self, state: RunState) {
        let mut exec = self.exec.lock();
        tracing::debug!(from = ?exec.state, to = ?state, "Chain state updated");
        exec.state = state;
    }

    fn run_loop(&self, message: &mut Message) -> ChainResult<bool> {
        loop {
            // Boundary: state check and cursor advance happen under the
            // lock; `handle` runs outside it so interceptors may re-enter
            // the chain.
            let next = {
                let mut exec = self.exec.lock();
                if exec.state != RunState::Executing {
                    break;
                }
                let next = exec.cursor.next(self);
                if let Some(idx) = next {
                    exec.executing = self.node(idx).interceptor.id().map(str::to_owned);
                }
                next
            };
            let Some(idx) = next else {
                break;
            };

            let interceptor = Arc::clone(&self.node(idx).interceptor);
            tracing::trace!(interceptor = %self.node_label(idx), "Invoking handle");
            match interceptor.handle(message) {
                Outcome::Continue => {
                    self.exec.lock().executing = None;
                }
                Outcome::Suspend => {
                    let mut exec = self.exec.lock();
                    exec.executing = None;
                    if !message.bool_property(RESUME_FROM_NEXT) && exec.cursor.has_previous() {
                        exec.cursor.previous(self);
                    }
                    if exec.state == RunState::Executing {
                        tracing::debug!(
                            interceptor = %self.node_label(idx),
                            "Chain paused by suspension signal"
                        );
                        exec.state = RunState::Paused;
                    }
                    return Ok(false);
                }
                Outcome::Fault(error) => {
                    return Err(self.wrap_and_unwind(message, error));
                }
            }
        }

        let mut exec = self.exec.lock();
        if exec.state == RunState::Executing && !exec.cursor.has_next(self) {
            exec.state = RunState::Complete;
        }
        Ok(exec.state == RunState::Complete)
    }

    /// Wraps an interceptor fault exactly once per run: parks the error on
    /// the message, unwinds, consults the fault listener, and dispatches to
    /// the fault observer unless the exchange is plain one-way.
    fn wrap_and_unwind(&self, message: &mut Message, error: anyhow::Error) -> ChainError {
        let description = message.exchange().describe_operation();
        let already_reported = {
            let mut exec = self.exec.lock();
            exec.executing = None;
            let already = exec.fault_occurred;
            exec.fault_occurred = true;
            exec.state = RunState::Aborted;
            already
        };
        if already_reported {
            // A nested invocation already unwound and dispatched this
            // fault; just propagate.
            return ChainError::fault(description, error);
        }

        message.set_fault(error);
        if let Err(unwind_error) = self.unwind(message) {
            return unwind_error;
        }

        let write_log = match message.fault() {
            Some(err) => self.fault_listener.as_ref().map_or(true, |listener| {
                listener.fault_occurred(err, description.as_deref(), message)
            }),
            None => false,
        };
        if write_log {
            if let Some(err) = message.fault() {
                tracing::warn!(
                    error = %err,
                    operation = description.as_deref().unwrap_or("(unknown operation)"),
                    "Interceptor chain fault"
                );
            }
        }

        let exchange = Arc::clone(message.exchange());
        if !exchange.is_one_way() || exchange.is_robust_one_way() {
            if let Some(observer) = &self.fault_observer {
                observer.on_message(message);
            }
        } else {
            tracing::debug!("One-way exchange; fault not dispatched to observer");
        }

        let error = message
            .take_fault()
            .unwrap_or_else(|| anyhow::anyhow!("fault cleared during unwind"));
        ChainError::fault(description, error)
    }

    /// Walks the cursor backward over the interceptors that completed
    /// before the fault, invoking `handle_fault` on each.
    ///
    /// The faulting interceptor itself never completed, so cleanup starts
    /// at its predecessor and never touches untried interceptors. A failure
    /// inside `handle_fault` is logged and re-raised immediately, cutting
    /// the unwind short.
    fn unwind(&self, message: &mut Message) -> ChainResult<()> {
        {
            let mut exec = self.exec.lock();
            exec.cursor.previous(self);
        }
        loop {
            let idx = {
                let mut exec = self.exec.lock();
                exec.cursor.previous(self)
            };
            let Some(idx) = idx else {
                break;
            };
            let interceptor = Arc::clone(&self.node(idx).interceptor);
            let label = self.node_label(idx);
            tracing::trace!(interceptor = %label, "Invoking handle_fault");
            if let Err(error) = interceptor.handle_fault(message) {
                tracing::warn!(
                    interceptor = %label,
                    error = %error,
                    "handle_fault failed; aborting unwind"
                );
                return Err(ChainError::unwind_failed(label, error));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::FnInterceptor;
    use crate::phase::PhaseRegistry;
    use crate::test_support::{noop, Recorder, REGISTRY_PHASES};
    use phalanx_core::{Exchange, MessageObserver};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, OnceLock, Weak};

    fn registry() -> Arc<PhaseRegistry> {
        Arc::new(PhaseRegistry::new(REGISTRY_PHASES))
    }

    /// Chain of five recording interceptors across three phases, with the
    /// interceptor at `fault_at` (1-based) returning a fault.
    fn recording_chain(recorder: &Recorder, fault_at: Option<usize>) -> PhaseChain {
        let mut chain = PhaseChain::new(registry());
        let phases = ["read", "read", "validate", "invoke", "invoke"];
        for (n, phase) in phases.iter().enumerate() {
            let pos = n + 1;
            let id = format!("i{pos}");
            let handled = recorder.handled.clone();
            let faulted = recorder.faulted.clone();
            let fail = fault_at == Some(pos);
            let fid = id.clone();
            let fid2 = id.clone();
            chain.add(Arc::new(
                FnInterceptor::new(id, *phase, move |_| {
                    handled.lock().push(fid.clone());
                    if fail {
                        Outcome::fault(anyhow::anyhow!("interceptor {fid} failed"))
                    } else {
                        Outcome::Continue
                    }
                })
                .on_fault(move |_| {
                    faulted.lock().push(fid2.clone());
                    Ok(())
                }),
            ));
        }
        chain
    }

    #[test]
    fn test_complete_run_returns_true() {
        let recorder = Recorder::default();
        let chain = recording_chain(&recorder, None);
        let mut msg = Message::default();

        assert!(chain.do_intercept(&mut msg).unwrap());
        assert_eq!(chain.state(), RunState::Complete);
        assert_eq!(recorder.handled(), ["i1", "i2", "i3", "i4", "i5"]);
        assert!(recorder.faulted().is_empty());
    }

    #[test]
    fn test_empty_chain_completes() {
        let chain = PhaseChain::new(registry());
        let mut msg = Message::default();
        assert!(chain.do_intercept(&mut msg).unwrap());
        assert_eq!(chain.state(), RunState::Complete);
    }

    #[test]
    fn test_fault_unwinds_executed_predecessors_only() {
        let recorder = Recorder::default();
        let chain = recording_chain(&recorder, Some(3));
        let mut msg = Message::default();

        let err = chain.do_intercept(&mut msg).unwrap_err();
        assert!(err.is_fault());
        assert_eq!(chain.state(), RunState::Aborted);

        // Forward ran 1..=3; cleanup covers exactly {2, 1}, in that order —
        // never the thrower, never the untried 4 and 5.
        assert_eq!(recorder.handled(), ["i1", "i2", "i3"]);
        assert_eq!(recorder.faulted(), ["i2", "i1"]);
    }

    #[test]
    fn test_fault_at_first_interceptor_unwinds_nothing() {
        let recorder = Recorder::default();
        let chain = recording_chain(&recorder, Some(1));
        let mut msg = Message::default();

        chain.do_intercept(&mut msg).unwrap_err();
        assert_eq!(recorder.handled(), ["i1"]);
        assert!(recorder.faulted().is_empty());
    }

    #[test]
    fn test_fault_error_carries_operation_description() {
        let exchange = Arc::new(Exchange::new());
        exchange.set_service_name("LedgerService");
        exchange.set_operation_name("postEntry");

        let recorder = Recorder::default();
        let chain = recording_chain(&recorder, Some(2));
        let mut msg = Message::new(exchange);

        let err = chain.do_intercept(&mut msg).unwrap_err();
        assert!(err.to_string().contains("LedgerService#postEntry"));
    }

    #[test]
    fn test_handle_fault_failure_aborts_unwind_early() {
        let recorder = Recorder::default();
        let mut chain = PhaseChain::new(registry());

        let faulted = recorder.faulted.clone();
        chain.add(Arc::new(
            FnInterceptor::new("a", "read", |_| Outcome::Continue).on_fault(move |_| {
                faulted.lock().push("a".to_string());
                Ok(())
            }),
        ));
        chain.add(Arc::new(
            FnInterceptor::new("b", "read", |_| Outcome::Continue)
                .on_fault(|_| Err(anyhow::anyhow!("cleanup failed"))),
        ));
        chain.add(Arc::new(FnInterceptor::new("c", "validate", |_| {
            Outcome::fault(anyhow::anyhow!("boom"))
        })));

        let mut msg = Message::default();
        let err = chain.do_intercept(&mut msg).unwrap_err();
        assert!(matches!(err, ChainError::UnwindFailed { .. }));
        assert!(err.to_string().contains('b'));

        // "a" never got cleaned up: the unwind stopped at "b".
        assert!(recorder.faulted().is_empty());
        assert_eq!(chain.state(), RunState::Aborted);
    }

    struct CountingObserver {
        calls: AtomicUsize,
        saw_fault: AtomicUsize,
    }

    impl CountingObserver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                saw_fault: AtomicUsize::new(0),
            })
        }
    }

    impl MessageObserver for CountingObserver {
        fn on_message(&self, message: &mut Message) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if message.fault().is_some() {
                self.saw_fault.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_fault_observer_receives_faulted_message() {
        let observer = CountingObserver::new();
        let recorder = Recorder::default();
        let mut chain = recording_chain(&recorder, Some(2));
        chain.set_fault_observer(observer.clone());

        let mut msg = Message::default();
        chain.do_intercept(&mut msg).unwrap_err();

        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
        // The causing error was still parked on the message during dispatch
        assert_eq!(observer.saw_fault.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_one_way_exchange_suppresses_observer() {
        let observer = CountingObserver::new();
        let recorder = Recorder::default();
        let mut chain = recording_chain(&recorder, Some(2));
        chain.set_fault_observer(observer.clone());

        let exchange = Arc::new(Exchange::new());
        exchange.set_one_way(true);
        let mut msg = Message::new(exchange);

        chain.do_intercept(&mut msg).unwrap_err();
        assert_eq!(observer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_robust_one_way_still_dispatches() {
        let observer = CountingObserver::new();
        let recorder = Recorder::default();
        let mut chain = recording_chain(&recorder, Some(2));
        chain.set_fault_observer(observer.clone());

        let exchange = Arc::new(Exchange::new());
        exchange.set_one_way(true);
        exchange.set_robust_one_way(true);
        let mut msg = Message::new(exchange);

        chain.do_intercept(&mut msg).unwrap_err();
        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
    }

    struct MutingListener {
        consulted: AtomicUsize,
    }

    impl phalanx_core::FaultListener for MutingListener {
        fn fault_occurred(
            &self,
            _error: &anyhow::Error,
            description: Option<&str>,
            _message: &Message,
        ) -> bool {
            assert_eq!(description, Some("Svc#op"));
            self.consulted.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    #[test]
    fn test_fault_listener_is_consulted_once() {
        let listener = Arc::new(MutingListener {
            consulted: AtomicUsize::new(0),
        });
        let recorder = Recorder::default();
        let mut chain = recording_chain(&recorder, Some(2));
        chain.set_fault_listener(listener.clone());

        let exchange = Arc::new(Exchange::new());
        exchange.set_service_name("Svc");
        exchange.set_operation_name("op");
        let mut msg = Message::new(exchange);

        chain.do_intercept(&mut msg).unwrap_err();
        assert_eq!(listener.consulted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_suspend_pauses_and_resume_reruns_same_interceptor() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut chain = PhaseChain::new(registry());
        chain.add(noop("before", "read"));

        let attempts2 = attempts.clone();
        chain.add(Arc::new(FnInterceptor::new("gate", "validate", move |_| {
            // First attempt suspends; the retry continues.
            if attempts2.fetch_add(1, Ordering::SeqCst) == 0 {
                Outcome::Suspend
            } else {
                Outcome::Continue
            }
        })));
        chain.add(noop("after", "invoke"));

        let mut msg = Message::default();
        assert!(!chain.do_intercept(&mut msg).unwrap());
        assert_eq!(chain.state(), RunState::Paused);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        assert!(chain.resume(&mut msg).unwrap());
        assert_eq!(chain.state(), RunState::Complete);
        // "gate" ran again on resume
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_resume_from_next_skips_the_suspender() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut chain = PhaseChain::new(registry());

        let attempts2 = attempts.clone();
        chain.add(Arc::new(FnInterceptor::new("gate", "read", move |_| {
            attempts2.fetch_add(1, Ordering::SeqCst);
            Outcome::Suspend
        })));
        chain.add(noop("after", "invoke"));

        let mut msg = Message::default();
        msg.put_property(RESUME_FROM_NEXT, true);

        assert!(!chain.do_intercept(&mut msg).unwrap());
        assert!(chain.resume(&mut msg).unwrap());
        // "gate" was not re-run
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unpause_does_not_reenter_the_loop() {
        let mut chain = PhaseChain::new(registry());
        chain.add(Arc::new(FnInterceptor::new("gate", "read", |_| {
            Outcome::Suspend
        })));

        let mut msg = Message::default();
        chain.do_intercept(&mut msg).unwrap();
        assert_eq!(chain.state(), RunState::Paused);

        chain.unpause();
        assert_eq!(chain.state(), RunState::Executing);
    }

    #[test]
    fn test_unpause_leaves_suspended_chain_alone() {
        let chain = PhaseChain::new(registry());
        chain.suspend();

        chain.unpause();
        assert_eq!(chain.state(), RunState::Suspended);
    }

    #[test]
    fn test_suspend_then_resume() {
        let mut chain = PhaseChain::new(registry());
        chain.add(Arc::new(FnInterceptor::new("gate", "read", |_| {
            Outcome::Suspend
        })));
        chain.add(noop("after", "invoke"));

        let mut msg = Message::default();
        msg.put_property(RESUME_FROM_NEXT, true);
        chain.do_intercept(&mut msg).unwrap();

        // Caller detaches the chain entirely
        chain.suspend();
        assert_eq!(chain.state(), RunState::Suspended);

        assert!(chain.resume(&mut msg).unwrap());
        assert_eq!(chain.state(), RunState::Complete);
    }

    #[test]
    fn test_abort_stops_resumption() {
        let mut chain = PhaseChain::new(registry());
        chain.add(Arc::new(FnInterceptor::new("gate", "read", |_| {
            Outcome::Suspend
        })));

        let mut msg = Message::default();
        chain.do_intercept(&mut msg).unwrap();

        chain.abort();
        assert_eq!(chain.state(), RunState::Aborted);
        assert!(!chain.resume(&mut msg).unwrap());
        assert_eq!(chain.state(), RunState::Aborted);
    }

    #[test]
    fn test_resume_from_complete_is_a_noop() {
        let chain = PhaseChain::new(registry());
        let mut msg = Message::default();
        chain.do_intercept(&mut msg).unwrap();

        assert!(chain.resume(&mut msg).unwrap());
        assert_eq!(chain.state(), RunState::Complete);
    }

    #[test]
    fn test_reset_after_complete_allows_rerun() {
        let recorder = Recorder::default();
        let chain = recording_chain(&recorder, None);
        let mut msg = Message::default();

        assert!(chain.do_intercept(&mut msg).unwrap());
        chain.reset();
        assert_eq!(chain.state(), RunState::Executing);

        assert!(chain.do_intercept(&mut msg).unwrap());
        assert_eq!(recorder.handled().len(), 10);
    }

    #[test]
    fn test_reset_preserves_non_complete_state() {
        let mut chain = PhaseChain::new(registry());
        chain.add(Arc::new(FnInterceptor::new("gate", "read", |_| {
            Outcome::Suspend
        })));
        let mut msg = Message::default();
        chain.do_intercept(&mut msg).unwrap();
        assert_eq!(chain.state(), RunState::Paused);

        chain.reset();
        assert_eq!(chain.state(), RunState::Paused);
    }

    #[test]
    fn test_starting_after_skips_through_id() {
        let recorder = Recorder::default();
        let chain = recording_chain(&recorder, None);
        let mut msg = Message::default();

        assert!(chain.do_intercept_starting_after(&mut msg, "i3").unwrap());
        assert_eq!(recorder.handled(), ["i4", "i5"]);
    }

    #[test]
    fn test_starting_at_includes_id() {
        let recorder = Recorder::default();
        let chain = recording_chain(&recorder, None);
        let mut msg = Message::default();

        assert!(chain.do_intercept_starting_at(&mut msg, "i3").unwrap());
        assert_eq!(recorder.handled(), ["i3", "i4", "i5"]);
    }

    #[test]
    fn test_starting_after_unknown_id_exhausts_chain() {
        let recorder = Recorder::default();
        let chain = recording_chain(&recorder, None);
        let mut msg = Message::default();

        assert!(chain.do_intercept_starting_after(&mut msg, "nope").unwrap());
        assert!(recorder.handled().is_empty());
        assert_eq!(chain.state(), RunState::Complete);
    }

    #[test]
    fn test_nested_invocation_reports_fault_once() {
        let recorder = Recorder::default();
        let observer = CountingObserver::new();
        let slot: Arc<OnceLock<Weak<PhaseChain>>> = Arc::new(OnceLock::new());

        let mut chain = PhaseChain::new(registry());
        let handled = recorder.handled.clone();
        let faulted_a = recorder.faulted.clone();
        chain.add(Arc::new(
            FnInterceptor::new("a", "read", move |_| {
                handled.lock().push("a".to_string());
                Outcome::Continue
            })
            .on_fault(move |_| {
                faulted_a.lock().push("a".to_string());
                Ok(())
            }),
        ));

        // "b" re-enters the chain with a nested message; the fault raised
        // by "c" surfaces inside the nested run first.
        let slot2 = Arc::clone(&slot);
        let faulted_b = recorder.faulted.clone();
        chain.add(Arc::new(
            FnInterceptor::new("b", "validate", move |outer| {
                let chain = slot2.get().and_then(Weak::upgrade).expect("chain alive");
                let outer_id = outer.id();

                let mut nested = Message::default();
                let nested_result = chain.do_intercept(&mut nested);
                assert!(nested_result.is_err());

                // Scoped restore: after the nested run, the chain's current
                // message is the outer one again.
                assert_eq!(chain.current_message_id(), Some(outer_id));

                Outcome::fault(nested_result.unwrap_err())
            })
            .on_fault(move |_| {
                faulted_b.lock().push("b".to_string());
                Ok(())
            }),
        ));

        chain.add(Arc::new(FnInterceptor::new("c", "invoke", |_| {
            Outcome::fault(anyhow::anyhow!("inner failure"))
        })));
        chain.set_fault_observer(observer.clone());

        let chain = Arc::new(chain);
        slot.set(Arc::downgrade(&chain)).ok();

        let mut msg = Message::default();
        let err = chain.do_intercept(&mut msg).unwrap_err();
        assert!(err.is_fault());

        // The unwind and observer dispatch ran exactly once, for the
        // nested fault; the outer frame saw the per-run flag and skipped.
        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.faulted(), ["b", "a"]);
    }

    #[test]
    fn test_swap_current_message_allowed_for_designated_invoker() {
        let slot: Arc<OnceLock<Weak<PhaseChain>>> = Arc::new(OnceLock::new());
        let swapped = Arc::new(AtomicUsize::new(0));

        let mut chain = PhaseChain::new(registry());
        let slot2 = Arc::clone(&slot);
        let swapped2 = swapped.clone();
        chain.add(Arc::new(FnInterceptor::new("invoker", "invoke", move |_| {
            let chain = slot2.get().and_then(Weak::upgrade).expect("chain alive");
            let replacement = MessageId::new();
            chain
                .swap_current_message("invoker", replacement)
                .expect("designated invoker may swap");
            assert_eq!(chain.current_message_id(), Some(replacement));
            swapped2.fetch_add(1, Ordering::SeqCst);
            Outcome::Continue
        })));
        chain.set_service_invoker("invoker");

        let chain = Arc::new(chain);
        slot.set(Arc::downgrade(&chain)).ok();

        let mut msg = Message::default();
        assert!(chain.do_intercept(&mut msg).unwrap());
        assert_eq!(swapped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invoker_swap_survives_nested_invocation() {
        let slot: Arc<OnceLock<Weak<PhaseChain>>> = Arc::new(OnceLock::new());
        let swapped = Arc::new(AtomicUsize::new(0));

        let mut chain = PhaseChain::new(registry());
        let slot2 = Arc::clone(&slot);
        let swapped2 = swapped.clone();
        chain.add(Arc::new(FnInterceptor::new("invoker", "invoke", move |msg| {
            let chain = slot2.get().and_then(Weak::upgrade).expect("chain alive");
            chain
                .swap_current_message("invoker", msg.id())
                .expect("designated invoker may swap");

            let mut nested = Message::default();
            chain.do_intercept(&mut nested).expect("nested run");

            // The nested frame restored this frame's executing record, so
            // the invoker is still permitted to redirect the message.
            chain
                .swap_current_message("invoker", MessageId::new())
                .expect("swap after nested run");
            swapped2.fetch_add(1, Ordering::SeqCst);
            Outcome::Continue
        })));
        chain.set_service_invoker("invoker");

        let chain = Arc::new(chain);
        slot.set(Arc::downgrade(&chain)).ok();

        let mut msg = Message::default();
        assert!(chain.do_intercept(&mut msg).unwrap());
        assert_eq!(swapped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_swap_current_message_rejected_for_other_interceptors() {
        let slot: Arc<OnceLock<Weak<PhaseChain>>> = Arc::new(OnceLock::new());

        let mut chain = PhaseChain::new(registry());
        let slot2 = Arc::clone(&slot);
        chain.add(Arc::new(FnInterceptor::new("rogue", "read", move |_| {
            let chain = slot2.get().and_then(Weak::upgrade).expect("chain alive");
            let err = chain
                .swap_current_message("rogue", MessageId::new())
                .unwrap_err();
            assert!(matches!(err, ChainError::IllegalState { .. }));
            Outcome::Continue
        })));
        chain.set_service_invoker("invoker");

        let chain = Arc::new(chain);
        slot.set(Arc::downgrade(&chain)).ok();

        let mut msg = Message::default();
        assert!(chain.do_intercept(&mut msg).unwrap());
    }

    #[test]
    fn test_swap_current_message_rejected_outside_execution() {
        let mut chain = PhaseChain::new(registry());
        chain.set_service_invoker("invoker");
        let err = chain
            .swap_current_message("invoker", MessageId::new())
            .unwrap_err();
        assert!(matches!(err, ChainError::IllegalState { .. }));
    }

    #[test]
    fn test_current_message_cleared_after_run() {
        let chain = PhaseChain::new(registry());
        let mut msg = Message::default();
        chain.do_intercept(&mut msg).unwrap();
        assert!(chain.current_message_id().is_none());
    }

    #[test]
    fn test_clone_runs_independently_of_in_flight_template() {
        let mut template = PhaseChain::new(registry());
        template.add(Arc::new(FnInterceptor::new("gate", "read", |_| {
            Outcome::Suspend
        })));
        template.add(noop("tail", "invoke"));

        // Template pauses mid-flight
        let mut paused_msg = Message::default();
        assert!(!template.do_intercept(&mut paused_msg).unwrap());
        assert_eq!(template.state(), RunState::Paused);

        // A clone starts fresh: its own state and cursor
        let clone = template.clone_chain();
        assert_eq!(clone.state(), RunState::Executing);
        let mut msg = Message::default();
        msg.put_property(RESUME_FROM_NEXT, true);
        assert!(!clone.do_intercept(&mut msg).unwrap());
        assert!(clone.resume(&mut msg).unwrap());

        // Template still paused where it was
        assert_eq!(template.state(), RunState::Paused);
    }
}
