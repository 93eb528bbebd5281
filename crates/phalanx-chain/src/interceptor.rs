//! The interceptor trait and its handle outcome.
//!
//! An [`Interceptor`] is a unit of pipeline work with a forward operation
//! ([`handle`]) and a reverse/cleanup operation ([`handle_fault`]). It
//! declares its target phase by name and, optionally, an identifier plus
//! sets of peer ids it must run before/after *within that phase*.
//!
//! Suspension is modeled as a returned [`Outcome`] tag rather than a
//! control-flow exception: an interceptor that cannot complete synchronously
//! returns [`Outcome::Suspend`] and the engine pauses the chain so a later
//! `resume` re-executes from the same point.
//!
//! [`handle`]: Interceptor::handle
//! [`handle_fault`]: Interceptor::handle_fault

use phalanx_core::Message;
use std::sync::Arc;

/// Wildcard `before` constraint: run at the very front of the phase.
pub const BEFORE_ALL: &str = "*";

/// The result of one interceptor's forward processing.
#[derive(Debug)]
pub enum Outcome {
    /// Processing succeeded; the chain advances to the next interceptor.
    Continue,
    /// Processing cannot complete synchronously. The chain pauses; a later
    /// `resume` re-executes this interceptor (unless the message carries the
    /// [`RESUME_FROM_NEXT`] flag).
    ///
    /// [`RESUME_FROM_NEXT`]: phalanx_core::RESUME_FROM_NEXT
    Suspend,
    /// Processing failed. The chain unwinds over the already-executed
    /// interceptors and aborts.
    Fault(anyhow::Error),
}

impl Outcome {
    /// Shorthand for building a fault outcome from any error.
    #[must_use]
    pub fn fault(error: impl Into<anyhow::Error>) -> Self {
        Self::Fault(error.into())
    }
}

/// A unit of pipeline work.
///
/// Interceptor instances are shared between a chain template and all of its
/// clones, so implementations must be stateless with respect to chain
/// structure (or internally thread-safe). Per-message state belongs on the
/// [`Message`], not on the interceptor.
pub trait Interceptor: Send + Sync {
    /// The interceptor's identity, used for duplicate detection and as the
    /// target of peer `before`/`after` constraints.
    ///
    /// An interceptor without an id cannot be constraint-targeted by others
    /// and is exempt from duplicate detection.
    fn id(&self) -> Option<&str> {
        None
    }

    /// The name of the phase this interceptor runs in.
    fn phase(&self) -> &str;

    /// Ids of same-phase peers this interceptor must run before.
    ///
    /// The wildcard [`BEFORE_ALL`] means "front of the phase". Constraints
    /// naming peers not present in the chain are ignored.
    fn before(&self) -> &[String] {
        &[]
    }

    /// Ids of same-phase peers this interceptor must run after.
    fn after(&self) -> &[String] {
        &[]
    }

    /// Forward processing.
    fn handle(&self, message: &mut Message) -> Outcome;

    /// Reverse/cleanup processing, invoked during unwind after a later
    /// interceptor faulted.
    ///
    /// An error returned here aborts the unwind early: cleanup is
    /// best-effort, not transactional.
    fn handle_fault(&self, message: &mut Message) -> Result<(), anyhow::Error> {
        let _ = message;
        Ok(())
    }

    /// Dependent interceptors this one requires, inserted recursively at
    /// the time this interceptor is added to a chain.
    fn additional_interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        Vec::new()
    }
}

/// Closure-and-builder based [`Interceptor`] implementation.
///
/// The workhorse for tests and for simple interceptors that do not warrant
/// a dedicated type.
///
/// # Example
///
/// ```
/// use phalanx_chain::{FnInterceptor, Outcome};
///
/// let validate = FnInterceptor::new("validate-headers", "read", |msg| {
///     if msg.has_property("headers") {
///         Outcome::Continue
///     } else {
///         Outcome::fault(anyhow::anyhow!("no headers"))
///     }
/// })
/// .before(["read-body"]);
///
/// use phalanx_chain::Interceptor;
/// assert_eq!(validate.id(), Some("validate-headers"));
/// assert_eq!(validate.phase(), "read");
/// ```
pub struct FnInterceptor {
    id: Option<String>,
    phase: String,
    before: Vec<String>,
    after: Vec<String>,
    handle: HandleFn,
    handle_fault: Option<FaultFn>,
    additional: Vec<Arc<dyn Interceptor>>,
}

type HandleFn = Box<dyn Fn(&mut Message) -> Outcome + Send + Sync>;
type FaultFn = Box<dyn Fn(&mut Message) -> Result<(), anyhow::Error> + Send + Sync>;

impl FnInterceptor {
    /// Creates an interceptor with an id, a target phase, and a forward
    /// closure.
    #[must_use]
    pub fn new<F>(id: impl Into<String>, phase: impl Into<String>, handle: F) -> Self
    where
        F: Fn(&mut Message) -> Outcome + Send + Sync + 'static,
    {
        Self {
            id: Some(id.into()),
            phase: phase.into(),
            before: Vec::new(),
            after: Vec::new(),
            handle: Box::new(handle),
            handle_fault: None,
            additional: Vec::new(),
        }
    }

    /// Creates an interceptor without an id.
    ///
    /// Anonymous interceptors cannot be constraint-targeted and are exempt
    /// from duplicate detection.
    #[must_use]
    pub fn anonymous<F>(phase: impl Into<String>, handle: F) -> Self
    where
        F: Fn(&mut Message) -> Outcome + Send + Sync + 'static,
    {
        Self {
            id: None,
            phase: phase.into(),
            before: Vec::new(),
            after: Vec::new(),
            handle: Box::new(handle),
            handle_fault: None,
            additional: Vec::new(),
        }
    }

    /// Declares same-phase peers this interceptor must run before.
    #[must_use]
    pub fn before<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.before.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Declares that this interceptor runs at the very front of its phase.
    #[must_use]
    pub fn before_all(mut self) -> Self {
        self.before.push(BEFORE_ALL.to_string());
        self
    }

    /// Declares same-phase peers this interceptor must run after.
    #[must_use]
    pub fn after<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Sets the cleanup closure invoked during unwind.
    #[must_use]
    pub fn on_fault<F>(mut self, handle_fault: F) -> Self
    where
        F: Fn(&mut Message) -> Result<(), anyhow::Error> + Send + Sync + 'static,
    {
        self.handle_fault = Some(Box::new(handle_fault));
        self
    }

    /// Adds a dependent interceptor to insert alongside this one.
    #[must_use]
    pub fn with_additional(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.additional.push(interceptor);
        self
    }
}

impl Interceptor for FnInterceptor {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn phase(&self) -> &str {
        &self.phase
    }

    fn before(&self) -> &[String] {
        &self.before
    }

    fn after(&self) -> &[String] {
        &self.after
    }

    fn handle(&self, message: &mut Message) -> Outcome {
        (self.handle)(message)
    }

    fn handle_fault(&self, message: &mut Message) -> Result<(), anyhow::Error> {
        match &self.handle_fault {
            Some(f) => f(message),
            None => Ok(()),
        }
    }

    fn additional_interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        self.additional.clone()
    }
}

impl std::fmt::Debug for FnInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInterceptor")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("before", &self.before)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}
