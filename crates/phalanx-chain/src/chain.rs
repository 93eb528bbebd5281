//! Chain structure: per-phase doubly linked lists stitched into one
//! sequence.
//!
//! The chain owns an arena of nodes indexed by stable integers; `prev`/`next`
//! are navigation indices, not ownership edges. Two parallel arrays indexed
//! by phase ordinal — `heads` and `tails` — give O(1) access to the first and
//! last node of each phase, so insertion never scans the whole chain.
//!
//! Within a phase, insertion resolves `before`/`after` constraints with a
//! **single linear scan** that finds only the first node the newcomer must
//! precede and the last it must follow. This is deliberately not a
//! topological sort: contradictory or cyclic constraint sets do not error,
//! they just produce a placement that may not satisfy every pairwise
//! constraint. Callers must avoid contradictory constraints.

use crate::engine::ExecState;
use crate::interceptor::{Interceptor, BEFORE_ALL};
use crate::phase::PhaseRegistry;
use parking_lot::Mutex;
use phalanx_core::{FaultListener, MessageObserver};
use std::sync::Arc;

/// One slot in the chain's node arena.
pub(crate) struct ChainNode {
    pub(crate) interceptor: Arc<dyn Interceptor>,
    pub(crate) phase: usize,
    pub(crate) prev: Option<usize>,
    pub(crate) next: Option<usize>,
}

/// A phase-ordered interceptor chain.
///
/// Built once from a [`PhaseRegistry`] and a set of interceptors, then
/// usually cloned per in-flight message with [`PhaseChain::clone_chain`].
/// Structural mutation ([`add`], [`remove`]) happens during construction; the
/// execution surface ([`do_intercept`] and the state-machine operations)
/// takes `&self` and is internally locked.
///
/// # Example
///
/// ```
/// use phalanx_chain::{FnInterceptor, Outcome, PhaseChain, PhaseRegistry};
/// use phalanx_core::Message;
/// use std::sync::Arc;
///
/// let registry = Arc::new(PhaseRegistry::new(["read", "invoke"]));
/// let mut chain = PhaseChain::new(registry);
/// chain.add(Arc::new(FnInterceptor::new("reader", "read", |_| Outcome::Continue)));
/// chain.add(Arc::new(FnInterceptor::new("invoker", "invoke", |_| Outcome::Continue)));
///
/// let mut msg = Message::default();
/// assert!(chain.do_intercept(&mut msg).unwrap());
/// ```
///
/// [`add`]: PhaseChain::add
/// [`remove`]: PhaseChain::remove
/// [`do_intercept`]: PhaseChain::do_intercept
pub struct PhaseChain {
    pub(crate) registry: Arc<PhaseRegistry>,
    /// Node arena; `None` marks a removed slot.
    pub(crate) nodes: Vec<Option<ChainNode>>,
    /// First node of each phase, by ordinal.
    pub(crate) heads: Vec<Option<usize>>,
    /// Last node of each phase, by ordinal.
    pub(crate) tails: Vec<Option<usize>>,
    /// Whether a phase has ever received an interceptor with an `after`
    /// constraint; decides whether insertions into it need the constraint
    /// scan.
    pub(crate) has_afters: Vec<bool>,
    /// Run state, cursor, and in-flight bookkeeping, guarded by one mutex.
    pub(crate) exec: Mutex<ExecState>,
    pub(crate) fault_observer: Option<Arc<dyn MessageObserver>>,
    pub(crate) fault_listener: Option<Arc<dyn FaultListener>>,
    /// Id of the interceptor permitted to redirect the current message.
    pub(crate) service_invoker: Option<String>,
}

impl PhaseChain {
    /// Creates an empty chain over the given phase registry.
    #[must_use]
    pub fn new(registry: Arc<PhaseRegistry>) -> Self {
        let len = registry.len();
        Self {
            registry,
            nodes: Vec::new(),
            heads: vec![None; len],
            tails: vec![None; len],
            has_afters: vec![false; len],
            exec: Mutex::new(ExecState::new()),
            fault_observer: None,
            fault_listener: None,
            service_invoker: None,
        }
    }

    /// Builds a chain from a registry and a set of interceptors.
    #[must_use]
    pub fn build_chain<I>(registry: Arc<PhaseRegistry>, interceptors: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Interceptor>>,
    {
        let mut chain = Self::new(registry);
        for interceptor in interceptors {
            chain.add(interceptor);
        }
        chain
    }

    /// Returns the phase registry this chain was built over.
    #[must_use]
    pub fn registry(&self) -> &Arc<PhaseRegistry> {
        &self.registry
    }

    /// Adds an interceptor, rejecting duplicates by id.
    ///
    /// Equivalent to [`PhaseChain::add_forced`] with `force = false`.
    pub fn add(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.add_forced(interceptor, false);
    }

    /// Adds an interceptor to the chain.
    ///
    /// The interceptor's phase is resolved against the registry; an unknown
    /// phase is a recoverable configuration issue — the interceptor is
    /// skipped with a logged warning, not an error. A duplicate id is
    /// likewise skipped as a no-op unless `force` is set.
    ///
    /// Any [`additional_interceptors`] the interceptor declares are inserted
    /// recursively with the same `force` flag.
    ///
    /// [`additional_interceptors`]: Interceptor::additional_interceptors
    pub fn add_forced(&mut self, interceptor: Arc<dyn Interceptor>, force: bool) {
        let Some(phase) = self.registry.ordinal_of(interceptor.phase()) else {
            tracing::warn!(
                id = interceptor.id().unwrap_or("<anonymous>"),
                phase = interceptor.phase(),
                "Skipping interceptor: phase does not specify a valid phase in the registry"
            );
            return;
        };
        let extras = interceptor.additional_interceptors();
        self.insert_interceptor(phase, interceptor, force);
        for extra in extras {
            self.add_forced(extra, force);
        }
    }

    fn insert_interceptor(&mut self, phase: usize, interceptor: Arc<dyn Interceptor>, force: bool) {
        if self.heads[phase].is_none() {
            self.insert_into_empty_phase(phase, interceptor);
            return;
        }

        let id = interceptor.id().map(str::to_owned);
        let mut first_before: Option<usize> = None;
        let mut last_after: Option<usize> = None;

        if self.has_afters[phase] || !interceptor.before().is_empty() {
            let before = interceptor.before();
            let after = interceptor.after();
            let end = self.node(self.tails[phase].expect("non-empty phase has a tail")).next;
            let mut cur = self.heads[phase];
            while cur != end {
                let i = cur.expect("phase nodes are linked through the tail");
                let cmp = self.node(i);
                if let Some(cmp_id) = cmp.interceptor.id() {
                    if !force && id.as_deref() == Some(cmp_id) {
                        tracing::debug!(id = cmp_id, "Skipping duplicate interceptor");
                        return;
                    }
                    let targets_new = |ids: &[String]| {
                        id.as_deref().is_some_and(|id| ids.iter().any(|c| c == id))
                    };
                    if first_before.is_none()
                        && (before.iter().any(|b| b == cmp_id) || targets_new(cmp.interceptor.after()))
                    {
                        first_before = Some(i);
                    }
                    if after.iter().any(|a| a == cmp_id) || targets_new(cmp.interceptor.before()) {
                        last_after = Some(i);
                    }
                }
                cur = cmp.next;
            }
            if last_after.is_none() && before.iter().any(|b| b == BEFORE_ALL) {
                first_before = self.heads[phase];
            }
        } else if !force {
            // Fast path: nothing in this phase constrains ordering yet, so a
            // plain append is correct. Only duplicates need checking.
            if let Some(id) = id.as_deref() {
                let end = self.node(self.tails[phase].expect("non-empty phase has a tail")).next;
                let mut cur = self.heads[phase];
                while cur != end {
                    let i = cur.expect("phase nodes are linked through the tail");
                    let cmp = self.node(i);
                    if cmp.interceptor.id() == Some(id) {
                        tracing::debug!(id, "Skipping duplicate interceptor");
                        return;
                    }
                    cur = cmp.next;
                }
            }
        }

        self.has_afters[phase] = self.has_afters[phase] || !interceptor.after().is_empty();

        let idx = self.alloc(ChainNode {
            interceptor,
            phase,
            prev: None,
            next: None,
        });
        match first_before {
            Some(b) => {
                self.link_before(idx, b);
                if self.heads[phase] == Some(b) {
                    self.heads[phase] = Some(idx);
                }
            }
            None => {
                let tail = self.tails[phase].expect("non-empty phase has a tail");
                self.link_after(idx, tail);
                self.tails[phase] = Some(idx);
            }
        }
    }

    /// Makes the node the sole occupant of its phase and stitches it into
    /// the overall sequence.
    fn insert_into_empty_phase(&mut self, phase: usize, interceptor: Arc<dyn Interceptor>) {
        let has_afters = !interceptor.after().is_empty();
        let idx = self.alloc(ChainNode {
            interceptor,
            phase,
            prev: None,
            next: None,
        });

        // Attach after the tail of the nearest non-empty earlier phase, or
        // failing that, before the head of the nearest non-empty later phase.
        let earlier = (0..phase).rev().find(|&p| self.tails[p].is_some());
        if let Some(p) = earlier {
            let tail = self.tails[p].expect("found phase is non-empty");
            self.link_after(idx, tail);
        } else if let Some(p) = (phase + 1..self.heads.len()).find(|&p| self.heads[p].is_some()) {
            let head = self.heads[p].expect("found phase is non-empty");
            self.link_before(idx, head);
        }

        self.heads[phase] = Some(idx);
        self.tails[phase] = Some(idx);
        self.has_afters[phase] = has_afters;
    }

    /// Removes the interceptor with the given id.
    ///
    /// Intended for chain-construction time and for clones before execution
    /// begins; removal does not adjust an in-flight cursor. Returns `true`
    /// if a node was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(idx) = self.position_of(id) else {
            return false;
        };
        let (phase, prev, next) = {
            let node = self.node(idx);
            (node.phase, node.prev, node.next)
        };

        if let Some(p) = prev {
            self.node_mut(p).next = next;
        }
        if let Some(n) = next {
            self.node_mut(n).prev = prev;
        }
        if self.heads[phase] == Some(idx) {
            // Successor is still within the phase only if it exists and
            // shares the ordinal.
            self.heads[phase] = next.filter(|&n| self.node(n).phase == phase);
        }
        if self.tails[phase] == Some(idx) {
            self.tails[phase] = prev.filter(|&p| self.node(p).phase == phase);
        }
        self.nodes[idx] = None;
        true
    }

    /// Registers the observer that receives faulted messages for outward
    /// dispatch.
    pub fn set_fault_observer(&mut self, observer: Arc<dyn MessageObserver>) {
        self.fault_observer = Some(observer);
    }

    /// Registers the listener consulted before default fault logging.
    pub fn set_fault_listener(&mut self, listener: Arc<dyn FaultListener>) {
        self.fault_listener = Some(listener);
    }

    /// Designates the interceptor permitted to redirect the chain's current
    /// message (see [`PhaseChain::swap_current_message`]).
    pub fn set_service_invoker(&mut self, id: impl Into<String>) {
        self.service_invoker = Some(id.into());
    }

    /// Produces an independent, structurally copied chain.
    ///
    /// Nodes are newly allocated in a single linear pass preserving relative
    /// order; they reference the *same* interceptor instances as this chain.
    /// The clone starts with its own fresh run state and cursor, so one
    /// configured template can back any number of concurrent in-flight
    /// messages.
    #[must_use]
    pub fn clone_chain(&self) -> Self {
        let mut clone = Self::new(Arc::clone(&self.registry));
        clone.has_afters = self.has_afters.clone();
        clone.fault_observer = self.fault_observer.clone();
        clone.fault_listener = self.fault_listener.clone();
        clone.service_invoker = self.service_invoker.clone();

        let mut prev: Option<usize> = None;
        let mut cur = self.first_node();
        while let Some(i) = cur {
            let node = self.node(i);
            let idx = clone.nodes.len();
            clone.nodes.push(Some(ChainNode {
                interceptor: Arc::clone(&node.interceptor),
                phase: node.phase,
                prev,
                next: None,
            }));
            if let Some(p) = prev {
                clone.node_mut(p).next = Some(idx);
            }
            if clone.heads[node.phase].is_none() {
                clone.heads[node.phase] = Some(idx);
            }
            clone.tails[node.phase] = Some(idx);
            prev = Some(idx);
            cur = node.next;
        }
        clone
    }

    /// Iterates the interceptors in chain order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Interceptor>> {
        ChainIter {
            chain: self,
            cur: self.first_node(),
        }
    }

    /// Returns the number of interceptors in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if the chain has no interceptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first_node().is_none()
    }

    // ---- arena plumbing -------------------------------------------------

    pub(crate) fn node(&self, idx: usize) -> &ChainNode {
        self.nodes[idx].as_ref().expect("live node index")
    }

    fn node_mut(&mut self, idx: usize) -> &mut ChainNode {
        self.nodes[idx].as_mut().expect("live node index")
    }

    /// First node of the overall sequence: head of the first non-empty
    /// phase.
    pub(crate) fn first_node(&self) -> Option<usize> {
        self.heads.iter().find_map(|h| *h)
    }

    /// Diagnostic label for a node: its id, or its phase for anonymous
    /// interceptors.
    pub(crate) fn node_label(&self, idx: usize) -> String {
        let node = self.node(idx);
        match node.interceptor.id() {
            Some(id) => id.to_string(),
            None => format!(
                "<anonymous@{}>",
                self.registry.name_of(node.phase).unwrap_or("?")
            ),
        }
    }

    fn alloc(&mut self, node: ChainNode) -> usize {
        match self.nodes.iter().position(Option::is_none) {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    /// Splices `idx` immediately before `anchor` in the overall sequence.
    fn link_before(&mut self, idx: usize, anchor: usize) {
        let prev = self.node(anchor).prev;
        {
            let node = self.node_mut(idx);
            node.prev = prev;
            node.next = Some(anchor);
        }
        self.node_mut(anchor).prev = Some(idx);
        if let Some(p) = prev {
            self.node_mut(p).next = Some(idx);
        }
    }

    /// Splices `idx` immediately after `anchor` in the overall sequence.
    fn link_after(&mut self, idx: usize, anchor: usize) {
        let next = self.node(anchor).next;
        {
            let node = self.node_mut(idx);
            node.prev = Some(anchor);
            node.next = next;
        }
        self.node_mut(anchor).next = Some(idx);
        if let Some(n) = next {
            self.node_mut(n).prev = Some(idx);
        }
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        let mut cur = self.first_node();
        while let Some(i) = cur {
            let node = self.node(i);
            if node.interceptor.id() == Some(id) {
                return Some(i);
            }
            cur = node.next;
        }
        None
    }
}

struct ChainIter<'a> {
    chain: &'a PhaseChain,
    cur: Option<usize>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Arc<dyn Interceptor>;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.cur?;
        let node = self.chain.node(i);
        self.cur = node.next;
        Some(&node.interceptor)
    }
}

impl std::fmt::Display for PhaseChain {
    /// Phase-ordered dump of the chain for diagnostics.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Phase-ordered interceptor chain ({:?}):", self.state())?;
        let mut cur = self.first_node();
        let mut current_phase = None;
        while let Some(i) = cur {
            let node = self.node(i);
            if current_phase != Some(node.phase) {
                current_phase = Some(node.phase);
                writeln!(f, "  {}:", self.registry.name_of(node.phase).unwrap_or("?"))?;
            }
            writeln!(f, "    {}", self.node_label(i))?;
            cur = node.next;
        }
        Ok(())
    }
}

/// Builds a chain from a registry and a set of interceptors.
///
/// Free-function spelling of [`PhaseChain::build_chain`].
#[must_use]
pub fn build_chain<I>(registry: Arc<PhaseRegistry>, interceptors: I) -> PhaseChain
where
    I: IntoIterator<Item = Arc<dyn Interceptor>>,
{
    PhaseChain::build_chain(registry, interceptors)
}
