//! Bidirectional cursor over the stitched sequence.
//!
//! The cursor is the sole mechanism by which the engine walks the chain,
//! forward during execution and backward during unwind. Its position is the
//! index of the last node it yielded going forward; `None` means the cursor
//! sits before the first node. It is lazily anchored: the start of the
//! sequence is looked up from the phase-bucket heads on demand, so a cursor
//! created before any interceptor was added still starts correctly.
//!
//! One cursor belongs to one in-flight execution — it lives inside the
//! chain's locked exec state and is never handed to concurrent walkers.

use crate::chain::PhaseChain;

/// Resettable bidirectional position over a chain's node sequence.
#[derive(Debug, Default)]
pub(crate) struct Cursor {
    /// Index of the last node yielded by `next`; `None` = before the first.
    pos: Option<usize>,
}

impl Cursor {
    /// Returns `true` if a forward step would yield a node.
    pub(crate) fn has_next(&self, chain: &PhaseChain) -> bool {
        self.peek_next(chain).is_some()
    }

    /// Advances over the next node and returns its index.
    pub(crate) fn next(&mut self, chain: &PhaseChain) -> Option<usize> {
        let next = self.peek_next(chain);
        if next.is_some() {
            self.pos = next;
        }
        next
    }

    /// Returns `true` if a backward step would yield a node.
    pub(crate) fn has_previous(&self) -> bool {
        self.pos.is_some()
    }

    /// Yields the most recently consumed node and steps back over it, so
    /// the following `next` re-yields it.
    pub(crate) fn previous(&mut self, chain: &PhaseChain) -> Option<usize> {
        let current = self.pos;
        self.pos = current.and_then(|i| chain.node(i).prev);
        current
    }

    /// Returns to the position before the first node, independent of
    /// current state.
    pub(crate) fn reset(&mut self) {
        self.pos = None;
    }

    fn peek_next(&self, chain: &PhaseChain) -> Option<usize> {
        match self.pos {
            None => chain.first_node(),
            Some(i) => chain.node(i).next,
        }
    }
}
