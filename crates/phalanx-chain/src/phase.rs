//! Phases: the coarse ordering domain of a chain.
//!
//! A [`PhaseRegistry`] is an ordered, named partition of the pipeline, fixed
//! at chain-construction time. Interceptors name their target phase; their
//! `before`/`after` constraints refine ordering *within* that phase, while
//! ordering *between* phases is governed solely by phase ordinals.

use std::collections::HashMap;

/// Standard phase names.
///
/// These are conventions, not requirements — a [`PhaseRegistry`] accepts any
/// ordered list of names. The [`PhaseRegistry::inbound`] and
/// [`PhaseRegistry::outbound`] constructors assemble the standard pipelines
/// from these constants.
pub mod names {
    /// Transport has produced the raw message.
    pub const RECEIVE: &str = "receive";
    /// Stream-level processing before user stream interceptors.
    pub const PRE_STREAM: &str = "pre_stream";
    /// User-supplied stream interceptors.
    pub const USER_STREAM: &str = "user_stream";
    /// Stream-level processing after user stream interceptors.
    pub const POST_STREAM: &str = "post_stream";
    /// Header/envelope reading.
    pub const READ: &str = "read";
    /// Protocol processing before user protocol interceptors.
    pub const PRE_PROTOCOL: &str = "pre_protocol";
    /// User-supplied protocol interceptors.
    pub const USER_PROTOCOL: &str = "user_protocol";
    /// Protocol processing after user protocol interceptors.
    pub const POST_PROTOCOL: &str = "post_protocol";
    /// Payload unmarshaling.
    pub const UNMARSHAL: &str = "unmarshal";
    /// Logical processing before user logical interceptors.
    pub const PRE_LOGICAL: &str = "pre_logical";
    /// User-supplied logical interceptors.
    pub const USER_LOGICAL: &str = "user_logical";
    /// Logical processing after user logical interceptors.
    pub const POST_LOGICAL: &str = "post_logical";
    /// Final preparation before service invocation.
    pub const PRE_INVOKE: &str = "pre_invoke";
    /// Service invocation.
    pub const INVOKE: &str = "invoke";
    /// Processing after service invocation.
    pub const POST_INVOKE: &str = "post_invoke";

    /// Outbound chain setup.
    pub const SETUP: &str = "setup";
    /// Preparation for sending (conduit selection, addressing).
    pub const PREPARE_SEND: &str = "prepare_send";
    /// Envelope writing.
    pub const WRITE: &str = "write";
    /// Payload marshaling.
    pub const MARSHAL: &str = "marshal";
    /// Hand-off to the transport.
    pub const SEND: &str = "send";
}

/// A named, totally ordered partition of the pipeline.
///
/// Immutable once its registry is built. Ordinals are strictly increasing
/// and define the total order between phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    name: String,
    ordinal: usize,
}

impl Phase {
    /// Returns this phase's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns this phase's ordinal within its registry.
    #[must_use]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

impl PartialOrd for Phase {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Phase {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ordinal.cmp(&other.ordinal)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.ordinal)
    }
}

/// An ordered set of phases, fixed at construction time.
///
/// # Example
///
/// ```
/// use phalanx_chain::PhaseRegistry;
///
/// let registry = PhaseRegistry::new(["read", "validate", "invoke"]);
/// assert_eq!(registry.len(), 3);
/// assert_eq!(registry.ordinal_of("validate"), Some(1));
/// assert_eq!(registry.name_of(2), Some("invoke"));
/// assert!(registry.ordinal_of("marshal").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct PhaseRegistry {
    phases: Vec<Phase>,
    by_name: HashMap<String, usize>,
}

impl PhaseRegistry {
    /// Builds a registry from an ordered list of phase names.
    ///
    /// Ordinals are assigned by position. A repeated name keeps its first
    /// ordinal; the duplicate entry is dropped with a warning.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut phases = Vec::new();
        let mut by_name = HashMap::new();
        for name in names {
            let name = name.into();
            if by_name.contains_key(&name) {
                tracing::warn!(phase = %name, "Dropping duplicate phase name from registry");
                continue;
            }
            let ordinal = phases.len();
            by_name.insert(name.clone(), ordinal);
            phases.push(Phase { name, ordinal });
        }
        Self { phases, by_name }
    }

    /// The standard inbound pipeline: receive through post-invoke.
    #[must_use]
    pub fn inbound() -> Self {
        Self::new([
            names::RECEIVE,
            names::PRE_STREAM,
            names::USER_STREAM,
            names::POST_STREAM,
            names::READ,
            names::PRE_PROTOCOL,
            names::USER_PROTOCOL,
            names::POST_PROTOCOL,
            names::UNMARSHAL,
            names::PRE_LOGICAL,
            names::USER_LOGICAL,
            names::POST_LOGICAL,
            names::PRE_INVOKE,
            names::INVOKE,
            names::POST_INVOKE,
        ])
    }

    /// The standard outbound pipeline: setup through send.
    #[must_use]
    pub fn outbound() -> Self {
        Self::new([
            names::SETUP,
            names::PRE_LOGICAL,
            names::USER_LOGICAL,
            names::POST_LOGICAL,
            names::PREPARE_SEND,
            names::PRE_STREAM,
            names::PRE_PROTOCOL,
            names::WRITE,
            names::MARSHAL,
            names::USER_PROTOCOL,
            names::POST_PROTOCOL,
            names::USER_STREAM,
            names::POST_STREAM,
            names::SEND,
        ])
    }

    /// Resolves a phase name to its ordinal.
    #[must_use]
    pub fn ordinal_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Resolves an ordinal back to its phase name.
    #[must_use]
    pub fn name_of(&self, ordinal: usize) -> Option<&str> {
        self.phases.get(ordinal).map(Phase::name)
    }

    /// Returns the number of phases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Returns `true` if the registry has no phases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Iterates the phases in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = &Phase> {
        self.phases.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_follow_position() {
        let registry = PhaseRegistry::new(["a", "b", "c"]);
        assert_eq!(registry.ordinal_of("a"), Some(0));
        assert_eq!(registry.ordinal_of("b"), Some(1));
        assert_eq!(registry.ordinal_of("c"), Some(2));
        assert_eq!(registry.name_of(1), Some("b"));
        assert!(registry.name_of(3).is_none());
    }

    #[test]
    fn test_duplicate_name_keeps_first_ordinal() {
        let registry = PhaseRegistry::new(["a", "b", "a"]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ordinal_of("a"), Some(0));
    }

    #[test]
    fn test_phase_order_is_total() {
        let registry = PhaseRegistry::new(["a", "b"]);
        let phases: Vec<_> = registry.iter().collect();
        assert!(phases[0] < phases[1]);
    }

    #[test]
    fn test_standard_registries() {
        let inbound = PhaseRegistry::inbound();
        assert_eq!(inbound.len(), 15);
        assert!(inbound.ordinal_of(names::RECEIVE) < inbound.ordinal_of(names::INVOKE));

        let outbound = PhaseRegistry::outbound();
        assert_eq!(outbound.len(), 14);
        assert!(outbound.ordinal_of(names::MARSHAL) < outbound.ordinal_of(names::SEND));
    }
}
