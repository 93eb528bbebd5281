//! # Phalanx
//!
//! **Phase-Ordered Interceptor Chain Framework**
//!
//! Phalanx is a constraint-based message-processing pipeline:
//!
//! - **Named Phases** – Interceptors are grouped into ordered phases
//!   (`receive`, `unmarshal`, `invoke`, ...) defined by a registry
//! - **Peer Constraints** – Within a phase, `before`/`after` constraints on
//!   interceptor ids resolve to a deterministic traversal order
//! - **Suspendable Execution** – A running chain can pause, suspend, and
//!   resume at interceptor boundaries without losing its position
//! - **Fault Unwinding** – When an interceptor faults, the chain walks back
//!   over the interceptors that already completed so each can clean up
//! - **Clone-per-Message** – Chains clone cheaply from a resolved template,
//!   sharing interceptors and dropping run state
//!
//! ## Quick Start
//!
//! ```rust
//! use phalanx::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(PhaseRegistry::inbound());
//! let mut chain = PhaseChain::new(registry);
//! chain.add(Arc::new(FnInterceptor::new(
//!     "auth",
//!     phalanx::chain::phase::names::READ,
//!     |_msg| Outcome::Continue,
//! )));
//!
//! let mut message = Message::default();
//! assert!(chain.do_intercept(&mut message).unwrap());
//! ```

#![doc(html_root_url = "https://docs.rs/phalanx/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use phalanx_core as core;

// Re-export chain types
pub use phalanx_chain as chain;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use phalanx::prelude::*;
/// ```
pub mod prelude {
    pub use phalanx_core::{
        ChainError, ChainResult, Exchange, FaultListener, Message, MessageId, MessageObserver,
    };

    pub use phalanx_chain::{
        FnInterceptor, Interceptor, Outcome, Phase, PhaseChain, PhaseRegistry, RunState,
    };
}
