//! # Phalanx Chain
//!
//! Phase-ordered interceptor chain for the Phalanx framework.
//!
//! A chain is built from a [`PhaseRegistry`] — an ordered list of named
//! processing phases — plus any number of [`Interceptor`]s, each declaring
//! its phase and optional id-based `before`/`after` constraints against its
//! phase peers. The chain resolves constraints at insertion time into one
//! doubly-linked traversal order, so execution is a plain cursor walk.
//!
//! ## Execution
//!
//! ```text
//! do_intercept → [receive] → [read] → ... → [invoke] → ... → Complete
//!                                |
//!                              fault
//!                                ↓
//!            handle_fault ← handle_fault ← (reverse over executed)
//! ```
//!
//! [`PhaseChain::do_intercept`] drives a message forward through the
//! interceptors. Three things can happen at each one:
//!
//! - [`Outcome::Continue`]: the cursor advances
//! - [`Outcome::Suspend`]: the chain parks in `Paused`, to be picked up
//!   later by [`PhaseChain::resume`]
//! - [`Outcome::Fault`]: the chain unwinds backward over the interceptors
//!   that already completed, invoking `handle_fault` on each, then reports
//!   through the configured fault observer
//!
//! ## Example
//!
//! ```
//! use phalanx_chain::{FnInterceptor, Outcome, PhaseChain, PhaseRegistry};
//! use phalanx_core::Message;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(PhaseRegistry::inbound());
//! let mut chain = PhaseChain::new(registry);
//! chain.add(Arc::new(FnInterceptor::new(
//!     "logger",
//!     phalanx_chain::phase::names::RECEIVE,
//!     |_msg| Outcome::Continue,
//! )));
//!
//! let mut message = Message::default();
//! assert!(chain.do_intercept(&mut message).unwrap());
//! ```
//!
//! ## Cloning
//!
//! Chains are cheap to clone ([`PhaseChain::clone_chain`]): the resolved
//! order is copied and interceptors are shared by `Arc`, while run state
//! starts fresh. The intended pattern is one template chain per endpoint,
//! cloned per message.

#![doc(html_root_url = "https://docs.rs/phalanx-chain/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod chain;
mod cursor;
mod engine;
pub mod interceptor;
pub mod phase;

// Re-export main types at crate root
pub use chain::PhaseChain;
pub use engine::RunState;
pub use interceptor::{FnInterceptor, Interceptor, Outcome, BEFORE_ALL};
pub use phase::{Phase, PhaseRegistry};
