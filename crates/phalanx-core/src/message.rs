//! The message context that flows through an interceptor chain.
//!
//! A [`Message`] is deliberately opaque to the chain engine: it is a mutable
//! property bag plus a set of typed content slots, correlated with its peers
//! through an [`Exchange`]. The engine only ever reads and writes properties,
//! parks a fault, and hands the message to interceptors — what the contents
//! mean (headers, attachments, payloads) is the business of the transport and
//! marshaling layers, not of this crate.

use crate::exchange::Exchange;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Per-message flag: after a suspension, resume from the *next* interceptor
/// instead of re-running the one that suspended.
///
/// Set it with [`Message::put_property`] and a `bool` value of `true`.
pub const RESUME_FROM_NEXT: &str = "phalanx.suspend.resume.from.next";

/// A unique identifier for a [`Message`].
///
/// # Example
///
/// ```
/// use phalanx_core::MessageId;
///
/// let id = MessageId::new();
/// println!("Message ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new unique message ID using UUID v7.
    ///
    /// UUID v7 incorporates a Unix timestamp, making IDs time-ordered
    /// and suitable for correlating in-flight messages in logs.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<MessageId> for Uuid {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// The mutable context a chain drives through its interceptors.
///
/// A message carries:
///
/// - a string-keyed **property bag** of type-erased values, used by
///   interceptors to pass state along the chain;
/// - **typed content slots**, keyed by type, used to attach and retrieve the
///   (out-of-scope) content model — streams, parsed payloads, and so on;
/// - a shared reference to its [`Exchange`], which correlates the
///   request/response/fault messages of one interaction;
/// - a **fault slot** where the engine parks the causing error while the
///   chain unwinds.
///
/// # Example
///
/// ```
/// use phalanx_core::Message;
///
/// let mut msg = Message::default();
/// msg.put_property("content-length", 128_usize);
/// assert_eq!(msg.get_property::<usize>("content-length"), Some(&128));
///
/// msg.set_content(String::from("<soap:Envelope/>"));
/// assert!(msg.content::<String>().is_some());
/// ```
pub struct Message {
    /// Unique identifier for this message.
    id: MessageId,

    /// The exchange correlating this message with its peers.
    exchange: Arc<Exchange>,

    /// String-keyed, type-erased properties.
    properties: HashMap<String, Box<dyn Any + Send + Sync>>,

    /// Type-keyed content slots.
    content: HashMap<TypeId, Box<dyn Any + Send + Sync>>,

    /// The causing error, parked here by the engine during unwind.
    fault: Option<anyhow::Error>,
}

impl Message {
    /// Creates a new message bound to the given exchange.
    #[must_use]
    pub fn new(exchange: Arc<Exchange>) -> Self {
        Self {
            id: MessageId::new(),
            exchange,
            properties: HashMap::new(),
            content: HashMap::new(),
            fault: None,
        }
    }

    /// Returns this message's unique ID.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Returns the exchange this message belongs to.
    #[must_use]
    pub fn exchange(&self) -> &Arc<Exchange> {
        &self.exchange
    }

    /// Stores a property under a string key.
    ///
    /// An existing property under the same key is replaced.
    pub fn put_property<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.properties.insert(key.into(), Box::new(value));
    }

    /// Retrieves a property of the given type.
    ///
    /// Returns `None` if the key is absent or the stored value has a
    /// different type.
    #[must_use]
    pub fn get_property<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.properties.get(key).and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a property of the given type.
    pub fn remove_property<T: Send + Sync + 'static>(&mut self, key: &str) -> Option<T> {
        if self.properties.get(key).is_some_and(|v| v.is::<T>()) {
            self.properties
                .remove(key)
                .and_then(|v| v.downcast().ok())
                .map(|b| *b)
        } else {
            None
        }
    }

    /// Checks whether a property exists under the given key.
    #[must_use]
    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Reads a `bool` property, treating absence (or a non-bool value)
    /// as `false`.
    #[must_use]
    pub fn bool_property(&self, key: &str) -> bool {
        self.get_property::<bool>(key).copied().unwrap_or(false)
    }

    /// Looks up a property on this message first, falling back to the
    /// exchange's property bag.
    ///
    /// The exchange bag is shared between messages, so the value is returned
    /// by clone rather than by reference.
    #[must_use]
    pub fn contextual_property<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        if let Some(value) = self.get_property::<T>(key) {
            return Some(value.clone());
        }
        self.exchange.get_property::<T>(key)
    }

    /// Attaches typed content to this message.
    ///
    /// Content slots are keyed by type: attaching a second value of the same
    /// type replaces the first.
    pub fn set_content<T: Send + Sync + 'static>(&mut self, value: T) {
        self.content.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves typed content, if attached.
    #[must_use]
    pub fn content<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.content
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Retrieves typed content mutably, if attached.
    pub fn content_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.content
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut())
    }

    /// Removes and returns typed content.
    pub fn remove_content<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.content
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Parks the causing error on this message.
    ///
    /// The chain engine calls this before unwinding so that `handle_fault`
    /// implementations can inspect (or replace) the error.
    pub fn set_fault(&mut self, error: anyhow::Error) {
        self.fault = Some(error);
    }

    /// Returns the parked fault, if any.
    #[must_use]
    pub fn fault(&self) -> Option<&anyhow::Error> {
        self.fault.as_ref()
    }

    /// Removes and returns the parked fault.
    pub fn take_fault(&mut self) -> Option<anyhow::Error> {
        self.fault.take()
    }
}

impl Default for Message {
    /// Creates a message with a fresh, private exchange.
    fn default() -> Self {
        Self::new(Arc::new(Exchange::new()))
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("properties", &self.properties.keys())
            .field("has_fault", &self.fault.is_some())
            .finish_non_exhaustive()
    }
}
