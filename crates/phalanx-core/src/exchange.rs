//! The exchange: correlation point for the messages of one interaction.
//!
//! An [`Exchange`] ties together the request, response, and fault messages of
//! a single service interaction. It carries the interaction-scoped property
//! bag (the fallback for [`Message::contextual_property`]), the one-way
//! flags that decide whether faults are dispatched outward, and the service
//! and operation identifiers used for fault diagnostics.
//!
//! [`Message::contextual_property`]: crate::Message::contextual_property

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;

/// Correlates the in/out/fault messages of one interaction.
///
/// Exchanges are shared between messages via `Arc`, so all state lives
/// behind a mutex. Interceptors are expected to touch the exchange only
/// from the message they were handed — the lock is there for the
/// clone-per-message discipline, not for heavy cross-thread traffic.
///
/// # Example
///
/// ```
/// use phalanx_core::Exchange;
///
/// let exchange = Exchange::new();
/// exchange.set_service_name("LedgerService");
/// exchange.set_operation_name("postEntry");
/// assert_eq!(
///     exchange.describe_operation().as_deref(),
///     Some("LedgerService#postEntry")
/// );
/// ```
#[derive(Default)]
pub struct Exchange {
    inner: Mutex<ExchangeInner>,
}

#[derive(Default)]
struct ExchangeInner {
    properties: HashMap<String, Box<dyn Any + Send + Sync>>,
    one_way: bool,
    robust_one_way: bool,
    service_name: Option<String>,
    operation_name: Option<String>,
}

impl Exchange {
    /// Creates a new, empty exchange.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an exchange-scoped property under a string key.
    pub fn put_property<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.inner
            .lock()
            .properties
            .insert(key.into(), Box::new(value));
    }

    /// Retrieves an exchange-scoped property by clone.
    ///
    /// Returns `None` if the key is absent or holds a different type.
    #[must_use]
    pub fn get_property<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.inner
            .lock()
            .properties
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Removes an exchange-scoped property.
    ///
    /// Returns `true` if a property was present under the key.
    pub fn remove_property(&self, key: &str) -> bool {
        self.inner.lock().properties.remove(key).is_some()
    }

    /// Returns `true` if this is a fire-and-forget interaction.
    ///
    /// Faults on a plain one-way exchange are not dispatched to the fault
    /// observer; see [`Exchange::set_robust_one_way`] for the exception.
    #[must_use]
    pub fn is_one_way(&self) -> bool {
        self.inner.lock().one_way
    }

    /// Marks this exchange as one-way (no response expected).
    pub fn set_one_way(&self, one_way: bool) {
        self.inner.lock().one_way = one_way;
    }

    /// Returns `true` if this one-way exchange still wants fault delivery.
    #[must_use]
    pub fn is_robust_one_way(&self) -> bool {
        self.inner.lock().robust_one_way
    }

    /// Marks this exchange as robust one-way: no response expected, but
    /// faults are still dispatched outward.
    pub fn set_robust_one_way(&self, robust: bool) {
        self.inner.lock().robust_one_way = robust;
    }

    /// Returns the service name, if known.
    #[must_use]
    pub fn service_name(&self) -> Option<String> {
        self.inner.lock().service_name.clone()
    }

    /// Sets the service name used in fault diagnostics.
    pub fn set_service_name(&self, name: impl Into<String>) {
        self.inner.lock().service_name = Some(name.into());
    }

    /// Returns the operation name, if known.
    #[must_use]
    pub fn operation_name(&self) -> Option<String> {
        self.inner.lock().operation_name.clone()
    }

    /// Sets the operation name used in fault diagnostics.
    pub fn set_operation_name(&self, name: impl Into<String>) {
        self.inner.lock().operation_name = Some(name.into());
    }

    /// Builds a human-readable description of the interaction target for
    /// fault diagnostics.
    ///
    /// Returns `"{service}#{operation}"` when both are known, just the
    /// service or operation when only one is, and `None` when neither is
    /// resolvable.
    #[must_use]
    pub fn describe_operation(&self) -> Option<String> {
        let inner = self.inner.lock();
        match (&inner.service_name, &inner.operation_name) {
            (Some(service), Some(operation)) => Some(format!("{service}#{operation}")),
            (Some(service), None) => Some(service.clone()),
            (None, Some(operation)) => Some(operation.clone()),
            (None, None) => None,
        }
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Exchange")
            .field("one_way", &inner.one_way)
            .field("robust_one_way", &inner.robust_one_way)
            .field("service_name", &inner.service_name)
            .field("operation_name", &inner.operation_name)
            .finish_non_exhaustive()
    }
}
