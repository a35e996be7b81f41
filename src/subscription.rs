use std::sync::Weak;

use crate::hooks::ListenerKind;

/// Identifier of a listener within one promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

/// Implemented by whatever holds listeners; lets a [`Subscription`] stay
/// independent of the promise's value type.
pub(crate) trait Unsubscribe: Send + Sync {
    fn remove(&self, id: SubscriptionId, kind: ListenerKind) -> bool;
}

/// Handle to a registered consumer.
///
/// A subscription does not keep its promise alive. Unsubscribing is
/// idempotent; removing the last subscriber of a pending promise aborts it.
#[derive(Clone)]
pub struct Subscription {
    registry: Option<Weak<dyn Unsubscribe>>,
    id: SubscriptionId,
    kind: ListenerKind,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("noop", &self.is_noop())
            .finish()
    }
}

impl Subscription {
    pub(crate) fn new(
        registry: Weak<dyn Unsubscribe>,
        id: SubscriptionId,
        kind: ListenerKind,
    ) -> Self {
        Self {
            registry: Some(registry),
            id,
            kind,
        }
    }

    /// Handed out when the consumer already ran synchronously.
    pub fn noop() -> Self {
        Self {
            registry: None,
            id: SubscriptionId(0),
            kind: ListenerKind::Subscriber,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    pub fn is_noop(&self) -> bool {
        self.registry.is_none()
    }

    /// Removes the consumer. Returns true if this call removed it.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.as_ref().and_then(Weak::upgrade) {
            Some(registry) => registry.remove(self.id, self.kind),
            None => false,
        }
    }
}
