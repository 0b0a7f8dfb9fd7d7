// model = "claude-opus-4-5"
// created = 2026-02-03
// modified = 2026-02-03
// driver = "Isaac Clayton"

//! Event surface: an explicit observer registry.
//!
//! Two events fire:
//!
//! - `valueChanged` after every effective set or delete, carrying the key
//!   and the displaced value. This includes the restore step of a remote
//!   clear reconciled against pending local writes.
//! - `clear` after every effective clear of the whole store.
//!
//! Both carry a `local` flag: whether the change originated on this
//! replica. Listeners are owned closures; subscribing returns an id that
//! deregisters the listener later. Listeners run synchronously after the
//! store has been mutated and must not call back into the kernel.

use super::value::LocalValue;

/// Handle returned by a subscription, used to unsubscribe.
pub type ListenerId = u64;

/// Payload of the `valueChanged` event.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueChanged {
    /// The key that changed.
    pub key: String,
    /// The value the change displaced, if the key was present.
    pub previous: Option<LocalValue>,
}

type ValueChangedFn = Box<dyn FnMut(&ValueChanged, bool)>;
type ClearFn = Box<dyn FnMut(bool)>;

/// Observer lists for the map events.
#[derive(Default)]
pub struct EventRegistry {
    next: ListenerId,
    value_changed: Vec<(ListenerId, ValueChangedFn)>,
    cleared: Vec<(ListenerId, ClearFn)>,
}

impl EventRegistry {
    /// Create a registry with no listeners.
    pub fn new() -> EventRegistry {
        return EventRegistry::default();
    }

    /// Subscribe to `valueChanged`.
    pub fn on_value_changed(
        &mut self,
        listener: impl FnMut(&ValueChanged, bool) + 'static,
    ) -> ListenerId {
        let id = self.next;
        self.next += 1;
        self.value_changed.push((id, Box::new(listener)));
        return id;
    }

    /// Subscribe to `clear`.
    pub fn on_clear(&mut self, listener: impl FnMut(bool) + 'static) -> ListenerId {
        let id = self.next;
        self.next += 1;
        self.cleared.push((id, Box::new(listener)));
        return id;
    }

    /// Drop a listener. Returns whether the id was registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.value_changed.len() + self.cleared.len();
        self.value_changed.retain(|(lid, _)| *lid != id);
        self.cleared.retain(|(lid, _)| *lid != id);
        return self.value_changed.len() + self.cleared.len() != before;
    }

    /// Fire `valueChanged`.
    pub fn emit_value_changed(&mut self, event: &ValueChanged, local: bool) {
        for (_, listener) in &mut self.value_changed {
            listener(event, local);
        }
    }

    /// Fire `clear`.
    pub fn emit_clear(&mut self, local: bool) {
        for (_, listener) in &mut self.cleared {
            listener(local);
        }
    }
}
