//! Voice ownership registry
//!
//! Records which sound layer currently owns which voice. Layers hold a
//! [`BindingKey`] rather than being reachable from the voice, so a
//! notification for a voice can only ever touch the binding it was
//! registered under. Removing the binding (unregistering) before tearing a
//! voice down makes every later notification for that voice a no-op.
//!
//! The registry lives inside the pool state and is only touched with the
//! pool mutex held.

use std::collections::HashMap;

use slotmap::{new_key_type, SlotMap};

use crate::audio::backend::{VoiceEvent, VoiceId};

new_key_type! {
    /// A layer's registration for one voice
    pub struct BindingKey;
}

/// How a voice left its layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEnd {
    /// Playback finished or was stopped; the layer rewinds its offset
    Stopped,
    /// The voice was dropped (evicted, pruned or released by the backend)
    Released,
}

/// What a layer finds when it checks its binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Voice is still owned by the layer
    Live(VoiceId),
    /// Voice is gone; the binding has been consumed
    Ended(VoiceEnd),
}

#[derive(Debug)]
struct Binding {
    voice: VoiceId,
    ended: Option<VoiceEnd>,
}

/// Voice → layer bindings
#[derive(Debug, Default)]
pub(crate) struct CallbackRegistry {
    bindings: SlotMap<BindingKey, Binding>,
    owners: HashMap<VoiceId, BindingKey>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layer as the owner of `voice`
    pub fn register(&mut self, voice: VoiceId) -> BindingKey {
        let key = self.bindings.insert(Binding { voice, ended: None });
        if let Some(previous) = self.owners.insert(voice, key) {
            // A voice has a single owner; the old binding is treated as released
            if let Some(binding) = self.bindings.get_mut(previous) {
                binding.ended.get_or_insert(VoiceEnd::Released);
            }
        }
        key
    }

    /// Drop a binding. Returns the voice if it was still live.
    pub fn unregister(&mut self, key: BindingKey) -> Option<VoiceId> {
        let binding = self.bindings.remove(key)?;
        if binding.ended.is_some() {
            return None;
        }
        if self.owners.get(&binding.voice) == Some(&key) {
            self.owners.remove(&binding.voice);
        }
        Some(binding.voice)
    }

    /// Check a binding, consuming it if its voice has ended
    pub fn poll(&mut self, key: BindingKey) -> BindingState {
        match self.bindings.get(key) {
            Some(Binding { voice, ended: None }) => BindingState::Live(*voice),
            Some(Binding { ended: Some(end), .. }) => {
                let end = *end;
                self.bindings.remove(key);
                BindingState::Ended(end)
            }
            None => BindingState::Ended(VoiceEnd::Released),
        }
    }

    /// Live voice of a binding, without consuming anything
    pub fn peek(&self, key: BindingKey) -> Option<VoiceId> {
        self.bindings
            .get(key)
            .filter(|binding| binding.ended.is_none())
            .map(|binding| binding.voice)
    }

    /// Mark the owner of `voice` (if any) as ended
    pub fn detach(&mut self, voice: VoiceId, end: VoiceEnd) -> bool {
        let Some(key) = self.owners.remove(&voice) else {
            return false;
        };
        match self.bindings.get_mut(key) {
            Some(binding) => {
                binding.ended.get_or_insert(end);
                true
            }
            None => false,
        }
    }

    /// Apply a backend notification
    pub fn dispatch(&mut self, event: VoiceEvent) -> bool {
        match event {
            VoiceEvent::Stopped(voice) => self.detach(voice, VoiceEnd::Stopped),
            VoiceEvent::Released(voice) => self.detach(voice, VoiceEnd::Released),
        }
    }

    /// Mark every owned voice as released
    pub fn detach_all(&mut self) {
        for (_, key) in self.owners.drain() {
            if let Some(binding) = self.bindings.get_mut(key) {
                binding.ended.get_or_insert(VoiceEnd::Released);
            }
        }
    }

    /// Number of voices currently owned by a layer
    pub fn owned_count(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voices(n: usize) -> Vec<VoiceId> {
        let mut ids: SlotMap<VoiceId, ()> = SlotMap::with_key();
        (0..n).map(|_| ids.insert(())).collect()
    }

    #[test]
    fn test_register_and_poll() {
        let v = voices(1)[0];
        let mut registry = CallbackRegistry::new();
        let key = registry.register(v);

        assert_eq!(registry.poll(key), BindingState::Live(v));
        assert_eq!(registry.peek(key), Some(v));
        assert_eq!(registry.owned_count(), 1);
    }

    #[test]
    fn test_stop_event_ends_binding_once() {
        let v = voices(1)[0];
        let mut registry = CallbackRegistry::new();
        let key = registry.register(v);

        assert!(registry.dispatch(VoiceEvent::Stopped(v)));
        assert_eq!(registry.peek(key), None);
        assert_eq!(registry.poll(key), BindingState::Ended(VoiceEnd::Stopped));
        // Consumed: later polls report a plain release
        assert_eq!(registry.poll(key), BindingState::Ended(VoiceEnd::Released));
    }

    #[test]
    fn test_first_end_wins() {
        let v = voices(1)[0];
        let mut registry = CallbackRegistry::new();
        let key = registry.register(v);

        registry.dispatch(VoiceEvent::Stopped(v));
        registry.dispatch(VoiceEvent::Released(v));
        assert_eq!(registry.poll(key), BindingState::Ended(VoiceEnd::Stopped));
    }

    #[test]
    fn test_unregister_silences_later_events() {
        let v = voices(1)[0];
        let mut registry = CallbackRegistry::new();
        let key = registry.register(v);

        assert_eq!(registry.unregister(key), Some(v));
        assert!(!registry.dispatch(VoiceEvent::Stopped(v)));
        assert!(!registry.dispatch(VoiceEvent::Released(v)));
        assert_eq!(registry.owned_count(), 0);
    }

    #[test]
    fn test_unregister_after_end_returns_none() {
        let v = voices(1)[0];
        let mut registry = CallbackRegistry::new();
        let key = registry.register(v);

        registry.detach(v, VoiceEnd::Released);
        assert_eq!(registry.unregister(key), None);
    }

    #[test]
    fn test_events_for_other_voices_ignored() {
        let ids = voices(2);
        let mut registry = CallbackRegistry::new();
        let key = registry.register(ids[0]);

        assert!(!registry.dispatch(VoiceEvent::Stopped(ids[1])));
        assert_eq!(registry.poll(key), BindingState::Live(ids[0]));
    }

    #[test]
    fn test_detach_all() {
        let ids = voices(3);
        let mut registry = CallbackRegistry::new();
        let keys: Vec<_> = ids.iter().map(|&v| registry.register(v)).collect();

        registry.detach_all();
        assert_eq!(registry.owned_count(), 0);
        for key in keys {
            assert_eq!(registry.poll(key), BindingState::Ended(VoiceEnd::Released));
        }
    }
}
