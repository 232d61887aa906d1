//! Listener registry.
//!
//! Listeners are plain callbacks; the registry holds them, the caller holds
//! only an `Unsubscribe` handle. Listeners are invoked outside the registry
//! lock so a listener may subscribe or unsubscribe re-entrantly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::lifecycle::lock;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;
type ListenerList<T> = Mutex<Vec<(u64, Listener<T>)>>;

/// Callback registrations notified with `&T`.
pub struct Subscribers<T> {
    next_id: AtomicU64,
    listeners: Arc<ListenerList<T>>,
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register `listener`. It stays registered until the returned handle's
    /// `unsubscribe` is called or the registry is cleared.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, Arc::new(listener)));
        let weak: Weak<ListenerList<T>> = Arc::downgrade(&self.listeners);
        Unsubscribe {
            remove: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    lock(&listeners).retain(|(registered, _)| *registered != id);
                }
            })),
        }
    }

    /// Call every listener with `value`.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = lock(&self.listeners).iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration.
    pub fn clear(&self) {
        lock(&self.listeners).clear();
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("listeners", &lock(&self.listeners).len())
            .finish()
    }
}

/// Handle that removes one listener registration.
///
/// Dropping the handle does not unsubscribe; release is explicit.
#[must_use = "dropping the handle leaves the listener registered"]
pub struct Unsubscribe {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Unsubscribe {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_and_unsubscribe() {
        let subs: Subscribers<u32> = Subscribers::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handle = subs.subscribe(move |v| {
            counter.fetch_add(*v as usize, Ordering::SeqCst);
        });

        subs.notify(&2);
        subs.notify(&3);
        assert_eq!(seen.load(Ordering::SeqCst), 5);

        handle.unsubscribe();
        subs.notify(&10);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert!(subs.is_empty());
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let subs: Subscribers<()> = Subscribers::new();
        let handle = subs.subscribe(|_| {});
        drop(subs);
        handle.unsubscribe();
    }
}
