//! Ordered listener lists.
//!
//! A [`Listeners`] list delivers each event to every registered callback in
//! registration order. Registration returns a [`ListenerHandle`]; calling
//! [`ListenerHandle::unsubscribe`] removes that one callback and leaves the
//! others in place. Dropping a handle without unsubscribing keeps the
//! callback registered.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Cancel = Box<dyn FnOnce() + Send + Sync>;

/// Cancellation handle returned by every registration.
pub struct ListenerHandle {
    cancel: Option<Cancel>,
}

impl ListenerHandle {
    /// Creates a handle that runs `cancel` when unsubscribed.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Creates a handle that does nothing when unsubscribed.
    #[must_use]
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Removes the registration.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct ListenerList<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Ordered list of callbacks for one event type.
pub struct Listeners<T> {
    inner: Arc<Mutex<ListenerList<T>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.inner.lock().entries.len())
            .finish()
    }
}

impl<T: 'static> Listeners<T> {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenerList {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Registers a callback at the end of the list.
    pub fn add<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut list = self.inner.lock();
            let id = list.next_id;
            list.next_id += 1;
            list.entries.push((id, Arc::new(callback)));
            id
        };

        let weak = Arc::downgrade(&self.inner);
        ListenerHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Delivers `value` to every callback in registration order.
    ///
    /// The list is snapshotted first, so callbacks may register or remove
    /// listeners. A panicking callback is logged and skipped.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                warn!("listener panicked; continuing with remaining listeners");
            }
        }
    }

    /// Returns the number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every callback.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Listeners<u32>) {
        (Arc::new(Mutex::new(Vec::new())), Listeners::new())
    }

    #[test]
    fn test_emit_in_registration_order() {
        let (seen, listeners) = recorder();
        for name in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            let _handle = listeners.add(move |v| seen.lock().push(format!("{name}{v}")));
        }

        listeners.emit(&1);
        assert_eq!(*seen.lock(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_listener() {
        let (seen, listeners) = recorder();
        let first = {
            let seen = Arc::clone(&seen);
            listeners.add(move |v| seen.lock().push(format!("first{v}")))
        };
        let _second = {
            let seen = Arc::clone(&seen);
            listeners.add(move |v| seen.lock().push(format!("second{v}")))
        };

        first.unsubscribe();
        listeners.emit(&2);

        assert_eq!(*seen.lock(), vec!["second2"]);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_block_siblings() {
        let (seen, listeners) = recorder();
        let _bad = listeners.add(|_| panic!("listener failure"));
        let _good = {
            let seen = Arc::clone(&seen);
            listeners.add(move |v| seen.lock().push(format!("good{v}")))
        };

        listeners.emit(&3);
        assert_eq!(*seen.lock(), vec!["good3"]);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_emit() {
        let listeners: Listeners<u32> = Listeners::new();
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0));

        let handle = {
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            listeners.add(move |_| {
                *calls.lock() += 1;
                if let Some(handle) = slot.lock().take() {
                    handle.unsubscribe();
                }
            })
        };
        *slot.lock() = Some(handle);

        listeners.emit(&1);
        listeners.emit(&2);
        assert_eq!(*calls.lock(), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_handle_outliving_list_is_harmless() {
        let listeners: Listeners<u32> = Listeners::new();
        let handle = listeners.add(|_| {});
        drop(listeners);
        handle.unsubscribe();
        ListenerHandle::noop().unsubscribe();
    }
}
