//! Per-action message handler registry.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::ClientError;
use crate::messages::InboundMessage;
use crate::observer::ListenerHandle;

/// Result returned by message handlers.
pub type HandlerResult = anyhow::Result<()>;

type Handler = Arc<dyn Fn(&InboundMessage) -> HandlerResult + Send + Sync>;

#[derive(Default)]
struct HandlerTable {
    next_id: u64,
    handlers: HashMap<String, Vec<(u64, Handler)>>,
}

/// Outcome of dispatching one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// One [`ClientError::Handler`] per handler that returned an error or panicked.
    pub errors: Vec<ClientError>,
}

impl DispatchOutcome {
    /// Returns the number of failed handlers.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.errors.len()
    }
}

/// Maps action names to ordered handler lists.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<Mutex<HandlerTable>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("actions", &self.actions())
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `action`, after any existing handlers.
    pub fn register<F>(&self, action: impl Into<String>, handler: F) -> ListenerHandle
    where
        F: Fn(&InboundMessage) -> HandlerResult + Send + Sync + 'static,
    {
        let action = action.into();
        let id = {
            let mut table = self.inner.lock();
            let id = table.next_id;
            table.next_id += 1;
            table
                .handlers
                .entry(action.clone())
                .or_default()
                .push((id, Arc::new(handler)));
            id
        };

        let weak = Arc::downgrade(&self.inner);
        ListenerHandle::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut table = inner.lock();
            if let Some(list) = table.handlers.get_mut(&action) {
                list.retain(|(entry_id, _)| *entry_id != id);
                if list.is_empty() {
                    table.handlers.remove(&action);
                }
            }
        })
    }

    /// Delivers `message` to every handler for its action in registration order.
    ///
    /// Failing handlers are logged and do not stop delivery to the rest.
    pub fn dispatch(&self, message: &InboundMessage) -> DispatchOutcome {
        let snapshot: Vec<Handler> = match self.inner.lock().handlers.get(&message.action) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => {
                trace!(action = %message.action, "no handlers registered");
                return DispatchOutcome::default();
            }
        };

        let mut outcome = DispatchOutcome::default();
        for handler in snapshot {
            let failure = match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => {
                    outcome.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(_) => "handler panicked".to_string(),
            };

            let err = ClientError::Handler {
                action: message.action.clone(),
                message: failure,
            };
            warn!(error = %err, "message handler failed");
            outcome.errors.push(err);
        }
        outcome
    }

    /// Returns the number of handlers for `action`.
    #[must_use]
    pub fn handler_count(&self, action: &str) -> usize {
        self.inner.lock().handlers.get(action).map_or(0, Vec::len)
    }

    /// Returns the actions that have handlers.
    #[must_use]
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.inner.lock().handlers.keys().cloned().collect();
        actions.sort();
        actions
    }

    /// Removes every handler.
    pub fn clear(&self) {
        self.inner.lock().handlers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(
        registry: &HandlerRegistry,
        action: &str,
        tag: &'static str,
        seen: &Arc<Mutex<Vec<&'static str>>>,
    ) -> ListenerHandle {
        let seen = Arc::clone(seen);
        registry.register(action, move |_| {
            seen.lock().push(tag);
            Ok(())
        })
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _a = recorder(&registry, "foo", "a", &seen);
        let _b = recorder(&registry, "foo", "b", &seen);
        let _other = recorder(&registry, "bar", "x", &seen);

        let outcome = registry.dispatch(&InboundMessage::new("foo"));
        assert_eq!(outcome.delivered, 2);
        assert_eq!(outcome.failed(), 0);
        assert_eq!(*seen.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_unregister_first_keeps_second() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = recorder(&registry, "foo", "first", &seen);
        let _second = recorder(&registry, "foo", "second", &seen);

        first.unsubscribe();
        registry.dispatch(&InboundMessage::new("foo"));

        assert_eq!(*seen.lock(), vec!["second"]);
        assert_eq!(registry.handler_count("foo"), 1);
    }

    #[test]
    fn test_failing_handlers_do_not_block_siblings() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _err = registry.register("foo", |_| Err(anyhow::anyhow!("bad payload")));
        let _panic = registry.register("foo", |_| panic!("handler bug"));
        let _ok = recorder(&registry, "foo", "ok", &seen);

        let outcome = registry.dispatch(&InboundMessage::new("foo"));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(
            outcome.errors,
            vec![
                ClientError::Handler {
                    action: "foo".to_string(),
                    message: "bad payload".to_string(),
                },
                ClientError::Handler {
                    action: "foo".to_string(),
                    message: "handler panicked".to_string(),
                },
            ]
        );
        assert_eq!(*seen.lock(), vec!["ok"]);
    }

    #[test]
    fn test_unknown_action_is_ignored() {
        let registry = HandlerRegistry::new();
        let outcome = registry.dispatch(&InboundMessage::new("nobody-listens"));
        assert_eq!(outcome, DispatchOutcome::default());
    }

    #[test]
    fn test_empty_action_entry_removed() {
        let registry = HandlerRegistry::new();
        let handle = registry.register("foo", |_| Ok(()));
        assert_eq!(registry.actions(), vec!["foo".to_string()]);
        handle.unsubscribe();
        assert!(registry.actions().is_empty());
    }
}
