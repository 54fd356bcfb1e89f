//! Per-counterparty conversation buckets for the local user.
//!
//! Every client shares one topic, so the router is the only thing standing
//! between the local user and other people's traffic: envelopes that do not
//! name the local user on either end never reach a bucket or a listener.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use stride_types::Envelope;

/// Callback invoked once per new envelope.
pub type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// What `dispatch` did with an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { counterparty: String },
    /// The id was already seen; first-seen wins.
    Duplicate,
    /// Neither end is the local user.
    NotAddressed,
    /// The router was closed.
    Closed,
}

#[derive(Clone)]
pub struct ConversationRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    local_user: String,

    /// `true` while open. Held for reading during delivery so `close`
    /// can wait out in-flight listener calls.
    gate: RwLock<bool>,

    state: Mutex<RouterState>,

    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
}

#[derive(Default)]
struct RouterState {
    seen: HashSet<String>,
    /// counterparty -> envelopes in arrival order
    conversations: HashMap<String, Vec<Envelope>>,
}

impl ConversationRouter {
    pub fn new(local_user: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                local_user: local_user.into(),
                gate: RwLock::new(true),
                state: Mutex::new(RouterState::default()),
                listeners: RwLock::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn local_user(&self) -> &str {
        &self.inner.local_user
    }

    /// File an envelope under its counterparty and notify listeners.
    ///
    /// Safe to call from inside a listener.
    pub fn dispatch(&self, envelope: Envelope) -> DispatchOutcome {
        let gate = self.inner.gate.read_recursive();
        if !*gate {
            return DispatchOutcome::Closed;
        }

        let Some(counterparty) = envelope.counterparty(&self.inner.local_user).map(str::to_owned) else {
            trace!("dropping envelope {} not addressed to {}", envelope.id(), self.inner.local_user);
            return DispatchOutcome::NotAddressed;
        };

        {
            let mut state = self.inner.state.lock();
            if !state.seen.insert(envelope.id().to_string()) {
                trace!("duplicate envelope {}", envelope.id());
                return DispatchOutcome::Duplicate;
            }
            state
                .conversations
                .entry(counterparty.clone())
                .or_default()
                .push(envelope.clone());
        }

        // Snapshot so listeners may subscribe/unsubscribe while running.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        debug!(
            "envelope {} filed under {} ({} listeners)",
            envelope.id(),
            counterparty,
            listeners.len()
        );
        for listener in listeners {
            listener(&envelope);
        }

        drop(gate);
        DispatchOutcome::Delivered { counterparty }
    }

    /// Register a callback for every new envelope involving the local user.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Envelopes exchanged with `counterparty`, in arrival order.
    pub fn get_conversation(&self, counterparty: &str) -> Vec<Envelope> {
        self.inner
            .state
            .lock()
            .conversations
            .get(counterparty)
            .cloned()
            .unwrap_or_default()
    }

    pub fn counterparties(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.state.lock().conversations.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop delivering. Waits for in-flight listener calls to finish; once it
    /// returns no listener runs again.
    ///
    /// Must not be called from inside a listener.
    pub fn close(&self) {
        *self.inner.gate.write() = false;
    }

    pub fn is_closed(&self) -> bool {
        !*self.inner.gate.read_recursive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn env(id: &str, sender: &str, receiver: &str, content: &str) -> Envelope {
        Envelope::new(id, 1, sender, receiver, content)
    }

    fn counting(router: &ConversationRouter) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        router.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn files_by_counterparty_from_either_direction() {
        let router = ConversationRouter::new("u1");
        router.dispatch(env("a", "u1", "u2", "out"));
        router.dispatch(env("b", "u2", "u1", "in"));
        router.dispatch(env("c", "u3", "u1", "other"));

        let convo: Vec<_> = router.get_conversation("u2").iter().map(|e| e.id().to_string()).collect();
        assert_eq!(convo, vec!["a", "b"]);
        assert_eq!(router.get_conversation("u3").len(), 1);
        assert_eq!(router.counterparties(), vec!["u2", "u3"]);
    }

    #[test]
    fn duplicate_id_is_delivered_once() {
        let router = ConversationRouter::new("u1");
        let count = counting(&router);

        let first = router.dispatch(env("a", "u2", "u1", "hi"));
        let second = router.dispatch(env("a", "u2", "u1", "hi"));

        assert_eq!(first, DispatchOutcome::Delivered { counterparty: "u2".into() });
        assert_eq!(second, DispatchOutcome::Duplicate);
        assert_eq!(router.get_conversation("u2").len(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_seen_wins_on_conflicting_content() {
        let router = ConversationRouter::new("u1");
        router.dispatch(env("a", "u2", "u1", "first"));
        router.dispatch(env("a", "u2", "u1", "second"));

        let convo = router.get_conversation("u2");
        assert_eq!(convo.len(), 1);
        assert_eq!(convo[0].content(), "first");
    }

    #[test]
    fn foreign_envelopes_never_leak() {
        let router = ConversationRouter::new("C");
        let count = counting(&router);

        let outcome = router.dispatch(env("x", "A", "B", "secret"));

        assert_eq!(outcome, DispatchOutcome::NotAddressed);
        assert!(router.get_conversation("A").is_empty());
        assert!(router.get_conversation("B").is_empty());
        assert!(router.counterparties().is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_counterparty_is_empty() {
        let router = ConversationRouter::new("u1");
        assert!(router.get_conversation("nobody").is_empty());
    }

    #[test]
    fn keeps_arrival_order_not_timestamp_order() {
        let router = ConversationRouter::new("u1");
        router.dispatch(Envelope::new("late", 200, "u2", "u1", "second"));
        router.dispatch(Envelope::new("early", 100, "u2", "u1", "first"));

        let ids: Vec<_> = router.get_conversation("u2").iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["late", "early"]);
    }

    #[test]
    fn listener_may_dispatch_reentrantly() {
        let router = ConversationRouter::new("u1");
        let inner = router.clone();
        router.subscribe(move |e| {
            if e.id() == "a" {
                // Auto-reply from inside delivery, plus a duplicate of the original.
                inner.dispatch(env("a-reply", "u1", "u2", "got it"));
                inner.dispatch(e.clone());
            }
        });
        let count = counting(&router);

        router.dispatch(env("a", "u2", "u1", "ping"));

        let ids: Vec<_> = router.get_conversation("u2").iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "a-reply"]);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let router = ConversationRouter::new("u1");
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = router.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        router.dispatch(env("a", "u2", "u1", "one"));
        assert!(router.unsubscribe(id));
        assert!(!router.unsubscribe(id));
        router.dispatch(env("b", "u2", "u1", "two"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_router_drops_everything() {
        let router = ConversationRouter::new("u1");
        let count = counting(&router);
        router.close();

        assert!(router.is_closed());
        assert_eq!(router.dispatch(env("a", "u2", "u1", "late")), DispatchOutcome::Closed);
        assert!(router.get_conversation("u2").is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_duplicates_deliver_once() {
        let router = ConversationRouter::new("u1");
        let count = counting(&router);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = router.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        r.dispatch(env(&format!("m{}", i), "u2", "u1", "x"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(router.get_conversation("u2").len(), 50);
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }
}
