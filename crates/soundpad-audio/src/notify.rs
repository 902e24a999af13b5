//! Observer registry for engine events.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver};
use parking_lot::{Mutex, RwLock};
use soundpad_core::EngineEvent;
use tracing::{trace, warn};

/// Callback invoked for every published event.
pub type Listener = Arc<dyn Fn(&EngineEvent) + Send + Sync + 'static>;

/// Handle returned by [`Notifier::subscribe`], used to detach the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

/// Fire-and-forget publish/subscribe channel.
///
/// Events are delivered in the order they were queued, each one to every
/// listener before the next. Listeners run outside any lock, so a listener
/// may call back into the engine; events it causes are queued and delivered
/// after the current one. There is no backlog: a listener only sees events
/// published after it subscribed.
#[derive(Default)]
pub struct Notifier {
    listeners: RwLock<Vec<(SubscriptionToken, Listener)>>,
    next_id: AtomicU64,
    pending: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
    events: VecDeque<EngineEvent>,
    /// Set while some thread is draining `events`.
    dispatching: bool,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionToken
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let token = SubscriptionToken(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((token, Arc::new(listener)));
        token
    }

    /// Forward events into a channel instead of a callback.
    pub fn subscribe_channel(&self) -> (SubscriptionToken, Receiver<EngineEvent>) {
        let (tx, rx) = unbounded();
        let token = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (token, rx)
    }

    /// Detach a listener. Returns false if the token was unknown.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(t, _)| *t != token);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Queue `event` and deliver everything pending.
    pub fn publish(&self, event: &EngineEvent) {
        self.enqueue(event.clone());
        self.dispatch();
    }

    /// Queue `event` without delivering it.
    ///
    /// Queue order is delivery order, so a caller that enqueues while
    /// holding its own state lock gets events that match its state changes.
    pub fn enqueue(&self, event: EngineEvent) {
        self.pending.lock().events.push_back(event);
    }

    /// Deliver queued events until none are left.
    ///
    /// Only one thread delivers at a time. A call made while another
    /// delivery is in progress, including from inside a listener, returns at
    /// once and leaves its events to the thread already delivering.
    pub fn dispatch(&self) {
        {
            let mut pending = self.pending.lock();
            if pending.dispatching {
                return;
            }
            pending.dispatching = true;
        }

        loop {
            let event = {
                let mut pending = self.pending.lock();
                match pending.events.pop_front() {
                    Some(event) => event,
                    None => {
                        pending.dispatching = false;
                        return;
                    }
                }
            };
            self.deliver(&event);
        }
    }

    /// A panicking listener is logged and skipped.
    fn deliver(&self, event: &EngineEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        trace!("Publishing {event:?} to {} listeners", listeners.len());

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("Event listener panicked while handling {event:?}");
            }
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn status(active: bool) -> EngineEvent {
        EngineEvent::EngineStatusChanged { active }
    }

    #[test]
    fn test_publish_reaches_all_listeners() {
        let notifier = Notifier::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            notifier.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        notifier.publish(&status(true));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribe() {
        let notifier = Notifier::new();
        let (token, rx) = notifier.subscribe_channel();

        notifier.publish(&status(true));
        assert!(notifier.unsubscribe(token));
        assert!(!notifier.unsubscribe(token));
        notifier.publish(&status(false));

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![status(true)]);
    }

    #[test]
    fn test_no_replay_for_late_listener() {
        let notifier = Notifier::new();
        notifier.publish(&status(true));

        let (_, rx) = notifier.subscribe_channel();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let notifier = Notifier::new();
        notifier.subscribe(|_| panic!("listener bug"));
        let (_, rx) = notifier.subscribe_channel();

        notifier.publish(&status(true));
        assert_eq!(rx.try_recv().unwrap(), status(true));
    }

    #[test]
    fn test_reentrant_publish_is_delivered_after_current_event() {
        let notifier = Arc::new(Notifier::new());
        let inner = notifier.clone();
        notifier.subscribe(move |event| {
            if *event == status(true) {
                inner.publish(&status(false));
            }
        });
        let (_, rx) = notifier.subscribe_channel();

        notifier.publish(&status(true));
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![status(true), status(false)]
        );
    }

    #[test]
    fn test_enqueued_events_wait_for_dispatch() {
        let notifier = Notifier::new();
        let (_, rx) = notifier.subscribe_channel();

        notifier.enqueue(status(true));
        notifier.enqueue(status(false));
        assert!(rx.try_recv().is_err());

        notifier.dispatch();
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![status(true), status(false)]
        );
    }

    #[test]
    fn test_concurrent_publishers_keep_queue_order() {
        let notifier = Arc::new(Notifier::new());
        let (_, rx) = notifier.subscribe_channel();
        let order = Arc::new(Mutex::new(Vec::new()));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let notifier = &notifier;
                let order = &order;
                scope.spawn(move || {
                    for i in 0..100 {
                        let active = i % 2 == 0;
                        {
                            let mut order = order.lock();
                            order.push(status(active));
                            notifier.enqueue(status(active));
                        }
                        notifier.dispatch();
                    }
                });
            }
        });
        notifier.dispatch();

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), *order.lock());
    }

    #[test]
    fn test_listener_can_reenter() {
        let notifier = Arc::new(Notifier::new());
        let inner = notifier.clone();
        notifier.subscribe(move |_| {
            // Subscribing from inside a callback must not deadlock.
            inner.subscribe(|_| {});
        });

        notifier.publish(&status(true));
        assert_eq!(notifier.listener_count(), 2);
    }
}
