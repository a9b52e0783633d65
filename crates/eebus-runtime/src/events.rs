//! In-process event hub.
//!
//! One hub per local device, passed by reference to whoever needs to
//! publish; there is no process-global registry. Listener callbacks are
//! user code: a panicking listener is logged and skipped, it never unwinds
//! into the router.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use tracing::warn;

/// Handle returned by [`EventHub::subscribe`]; pass it back to
/// [`EventHub::unsubscribe`] to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

type Listener<P> = Arc<dyn Fn(&P) + Send + Sync>;

/// Publish/subscribe fan-out for one payload type.
pub struct EventHub<P> {
    listeners: Mutex<Vec<(u64, Listener<P>)>>,
    next_id: Mutex<u64>,
}

impl<P> Default for EventHub<P> {
    fn default() -> Self {
        EventHub {
            listeners: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }
}

impl<P> EventHub<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&P) + Send + Sync + 'static) -> ListenerHandle {
        let mut next_id = self.next_id.lock().expect("event hub lock");
        let id = *next_id;
        *next_id += 1;

        self.listeners
            .lock()
            .expect("event hub lock")
            .push((id, Arc::new(listener)));

        ListenerHandle(id)
    }

    pub fn unsubscribe(&self, handle: ListenerHandle) {
        self.listeners
            .lock()
            .expect("event hub lock")
            .retain(|(id, _)| *id != handle.0);
    }

    /// Deliver the payload to every listener, in subscription order.
    pub fn publish(&self, payload: &P) {
        let listeners: Vec<Listener<P>> = self
            .listeners
            .lock()
            .expect("event hub lock")
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
                warn!("event listener panicked; continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delivers_to_all_listeners() {
        let hub: EventHub<u32> = EventHub::new();
        let seen = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            hub.subscribe(move |v| {
                seen.fetch_add(*v, Ordering::SeqCst);
            });
        }

        hub.publish(&5);
        assert_eq!(seen.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let hub: EventHub<u32> = EventHub::new();
        let seen = Arc::new(AtomicU32::new(0));

        let seen2 = Arc::clone(&seen);
        let handle = hub.subscribe(move |v| {
            seen2.fetch_add(*v, Ordering::SeqCst);
        });

        hub.publish(&1);
        hub.unsubscribe(handle);
        hub.publish(&1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_poison_the_hub() {
        let hub: EventHub<u32> = EventHub::new();
        let seen = Arc::new(AtomicU32::new(0));

        hub.subscribe(|_| panic!("listener bug"));
        let seen2 = Arc::clone(&seen);
        hub.subscribe(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        hub.publish(&0);
        hub.publish(&0);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
