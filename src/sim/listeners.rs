use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, ReentrantMutex};

/// Stable identifier of a registered listener.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, derive_more::Display)]
#[display("listener#{_0}")]
pub(crate) struct ListenerId(u64);

type Callback<T> = dyn Fn(T) + Send + Sync;

/// One registered callback plus its liveness flag.
///
/// The flag is cleared when the listener is removed, so a dispatch that
/// snapshotted the listener before removal skips it afterwards. The flag is
/// checked and the callback runs under `in_flight`, which
/// [`Listener::deactivate`] also takes, so a callback running on another
/// thread finishes before removal returns.
pub(crate) struct Listener<T> {
    active: AtomicBool,
    // Reentrant: a callback may remove its own listener.
    in_flight: ReentrantMutex<()>,
    callback: Box<Callback<T>>,
}

impl<T> Listener<T> {
    pub(crate) fn new<F>(callback: F) -> Arc<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Arc::new(Self {
            active: AtomicBool::new(true),
            in_flight: ReentrantMutex::new(()),
            callback: Box::new(callback),
        })
    }

    /// Delivers one event unless the listener has been removed.
    pub(crate) fn deliver(&self, event: T) {
        let _in_flight = self.in_flight.lock();
        if self.active.load(Ordering::Acquire) {
            (self.callback)(event);
        }
    }

    /// Stops deliveries and waits for one already running on another thread.
    ///
    /// Must not be called while holding a lock the callback may take; owners
    /// holding their own lock use [`Listener::retire`] instead.
    pub(crate) fn deactivate(&self) {
        self.retire();
        drop(self.in_flight.lock());
    }

    /// Stops later deliveries without waiting for a running callback.
    pub(crate) fn retire(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Ordered, index-stable listener collection.
///
/// Dispatch always works on a snapshot taken by the owner while it holds its
/// own lock, and the callbacks run after that lock is released.
pub(crate) struct ListenerSet<T> {
    next_id: u64,
    listeners: BTreeMap<ListenerId, Arc<Listener<T>>>,
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            listeners: BTreeMap::new(),
        }
    }
}

impl<T> fmt::Debug for ListenerSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.listeners.len())
            .finish()
    }
}

impl<T> ListenerSet<T> {
    pub(crate) fn insert(&mut self, listener: Arc<Listener<T>>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.insert(id, listener);
        id
    }

    /// Removes and retires a listener. Returns `false` if it was already gone.
    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        match self.listeners.remove(&id) {
            Some(listener) => {
                listener.retire();
                true
            }
            None => false,
        }
    }

    /// Removes and retires every listener.
    pub(crate) fn clear(&mut self) {
        for listener in self.listeners.values() {
            listener.retire();
        }
        self.listeners.clear();
    }

    pub(crate) fn get(&self, id: ListenerId) -> Option<Arc<Listener<T>>> {
        self.listeners.get(&id).cloned()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns the registered listeners in registration order.
    pub(crate) fn snapshot(&self) -> Dispatch<T> {
        Dispatch {
            listeners: self.listeners.values().cloned().collect(),
        }
    }
}

/// A snapshot of listeners ready to receive one event.
pub(crate) struct Dispatch<T> {
    listeners: Vec<Arc<Listener<T>>>,
}

impl<T> Dispatch<T> {
    pub(crate) fn empty() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<T: Clone> Dispatch<T> {
    /// Delivers the event to every snapshotted listener still active.
    pub(crate) fn send(self, event: T) {
        for listener in self.listeners {
            listener.deliver(event.clone());
        }
    }
}

/// Handle returned by every listener registration.
///
/// Removal is explicit and idempotent; dropping the handle leaves the
/// listener registered. Once `remove` returns, the listener receives no
/// further events, even when called from inside its own callback.
pub struct Subscription {
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new<F>(remove: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            remove: Mutex::new(Some(Box::new(remove))),
        }
    }

    /// Unregisters the listener.
    pub fn remove(&self) {
        let remove = self.remove.lock().take();
        if let Some(remove) = remove {
            remove();
        }
    }

    /// Returns whether `remove` has already been called.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.remove.lock().is_none()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("removed", &self.is_removed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    fn counting_listener(counter: &Arc<AtomicUsize>) -> Arc<Listener<u8>> {
        let counter = Arc::clone(counter);
        Listener::new(move |_event: u8| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn snapshot_preserves_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut set = ListenerSet::default();
        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            set.insert(Listener::new(move |event: u8| {
                seen.lock().push(format!("{tag}{event}"));
            }));
        }

        set.snapshot().send(1);

        assert_eq!(vec!["a1", "b1", "c1"], *seen.lock());
    }

    #[test]
    fn removed_listener_is_skipped_by_an_earlier_snapshot() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = ListenerSet::default();
        let id = set.insert(counting_listener(&counter));

        let dispatch = set.snapshot();
        assert!(set.remove(id));
        dispatch.send(7);

        assert_eq!(0, counter.load(Ordering::SeqCst));
        assert!(set.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut set = ListenerSet::default();
        let id = set.insert(counting_listener(&counter));

        assert!(set.remove(id));
        assert!(!set.remove(id));
    }

    #[test]
    fn deactivate_waits_for_a_callback_running_on_another_thread() {
        let (entered, wait_for_entry) = mpsc::channel();
        let finished = Arc::new(AtomicBool::new(false));
        let listener = {
            let finished = Arc::clone(&finished);
            Listener::new(move |_event: u8| {
                entered.send(()).expect("test should still be waiting");
                thread::sleep(Duration::from_millis(50));
                finished.store(true, Ordering::SeqCst);
            })
        };
        let delivering = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || listener.deliver(1))
        };

        wait_for_entry.recv().expect("callback should start");
        listener.deactivate();

        assert!(finished.load(Ordering::SeqCst));
        delivering.join().expect("delivering thread should finish");
    }

    #[test]
    fn listener_can_deactivate_itself_from_its_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let own: Arc<Mutex<Option<Arc<Listener<u8>>>>> = Arc::new(Mutex::new(None));
        let listener = {
            let calls = Arc::clone(&calls);
            let own = Arc::clone(&own);
            Listener::new(move |_event: u8| {
                calls.fetch_add(1, Ordering::SeqCst);
                let me = own.lock().take();
                if let Some(me) = me {
                    me.deactivate();
                }
            })
        };
        *own.lock() = Some(Arc::clone(&listener));

        listener.deliver(1);
        listener.deliver(2);

        assert_eq!(1, calls.load(Ordering::SeqCst));
        assert!(!listener.is_active());
    }

    #[test]
    fn subscription_runs_removal_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let subscription = {
            let calls = Arc::clone(&calls);
            Subscription::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        subscription.remove();
        subscription.remove();

        assert_eq!(1, calls.load(Ordering::SeqCst));
        assert!(subscription.is_removed());
    }
}
