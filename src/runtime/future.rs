//! Composable single-value futures with lane-hopping continuations

use std::sync::{Arc, Mutex};

use super::system::AsyncSystem;

type Continuation<T> = Box<dyn FnOnce(T) + Send + 'static>;

struct Slot<T> {
    value: Option<T>,
    waiter: Option<Continuation<T>>,
}

/// A handle over a value that will be produced on a designated lane.
///
/// Futures are single-consumer: each combinator consumes `self` and yields a
/// new future for the continuation's result. Combinators taking a function
/// that itself returns a [`Future`] flatten the result, so callers never see
/// nested futures. Errors are carried as values (`Future<Result<..>>`),
/// never as unwinds across the lane boundary.
pub struct Future<T: Send + 'static> {
    slot: Arc<Mutex<Slot<T>>>,
    system: AsyncSystem,
}

/// The resolving end of a [`Future`].
pub struct Promise<T: Send + 'static> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Deliver the value. If a continuation is already attached it runs on
    /// the calling thread; otherwise the value is stored for it.
    pub fn resolve(self, value: T) {
        let waiter = {
            let mut slot = self.slot.lock().unwrap();
            match slot.waiter.take() {
                Some(waiter) => Some(waiter),
                None => {
                    slot.value = Some(value);
                    return;
                }
            }
        };
        if let Some(waiter) = waiter {
            waiter(value);
        }
    }
}

impl<T: Send + 'static> Future<T> {
    pub(super) fn pending(system: &AsyncSystem) -> (Self, Promise<T>) {
        let slot = Arc::new(Mutex::new(Slot {
            value: None,
            waiter: None,
        }));
        (
            Self {
                slot: slot.clone(),
                system: system.clone(),
            },
            Promise { slot },
        )
    }

    fn attach(self, continuation: Continuation<T>) {
        let mut slot = self.slot.lock().unwrap();
        if let Some(value) = slot.value.take() {
            drop(slot);
            continuation(value);
        } else {
            slot.waiter = Some(continuation);
        }
    }

    /// Continuation runs synchronously on whichever lane delivers the value.
    pub fn then_immediate<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (future, promise) = Future::pending(&self.system);
        self.attach(Box::new(move |value| promise.resolve(f(value))));
        future
    }

    /// Continuation runs on the worker pool.
    pub fn then_in_worker<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let system = self.system.clone();
        let (future, promise) = Future::pending(&system);
        self.attach(Box::new(move |value| {
            system.spawn_worker_job(Box::new(move || promise.resolve(f(value))));
        }));
        future
    }

    /// Continuation is queued to the main lane and runs at the next pump.
    pub fn then_in_main<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let system = self.system.clone();
        let (future, promise) = Future::pending(&system);
        self.attach(Box::new(move |value| {
            system.enqueue_main_job(Box::new(move || promise.resolve(f(value))));
        }));
        future
    }

    /// Monadic bind: the continuation returns a future whose value becomes
    /// the value of the returned future.
    pub fn and_then_immediate<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        let (future, promise) = Future::pending(&self.system);
        self.attach(Box::new(move |value| {
            f(value).attach(Box::new(move |inner| promise.resolve(inner)));
        }));
        future
    }

    /// Monadic bind with the continuation running on the worker pool.
    pub fn and_then_in_worker<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        let system = self.system.clone();
        let (future, promise) = Future::pending(&system);
        self.attach(Box::new(move |value| {
            system.spawn_worker_job(Box::new(move || {
                f(value).attach(Box::new(move |inner| promise.resolve(inner)));
            }));
        }));
        future
    }

    /// Monadic bind with the continuation queued to the main lane.
    pub fn and_then_in_main<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        let system = self.system.clone();
        let (future, promise) = Future::pending(&system);
        self.attach(Box::new(move |value| {
            system.enqueue_main_job(Box::new(move || {
                f(value).attach(Box::new(move |inner| promise.resolve(inner)));
            }));
        }));
        future
    }
}
