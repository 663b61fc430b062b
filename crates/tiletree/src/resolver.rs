//! External buffer resolution with cross-subtree deduplication.
//!
//! Several subtrees constructing at once frequently reference the same
//! external buffer. The resolver keys every fetch by `(uri, byte range)`
//! and guarantees at most one underlying fetch per key: the first
//! requester drives the fetch, later requesters wait on the same slot,
//! and everyone receives the same shared bytes (or the same error).
//!
//! A completed slot keeps its result, so a buffer requested again later
//! is served without touching the [`Fetcher`] again.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll, Waker},
};

use crate::error::{Error, Result};
use crate::fetch::{FetchFuture, Fetcher};

/// Identity of one external buffer fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub uri: String,
    pub byte_offset: u64,
    pub byte_length: u64,
}

/// Deduplicating resolver over a [`Fetcher`].
///
/// Cloning is cheap and shares the dedup state, so one resolver can be
/// handed to every subtree of a tileset.
#[derive(Debug)]
pub struct BufferResolver<F> {
    fetcher: Arc<F>,
    state: Arc<ResolverState>,
}

#[derive(Debug)]
struct ResolverState {
    slots: Mutex<HashMap<BufferKey, Slot>>,
    cancelled: AtomicBool,
}

#[derive(Debug)]
enum Slot {
    /// A fetch is being driven by one requester; the rest wait here.
    InFlight { wakers: Vec<Waker> },
    /// The fetch finished; the result is shared with all requesters.
    Done(Result<Arc<[u8]>>),
}

impl<F> Clone for BufferResolver<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            state: Arc::clone(&self.state),
        }
    }
}

impl<F: Fetcher> BufferResolver<F> {
    #[must_use]
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            state: Arc::new(ResolverState {
                slots: Mutex::new(HashMap::new()),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// The underlying fetcher.
    #[must_use]
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fail all pending and future resolutions with [`Error::Cancelled`].
    ///
    /// Pending resolutions observe the flag at their next poll; results
    /// of fetches already in flight are discarded.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        // Wake every waiter so it can observe the flag.
        let mut slots = self.state.slots.lock().unwrap();
        for slot in slots.values_mut() {
            if let Slot::InFlight { wakers } = slot {
                for waker in wakers.drain(..) {
                    waker.wake();
                }
            }
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Resolve one external buffer, deduplicated against all other
    /// requests for the same key.
    #[must_use]
    pub fn fetch_shared(&self, key: BufferKey) -> SharedFetch<'_, F> {
        SharedFetch {
            resolver: self,
            key,
            role: Role::Undecided,
        }
    }

    /// Resolve a batch of external buffers concurrently.
    ///
    /// Results are returned in request order. The first failure wins:
    /// remaining shared fetches are released, though their underlying
    /// fetches may still complete for the benefit of other requesters.
    ///
    /// # Errors
    ///
    /// Returns the first fetch failure, or [`Error::Cancelled`] if the
    /// resolver was cancelled.
    pub async fn fetch_all(&self, keys: Vec<BufferKey>) -> Result<Vec<Arc<[u8]>>> {
        let mut pending: Vec<Option<SharedFetch<'_, F>>> =
            keys.into_iter().map(|key| Some(self.fetch_shared(key))).collect();
        let mut results: Vec<Option<Arc<[u8]>>> = vec![None; pending.len()];

        std::future::poll_fn(move |cx| {
            let mut remaining = 0;
            for (i, entry) in pending.iter_mut().enumerate() {
                let Some(fetch) = entry else { continue };
                match Pin::new(fetch).poll(cx) {
                    Poll::Ready(Ok(bytes)) => {
                        results[i] = Some(bytes);
                        *entry = None;
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => remaining += 1,
                }
            }
            if remaining == 0 {
                let resolved = results.iter_mut().filter_map(Option::take).collect();
                Poll::Ready(Ok(resolved))
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

enum Role<'a> {
    /// Not yet registered in the slot map.
    Undecided,
    /// This requester owns the underlying fetch.
    Driver(FetchFuture<'a>),
    /// Another requester is driving; our waker is registered.
    Waiter,
    /// A result has been returned.
    Finished,
}

impl std::fmt::Debug for Role<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::Undecided => "Undecided",
            Role::Driver(_) => "Driver",
            Role::Waiter => "Waiter",
            Role::Finished => "Finished",
        };
        f.write_str(name)
    }
}

/// A deduplicated fetch of one external buffer.
///
/// The first `SharedFetch` to poll a given key drives the underlying
/// fetch; concurrent fetches of the same key wait for it and share the
/// outcome. If a driver is dropped mid-flight, its waiters are woken and
/// one of them takes over as the new driver.
#[derive(Debug)]
pub struct SharedFetch<'a, F> {
    resolver: &'a BufferResolver<F>,
    key: BufferKey,
    role: Role<'a>,
}

impl<F: Fetcher> Future for SharedFetch<'_, F> {
    type Output = Result<Arc<[u8]>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let state = &this.resolver.state;

        if state.cancelled.load(Ordering::Acquire) {
            if matches!(this.role, Role::Driver(_)) {
                release_slot(state, &this.key);
            }
            this.role = Role::Finished;
            return Poll::Ready(Err(Error::Cancelled));
        }

        loop {
            match &mut this.role {
                Role::Undecided => {
                    let mut slots = state.slots.lock().unwrap();
                    match slots.get_mut(&this.key) {
                        Some(Slot::Done(result)) => {
                            tracing::debug!(uri = %this.key.uri, "buffer already resolved");
                            this.role = Role::Finished;
                            return Poll::Ready(result.clone());
                        }
                        Some(Slot::InFlight { wakers }) => {
                            tracing::debug!(uri = %this.key.uri, "joining in-flight fetch");
                            register_waker(wakers, cx.waker());
                            this.role = Role::Waiter;
                            return Poll::Pending;
                        }
                        None => {
                            slots.insert(this.key.clone(), Slot::InFlight { wakers: Vec::new() });
                            drop(slots);
                            let future = this.resolver.fetcher.fetch(
                                &this.key.uri,
                                this.key.byte_offset,
                                this.key.byte_length,
                            );
                            this.role = Role::Driver(future);
                        }
                    }
                }
                Role::Driver(future) => match future.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(result) => {
                        let result = result.map(Arc::<[u8]>::from);
                        let wakers = {
                            let mut slots = state.slots.lock().unwrap();
                            let previous =
                                slots.insert(this.key.clone(), Slot::Done(result.clone()));
                            match previous {
                                Some(Slot::InFlight { wakers }) => wakers,
                                _ => Vec::new(),
                            }
                        };
                        for waker in wakers {
                            waker.wake();
                        }
                        this.role = Role::Finished;
                        return Poll::Ready(result);
                    }
                },
                Role::Waiter => {
                    let mut slots = state.slots.lock().unwrap();
                    match slots.get_mut(&this.key) {
                        Some(Slot::Done(result)) => {
                            this.role = Role::Finished;
                            return Poll::Ready(result.clone());
                        }
                        Some(Slot::InFlight { wakers }) => {
                            register_waker(wakers, cx.waker());
                            return Poll::Pending;
                        }
                        // The driver was dropped; take over.
                        None => this.role = Role::Undecided,
                    }
                }
                Role::Finished => panic!("SharedFetch polled after completion"),
            }
        }
    }
}

impl<F> Drop for SharedFetch<'_, F> {
    fn drop(&mut self) {
        if matches!(self.role, Role::Driver(_)) {
            release_slot(&self.resolver.state, &self.key);
        }
    }
}

/// Remove a slot abandoned by its driver and wake its waiters so one of
/// them can take over.
fn release_slot(state: &ResolverState, key: &BufferKey) {
    let removed = {
        let mut slots = state.slots.lock().unwrap();
        match slots.get(key) {
            Some(Slot::InFlight { .. }) => slots.remove(key),
            _ => None,
        }
    };
    if let Some(Slot::InFlight { wakers }) = removed {
        for waker in wakers {
            waker.wake();
        }
    }
}

fn register_waker(wakers: &mut Vec<Waker>, waker: &Waker) {
    if !wakers.iter().any(|w| w.will_wake(waker)) {
        wakers.push(waker.clone());
    }
}
