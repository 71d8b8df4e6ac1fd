//! Bounded single-producer single-consumer channel
//!
//! Fixed-capacity queue built on a `ringbuf` heap ring. Neither end blocks:
//! `push` hands the item back when the ring is full and `pop` returns `None`
//! when it is empty, and the caller retries with a short backoff. That retry is
//! the backpressure between the reader and the decode pipelines.
//!
//! The producer half is lock-free. The consumer half sits behind a mutex so the
//! producer can also `drain()` the queue during a seek; the pipeline thread
//! holds the mutex only for the duration of a single pop.

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Create a bounded channel holding at most `capacity` items
///
/// A zero capacity is raised to one.
pub fn bounded<T>(name: &'static str, capacity: usize) -> (ChannelSender<T>, ChannelReceiver<T>) {
    let capacity = capacity.max(1);
    debug!(channel = name, capacity, "Creating bounded channel");

    let (prod, cons) = HeapRb::<T>::new(capacity).split();
    let shared = Arc::new(Shared {
        name,
        consumer: Mutex::new(cons),
        full_count: AtomicU64::new(0),
        empty_count: AtomicU64::new(0),
    });

    (
        ChannelSender {
            producer: prod,
            shared: Arc::clone(&shared),
        },
        ChannelReceiver { shared },
    )
}

struct Shared<T> {
    name: &'static str,
    consumer: Mutex<HeapCons<T>>,
    /// Pushes rejected because the ring was full
    full_count: AtomicU64,
    /// Pops that found the ring empty
    empty_count: AtomicU64,
}

impl<T> Shared<T> {
    fn consumer(&self) -> MutexGuard<'_, HeapCons<T>> {
        self.consumer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self, occupied: usize, capacity: usize) -> ChannelStats {
        ChannelStats {
            full_count: self.full_count.load(Ordering::Relaxed),
            empty_count: self.empty_count.load(Ordering::Relaxed),
            capacity,
            occupied,
        }
    }
}

/// Channel counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub full_count: u64,
    pub empty_count: u64,
    pub capacity: usize,
    pub occupied: usize,
}

/// Producer half
pub struct ChannelSender<T> {
    producer: HeapProd<T>,
    shared: Arc<Shared<T>>,
}

impl<T> ChannelSender<T> {
    /// Enqueue `item`, or give it back if the channel is full
    pub fn push(&mut self, item: T) -> Result<(), T> {
        match self.producer.try_push(item) {
            Ok(()) => Ok(()),
            Err(item) => {
                let count = self.shared.full_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count % 1000 == 0 {
                    trace!(channel = self.shared.name, total = count, "Channel full");
                }
                Err(item)
            }
        }
    }

    /// Discard every queued item, returning how many were dropped
    ///
    /// Holds the consumer lock for the whole drain, so no pop can interleave.
    pub fn drain(&mut self) -> usize {
        let mut consumer = self.shared.consumer();
        let mut dropped = 0;
        while consumer.try_pop().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(channel = self.shared.name, dropped, "Drained channel");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.producer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.producer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.producer.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity().get()
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.stats(self.len(), self.capacity())
    }
}

/// Consumer half
pub struct ChannelReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> ChannelReceiver<T> {
    /// Dequeue the oldest item, if any
    pub fn pop(&self) -> Option<T> {
        let item = self.shared.consumer().try_pop();
        if item.is_none() {
            self.shared.empty_count.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Discard every queued item from the consumer side
    pub fn drain(&self) -> usize {
        let mut consumer = self.shared.consumer();
        let mut dropped = 0;
        while consumer.try_pop().is_some() {
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.shared.consumer().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.consumer().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.consumer().capacity().get()
    }

    pub fn stats(&self) -> ChannelStats {
        let consumer = self.shared.consumer();
        let (occupied, capacity) = (consumer.occupied_len(), consumer.capacity().get());
        drop(consumer);
        self.shared.stats(occupied, capacity)
    }
}
