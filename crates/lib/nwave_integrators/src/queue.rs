use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("{queue} queue is full (capacity {capacity})")]
pub struct QueueOverflow {
    pub queue: &'static str,
    pub capacity: usize,
}

/// Bounded append-only queue filled by one stage and drained by the next.
///
/// `push` may be called from any number of lanes at once. Items are read
/// back through [`WorkQueue::items`], which takes `&mut self` so reading can
/// only start once every producer borrow has ended.
pub struct WorkQueue<T> {
    name: &'static str,
    slots: Vec<UnsafeCell<T>>,
    size: AtomicUsize,
    dropped: AtomicUsize,
}

// Each slot is written by exactly one lane, the one that reserved its index.
unsafe impl<T: Send> Sync for WorkQueue<T> {}

impl<T: Copy + Default> WorkQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            slots: (0..capacity).map(|_| UnsafeCell::new(T::default())).collect(),
            size: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
    pub fn reset(&mut self) {
        *self.size.get_mut() = 0;
    }
    /// Reserves the next slot and writes `item` into it. A full queue
    /// rejects the item and counts it as dropped.
    pub fn push(&self, item: T) -> Result<usize, QueueOverflow> {
        let capacity = self.slots.len();
        match self
            .size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s < capacity).then_some(s + 1)
            }) {
            Ok(index) => {
                unsafe {
                    *self.slots[index].get() = item;
                }
                Ok(index)
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(QueueOverflow {
                    queue: self.name,
                    capacity,
                })
            }
        }
    }
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
    pub fn items(&mut self) -> &[T] {
        let size = *self.size.get_mut();
        let slots = &self.slots[..size];
        // UnsafeCell<T> has the same layout as T
        unsafe { std::slice::from_raw_parts(slots.as_ptr() as *const T, size) }
    }
}

/// Pushes `item`, logging an overflow. Capacities are sized for the worst
/// case, so an overflow is a bug.
pub(crate) fn push_or_report<T: Copy + Default>(queue: &WorkQueue<T>, item: T) -> Option<usize> {
    match queue.push(item) {
        Ok(i) => Some(i),
        Err(e) => {
            log::error!("{}", e);
            debug_assert!(false, "{}", e);
            None
        }
    }
}
