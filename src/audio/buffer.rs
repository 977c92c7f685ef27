//! Fixed-capacity ring buffer for audio data

use crate::error::{PaceError, Result};

/// What `put` does when the buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overflow {
    /// Drop the incoming element
    #[default]
    Reject,
    /// Evict the oldest element to make room
    Overwrite,
}

/// Single-producer single-consumer circular buffer
///
/// Not internally synchronized: the owning framer wraps it in one mutex and
/// holds that lock for a whole put/get batch so a frame is never torn.
/// Storage is allocated once and never grows.
pub struct RingBuffer<T> {
    slots: Box<[T]>,
    /// Index of the oldest element
    head: usize,
    /// Number of stored elements
    len: usize,
    overflow: Overflow,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a ring buffer, panicking if `capacity` is zero or allocation fails
    ///
    /// Prefer [`RingBuffer::try_with_capacity`] at session start where
    /// allocation failure must be reported instead.
    pub fn new(capacity: usize, overflow: Overflow) -> Self {
        match Self::try_with_capacity(capacity, overflow) {
            Ok(buffer) => buffer,
            Err(e) => panic!("{}", e),
        }
    }

    /// Create a ring buffer, reporting allocation failure as an error
    pub fn try_with_capacity(capacity: usize, overflow: Overflow) -> Result<Self> {
        if capacity == 0 {
            return Err(PaceError::InvalidConfig(
                "ring buffer capacity must be non-zero".to_string(),
            ));
        }

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| PaceError::BufferAllocation {
                requested: capacity,
            })?;
        storage.resize(capacity, T::default());

        Ok(Self {
            slots: storage.into_boxed_slice(),
            head: 0,
            len: 0,
            overflow,
        })
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of elements currently stored
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Free slots remaining before the buffer is full
    pub fn free(&self) -> usize {
        self.slots.len() - self.len
    }

    pub fn overflow(&self) -> Overflow {
        self.overflow
    }

    /// Insert at the tail
    ///
    /// Returns `false` if the buffer was full in `Reject` mode and the item was
    /// dropped. In `Overwrite` mode the oldest element is evicted first.
    pub fn put(&mut self, item: T) -> bool {
        if self.is_full() {
            match self.overflow {
                Overflow::Reject => return false,
                Overflow::Overwrite => {
                    self.head = self.wrap(self.head + 1);
                    self.len -= 1;
                }
            }
        }

        let tail = self.wrap(self.head + self.len);
        self.slots[tail] = item;
        self.len += 1;
        true
    }

    /// Bulk insert, equivalent to calling `put` for each item
    ///
    /// Returns the number of items stored.
    pub fn put_slice(&mut self, items: &[T]) -> usize {
        let capacity = self.capacity();

        let items = match self.overflow {
            Overflow::Reject => &items[..items.len().min(self.free())],
            Overflow::Overwrite => {
                // Only the newest `capacity` items can survive
                let items = &items[items.len().saturating_sub(capacity)..];
                let evict = items.len().saturating_sub(self.free());
                self.head = self.wrap(self.head + evict);
                self.len -= evict;
                items
            }
        };

        let tail = self.wrap(self.head + self.len);
        let first = items.len().min(capacity - tail);
        self.slots[tail..tail + first].copy_from_slice(&items[..first]);
        self.slots[..items.len() - first].copy_from_slice(&items[first..]);
        self.len += items.len();
        items.len()
    }

    /// Remove and return the oldest element
    pub fn get(&mut self) -> Result<T> {
        if self.len == 0 {
            return Err(PaceError::EmptyBuffer);
        }

        let item = self.slots[self.head];
        self.head = self.wrap(self.head + 1);
        self.len -= 1;
        Ok(item)
    }

    /// Remove up to `dest.len()` oldest elements into `dest`
    ///
    /// Returns the number of elements copied.
    pub fn pop_slice(&mut self, dest: &mut [T]) -> usize {
        let count = dest.len().min(self.len);
        let first = count.min(self.capacity() - self.head);

        dest[..first].copy_from_slice(&self.slots[self.head..self.head + first]);
        dest[first..count].copy_from_slice(&self.slots[..count - first]);

        self.head = self.wrap(self.head + count);
        self.len -= count;
        count
    }

    /// Reset to empty without releasing storage
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    #[inline]
    fn wrap(&self, index: usize) -> usize {
        index % self.slots.len()
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.slots.len())
            .field("len", &self.len)
            .field("overflow", &self.overflow)
            .finish()
    }
}
