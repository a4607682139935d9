//! # Ring Buffer
//!
//! Fixed-capacity circular store used to hand decoded samples from
//! notification callbacks to the consuming loop.
//!
//! Writes never fail: when the ring is full the oldest samples are
//! overwritten. All storage is allocated up front in [`RingBuffer::new`].
//!
//! ## Cursors
//!
//! `head` is the index of the oldest valid element and `tail` the next write
//! index. `head == tail` is either empty or full; the `full` marker decides
//! which. After a write of at least `capacity` items the ring is left
//! unwrapped with `head = 0` and `tail = capacity`.
//!
//! ```
//! use polar_pmd::ring::RingBuffer;
//!
//! let mut ring = RingBuffer::<u16>::new(4);
//! ring.write(&[1, 2, 3, 4, 5]);
//!
//! let mut out = [0u16; 4];
//! assert_eq!(ring.read(&mut out), 4);
//! assert_eq!(out, [2, 3, 4, 5]);
//! assert!(ring.is_empty());
//! ```

/// Fixed-capacity circular buffer with overwrite-on-full writes.
///
/// Not synchronised: share it behind a mutex when a producer and a consumer
/// run on different contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingBuffer<T> {
    data: Vec<T>,
    head: usize,
    tail: usize,
    full: bool,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Creates an empty ring holding at most `capacity` elements.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity],
            head: 0,
            tail: 0,
            full: false,
        }
    }

    /// Number of valid elements.
    pub fn len(&self) -> usize {
        if self.head < self.tail {
            self.tail - self.head
        } else if self.head > self.tail {
            self.data.len() - self.head + self.tail
        } else if self.full {
            self.data.len()
        } else {
            0
        }
    }

    /// Returns true when the ring holds no valid elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backing capacity.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Appends `src`, discarding the oldest elements if the ring overflows.
    pub fn write(&mut self, src: &[T]) {
        let cap = self.data.len();
        if src.len() >= cap {
            self.data.copy_from_slice(&src[src.len() - cap..]);
            self.head = 0;
            self.tail = cap;
            self.full = cap > 0;
            return;
        }
        if src.is_empty() {
            return;
        }

        let filled = self.len() + src.len() >= cap;

        let start = if self.tail == cap { 0 } else { self.tail };
        let front = (cap - start).min(src.len());
        self.data[start..start + front].copy_from_slice(&src[..front]);
        if front == src.len() {
            self.tail = start + front;
        } else {
            let rest = src.len() - front;
            self.data[..rest].copy_from_slice(&src[front..]);
            self.tail = rest;
        }

        if filled {
            // Oldest data is evicted by exactly the amount overwritten.
            self.head = if self.tail == cap { 0 } else { self.tail };
            self.full = true;
        }
    }

    /// Copies up to `dst.len()` elements, oldest first, without consuming them.
    ///
    /// Returns the number of elements copied.
    pub fn copy_to(&self, dst: &mut [T]) -> usize {
        let n = dst.len().min(self.len());
        if n == 0 {
            return 0;
        }
        if self.head < self.tail {
            dst[..n].copy_from_slice(&self.data[self.head..self.head + n]);
            return n;
        }
        let front = (self.data.len() - self.head).min(n);
        dst[..front].copy_from_slice(&self.data[self.head..self.head + front]);
        dst[front..n].copy_from_slice(&self.data[..n - front]);
        n
    }

    /// Copies up to `dst.len()` elements, oldest first, and consumes them.
    pub fn read(&mut self, dst: &mut [T]) -> usize {
        let n = self.copy_to(dst);
        self.advance(n);
        n
    }

    /// Discards up to `n` of the oldest elements.
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.len());
        if n == 0 {
            return;
        }
        self.full = false;
        if self.head < self.tail {
            self.head += n;
            return;
        }
        // Wrapped, or full with head == tail.
        let front = self.data.len() - self.head;
        if n < front {
            self.head += n;
        } else {
            self.head = n - front;
        }
    }
}
