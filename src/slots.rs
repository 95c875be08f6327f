// src/slots.rs

/// A fixed-size, index-addressed result container.
///
/// Every slot starts out holding the sentinel value, so "worker never
/// resolved" and "worker resolved to the sentinel" collapse into the same
/// observable outcome by construction. Each index is written by at most one
/// worker, which is why no synchronization is needed: results come back as
/// `(index, value)` pairs and are written at the join barrier.
#[derive(Debug)]
pub struct ResultSlots<T> {
    inner: Vec<T>,
}

impl<T: Clone> ResultSlots<T> {
    /// Create `len` slots, each pre-filled with `sentinel`.
    pub fn new(len: usize, sentinel: T) -> Self {
        Self {
            inner: vec![sentinel; len],
        }
    }
}

impl<T> ResultSlots<T> {
    /// Create `len` slots, pre-filling slot `i` with `sentinel(i)`. Used
    /// when the sentinel value embeds its own index.
    pub fn new_with(len: usize, sentinel: impl Fn(usize) -> T) -> Self {
        Self {
            inner: (0..len).map(sentinel).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Write the result for slot `index`, overwriting the sentinel.
    pub fn write(&mut self, index: usize, value: T) {
        self.inner[index] = value;
    }

    /// Consume the container, yielding results in input order.
    pub fn into_vec(self) -> Vec<T> {
        self.inner
    }
}
