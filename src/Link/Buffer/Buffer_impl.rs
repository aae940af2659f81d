use std::collections::VecDeque;

use super::Buffer::BoundedBuffer;

impl<T> BoundedBuffer<T> {
    /// Create an empty buffer that holds at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            // Large capacities grow on demand
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Free slots left before the buffer is full.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.items.len()
    }

    /// Append `item` at the tail.
    /// Returns the item back if the buffer is already full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Remove and return the head item, if any.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_push_past_capacity() {
        let mut buf = BoundedBuffer::new(2);
        assert!(buf.push(1).is_ok());
        assert!(buf.push(2).is_ok());
        assert_eq!(buf.push(3), Err(3));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn pops_in_push_order() {
        let mut buf = BoundedBuffer::new(8);
        for c in ["a", "b", "c"] {
            buf.push(c).unwrap();
        }
        assert_eq!(buf.peek(), Some(&"a"));
        assert_eq!(buf.pop(), Some("a"));
        buf.push("d").unwrap();
        assert_eq!(buf.pop(), Some("b"));
        assert_eq!(buf.pop(), Some("c"));
        assert_eq!(buf.pop(), Some("d"));
        assert_eq!(buf.pop(), None);
    }

    #[test]
    fn zero_capacity_is_always_full() {
        let mut buf: BoundedBuffer<u8> = BoundedBuffer::new(0);
        assert!(buf.is_full());
        assert_eq!(buf.push(7), Err(7));
    }
}
