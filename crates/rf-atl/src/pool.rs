//! Generic free-list pool with an id counter
//!
//! Managers pop from `reserved` when they can and mint a fresh instance
//! otherwise. A failed mint must hand its id back via [`InstancePool::undo_id`].

use std::fmt::Display;

/// Integer id usable as a pool key
pub trait PoolId: Copy + PartialEq + PartialOrd + Display {
    const MAX: Self;
    fn increment(self) -> Self;
    fn decrement(self) -> Self;
}

macro_rules! impl_pool_id {
    ($($t:ty),*) => {
        $(
            impl PoolId for $t {
                const MAX: Self = <$t>::MAX;

                #[inline]
                fn increment(self) -> Self {
                    self.wrapping_add(1)
                }

                #[inline]
                fn decrement(self) -> Self {
                    self.wrapping_sub(1)
                }
            }
        )*
    };
}

impl_pool_id!(u32, u64);

pub struct InstancePool<T, Id: PoolId> {
    /// Free instances ready for reuse
    pub reserved: Vec<T>,
    /// Target number of free instances
    pub reserve_size: usize,
    id_counter: Id,
    min_id: Id,
}

impl<T, Id: PoolId> InstancePool<T, Id> {
    pub fn new(reserve_size: usize, min_id: Id) -> Self {
        Self {
            reserved: Vec::with_capacity(reserve_size),
            reserve_size,
            id_counter: min_id,
            min_id,
        }
    }

    /// Next id, wrapping back to the minimum on overflow
    pub fn next_id(&mut self) -> Id {
        if self.id_counter == Id::MAX || self.id_counter < self.min_id {
            log::error!(
                "Instance pool id counter wrapped around, restarting at {}",
                self.min_id
            );
            self.id_counter = self.min_id;
        }
        let id = self.id_counter;
        self.id_counter = self.id_counter.increment();
        id
    }

    /// Return the id handed out by the last [`next_id`](Self::next_id)
    pub fn undo_id(&mut self) {
        if self.id_counter > self.min_id {
            self.id_counter = self.id_counter.decrement();
        }
    }

    /// Id the next call to [`next_id`](Self::next_id) will return
    #[inline]
    pub fn peek_next_id(&self) -> Id {
        self.id_counter
    }

    #[inline]
    pub fn pop_reserved(&mut self) -> Option<T> {
        self.reserved.pop()
    }

    /// Keep `item` for reuse, or give it back when the pool is full
    pub fn push_reserved(&mut self, item: T) -> Result<(), T> {
        if self.reserved.len() < self.reserve_size {
            self.reserved.push(item);
            Ok(())
        } else {
            Err(item)
        }
    }

    /// How many instances are missing to reach the reserve size
    #[inline]
    pub fn shortfall(&self, active: usize) -> usize {
        self.reserve_size
            .saturating_sub(active)
            .saturating_sub(self.reserved.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_monotonic_from_min() {
        let mut pool: InstancePool<(), u64> = InstancePool::new(4, 2);
        assert_eq!(pool.next_id(), 2);
        assert_eq!(pool.next_id(), 3);
        assert_eq!(pool.next_id(), 4);
    }

    #[test]
    fn test_undo_returns_id() {
        let mut pool: InstancePool<(), u32> = InstancePool::new(4, 1);
        let id = pool.next_id();
        pool.undo_id();
        assert_eq!(pool.next_id(), id);

        // never below the minimum
        let mut fresh: InstancePool<(), u32> = InstancePool::new(4, 1);
        fresh.undo_id();
        assert_eq!(fresh.next_id(), 1);
    }

    #[test]
    fn test_wraps_on_overflow() {
        let mut pool: InstancePool<(), u32> = InstancePool::new(1, 5);
        pool.id_counter = u32::MAX;
        assert_eq!(pool.next_id(), 5);
        assert_eq!(pool.next_id(), 6);
    }

    #[test]
    fn test_reserved_bounded() {
        let mut pool: InstancePool<u8, u32> = InstancePool::new(2, 1);
        assert!(pool.push_reserved(1).is_ok());
        assert!(pool.push_reserved(2).is_ok());
        assert_eq!(pool.push_reserved(3), Err(3));
        assert_eq!(pool.pop_reserved(), Some(2));
        assert_eq!(pool.shortfall(0), 1);
        assert_eq!(pool.shortfall(5), 0);
    }
}
