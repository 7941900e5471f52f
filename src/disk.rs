use std::sync::{Arc, Mutex};

/// Callback reporting the free bytes of the mount point backing the table.
///
/// Free-space inquiry itself is platform plumbing and injected from outside.
pub type FreeSpaceFn = Box<dyn Fn() -> u64 + Send + Sync>;

/// Tracks the disk reservations of in-flight merges.
///
/// A merge may only start once its projected output (plus overhead) fits into
/// the free space that is not already promised to other merges.
pub struct DiskBudget {
    free_space: FreeSpaceFn,
    outstanding: Mutex<u64>,
}

impl DiskBudget {
    /// Creates a budget over the given free-space source
    #[must_use]
    pub fn new(free_space: FreeSpaceFn) -> Self {
        Self {
            free_space,
            outstanding: Mutex::new(0),
        }
    }

    /// Free bytes as reported by the file system
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        (self.free_space)()
    }

    /// Free bytes minus outstanding reservations
    #[must_use]
    pub fn available(&self) -> u64 {
        let outstanding = self.outstanding.lock().expect("lock is poisoned");
        self.free_bytes().saturating_sub(*outstanding)
    }

    /// Currently reserved bytes
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        *self.outstanding.lock().expect("lock is poisoned")
    }

    /// Reserves bytes for one merge.
    ///
    /// Returns `None` if the reservation would exceed the unreserved free
    /// space. Failing to reserve is not fatal, the merge can be retried later.
    #[must_use]
    pub fn reserve(self: &Arc<Self>, bytes: u64) -> Option<Reservation> {
        let mut outstanding = self.outstanding.lock().expect("lock is poisoned");

        if self.free_bytes().saturating_sub(*outstanding) < bytes {
            log::debug!(
                "cannot reserve {bytes} bytes, {} already reserved",
                *outstanding
            );
            return None;
        }

        *outstanding += bytes;

        Some(Reservation {
            budget: self.clone(),
            bytes: Mutex::new(bytes),
        })
    }

    fn give_back(&self, bytes: u64) {
        let mut outstanding = self.outstanding.lock().expect("lock is poisoned");
        *outstanding = outstanding.saturating_sub(bytes);
    }
}

/// Scoped reservation handle.
///
/// Dropping the handle releases the reserved bytes; `release` may also be
/// called manually and is idempotent.
pub struct Reservation {
    budget: Arc<DiskBudget>,
    bytes: Mutex<u64>,
}

impl Reservation {
    /// Gives the reserved bytes back to the budget
    pub fn release(&self) {
        let mut bytes = self.bytes.lock().expect("lock is poisoned");
        let taken = std::mem::take(&mut *bytes);

        if taken > 0 {
            self.budget.give_back(taken);
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn reserve_and_release() {
        let budget = Arc::new(DiskBudget::new(Box::new(|| 1_000)));

        let reservation = budget.reserve(600).expect("should reserve");
        assert_eq!(600, budget.outstanding());
        assert_eq!(400, budget.available());

        // Second reservation does not fit anymore
        assert!(budget.reserve(600).is_none());

        drop(reservation);
        assert_eq!(0, budget.outstanding());
        assert!(budget.reserve(600).is_some());
    }

    #[test]
    fn release_is_idempotent() {
        let budget = Arc::new(DiskBudget::new(Box::new(|| 1_000)));

        let reservation = budget.reserve(500).expect("should reserve");
        reservation.release();
        reservation.release();
        drop(reservation);

        assert_eq!(0, budget.outstanding());
    }

    #[test]
    fn outstanding_never_exceeds_free() {
        let budget = Arc::new(DiskBudget::new(Box::new(|| 1_000)));

        let _a = budget.reserve(500).expect("should reserve");
        let _b = budget.reserve(500).expect("should reserve");
        assert!(budget.reserve(1).is_none());

        assert!(budget.outstanding() <= budget.free_bytes());
    }
}
