/// Parts are only selected for merging if free disk space is more than this
/// many times their summed size.
pub const DISK_USAGE_COEFFICIENT_TO_SELECT: f64 = 1.6;

/// While merging, this many times the summed part size is reserved on disk.
/// Slightly below [`DISK_USAGE_COEFFICIENT_TO_SELECT`]: free space may shrink
/// between selecting parts and reserving space, and the merge should still
/// go through.
pub const DISK_USAGE_COEFFICIENT_TO_RESERVE: f64 = 1.4;

/// Rows per block emitted by the merge stream
pub const DEFAULT_MERGE_BLOCK_SIZE: usize = 8_192;

#[derive(Clone, Debug)]
/// Merge scheduling knobs of one table
pub struct MergeSettings {
    /// Rows per mark (fixed for a table)
    ///
    /// Default = 8192
    pub index_granularity: u64,

    /// Hard cap on the number of parts merged at once
    ///
    /// Default = 10
    pub max_parts_to_merge_at_once: usize,

    /// Base per-part row cap
    ///
    /// Default = 100 * 1024 * 1024
    pub max_rows_to_merge_parts: u64,

    /// Per-part row cap while another worker is running a large merge
    ///
    /// Default = 1024 * 1024
    pub max_rows_to_merge_parts_second: u64,

    /// Row-cap multiplier during the 01:00-05:00 (local time) off-peak window
    ///
    /// Default = 10
    pub merge_parts_at_night_inc: u64,

    /// Base of the balance ratio: the largest part of a run may be at most
    /// about this many times bigger than the rest combined
    ///
    /// Default = 5.0
    pub max_size_ratio_to_merge_parts: f64,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            index_granularity: 8_192,
            max_parts_to_merge_at_once: 10,
            max_rows_to_merge_parts: 100 * 1_024 * 1_024,
            max_rows_to_merge_parts_second: 1_024 * 1_024,
            merge_parts_at_night_inc: 10,
            max_size_ratio_to_merge_parts: 5.0,
        }
    }
}

impl MergeSettings {
    /// Sets the rows per mark.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn index_granularity(mut self, n: u64) -> Self {
        assert!(n > 0);

        self.index_granularity = n;
        self
    }

    /// Sets the hard cap on run length.
    ///
    /// # Panics
    ///
    /// Panics if `n` is less than 2.
    #[must_use]
    pub fn max_parts_to_merge_at_once(mut self, n: usize) -> Self {
        assert!(n > 1);

        self.max_parts_to_merge_at_once = n;
        self
    }

    /// Sets the base per-part row cap.
    #[must_use]
    pub fn max_rows_to_merge_parts(mut self, n: u64) -> Self {
        self.max_rows_to_merge_parts = n;
        self
    }

    /// Sets the per-part row cap used while a large merge runs elsewhere.
    #[must_use]
    pub fn max_rows_to_merge_parts_second(mut self, n: u64) -> Self {
        self.max_rows_to_merge_parts_second = n;
        self
    }

    /// Sets the off-peak row-cap multiplier.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn merge_parts_at_night_inc(mut self, n: u64) -> Self {
        assert!(n > 0);

        self.merge_parts_at_night_inc = n;
        self
    }

    /// Sets the base of the balance ratio.
    ///
    /// # Panics
    ///
    /// Panics if `n` is not positive.
    #[must_use]
    pub fn max_size_ratio_to_merge_parts(mut self, n: f64) -> Self {
        assert!(n > 0.0);

        self.max_size_ratio_to_merge_parts = n;
        self
    }
}
