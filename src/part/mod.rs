pub(crate) mod index;
mod reader;
mod writer;

pub use reader::{GranuleIter, PartReader};
pub use writer::{write_part, PartWriter, PartWriterOptions};

use crate::row::Row;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Write, path::Path, sync::Arc};

/// Compressed granule blocks of a part
pub(crate) const BLOCKS_FILE: &str = "blocks";

/// Granule offsets and sizes of a part
pub(crate) const MARKS_FILE: &str = "marks";

/// First primary-key tuple of every granule
pub(crate) const PRIMARY_INDEX_FILE: &str = "primary";

/// Serialized part descriptor
pub(crate) const PART_METADATA_FILE: &str = "meta.json";

/// Prefix of part directories that are still being written
pub(crate) const TMP_PART_PREFIX: &str = "tmp_";

/// Summed size of a part directory's files
fn directory_size(dir: &Path) -> std::io::Result<u64> {
    let mut size = 0;

    for entry in std::fs::read_dir(dir)? {
        let metadata = entry?.metadata()?;

        if metadata.is_file() {
            size += metadata.len();
        }
    }

    Ok(size)
}

/// Month bucket a part belongs to, derived from its date column
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Partition(i32);

impl Partition {
    /// Partition of the month containing `date`
    #[must_use]
    pub fn of(date: NaiveDate) -> Self {
        #[allow(clippy::cast_possible_wrap)]
        Self(date.year() * 100 + date.month() as i32)
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

/// The identifying range attributes of a part.
///
/// The canonical part name is synthesized from these, so two parts covering
/// the same range at the same merge depth get the same name.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PartEnvelope {
    /// Smallest value of the date column
    pub min_date: NaiveDate,

    /// Largest value of the date column
    pub max_date: NaiveDate,

    /// Smallest block id covered by the part
    pub min_block_id: u64,

    /// Largest block id covered by the part
    pub max_block_id: u64,

    /// Merge depth, 0 for freshly inserted parts
    pub level: u32,
}

impl PartEnvelope {
    /// Canonical part name: `YYYYMMDD_YYYYMMDD_<min block>_<max block>_<level>`
    #[must_use]
    pub fn name(&self) -> Arc<str> {
        format!(
            "{}_{}_{}_{}_{}",
            self.min_date.format("%Y%m%d"),
            self.max_date.format("%Y%m%d"),
            self.min_block_id,
            self.max_block_id,
            self.level,
        )
        .into()
    }

    /// Partition the part belongs to (by its min date)
    #[must_use]
    pub fn partition(&self) -> Partition {
        Partition::of(self.min_date)
    }

    /// Whether the date range crosses a month boundary
    #[must_use]
    pub fn spans_partitions(&self) -> bool {
        Partition::of(self.min_date) != Partition::of(self.max_date)
    }
}

/// In-memory descriptor of one immutable part.
///
/// Descriptors are owned by the registry and shared immutably; a merge
/// borrows them for its duration and never mutates them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartInfo {
    /// Canonical name, also the part's directory name
    pub name: Arc<str>,

    /// Identifying range attributes
    #[serde(flatten)]
    pub envelope: PartEnvelope,

    /// Number of granules
    pub size_in_marks: u64,

    /// Summed size of the part's files
    pub size_in_bytes: u64,

    /// Exact number of rows
    pub row_count: u64,

    /// Unix seconds of the last modification (i.e. when the part was written)
    pub modification_time: u64,

    /// First primary-key tuple of every granule, loaded from disk
    #[serde(skip)]
    pub primary_index: Vec<Row>,
}

impl PartInfo {
    /// Partition the part belongs to
    #[must_use]
    pub fn partition(&self) -> Partition {
        self.envelope.partition()
    }

    /// Whether the date range crosses a month boundary
    #[must_use]
    pub fn spans_partitions(&self) -> bool {
        self.envelope.spans_partitions()
    }

    /// Smallest block id covered by the part
    #[must_use]
    pub fn min_block_id(&self) -> u64 {
        self.envelope.min_block_id
    }

    /// Largest block id covered by the part
    #[must_use]
    pub fn max_block_id(&self) -> u64 {
        self.envelope.max_block_id
    }

    /// Merge depth
    #[must_use]
    pub fn level(&self) -> u32 {
        self.envelope.level
    }

    /// Part size in rows, derived from its granule count
    #[must_use]
    pub fn rows(&self, index_granularity: u64) -> u64 {
        self.size_in_marks.saturating_mul(index_granularity)
    }

    /// Loads a part descriptor (and its primary index) from its directory
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn load<P: AsRef<Path>>(dir: P) -> crate::Result<Self> {
        let dir = dir.as_ref();

        let meta = std::fs::read_to_string(dir.join(PART_METADATA_FILE))?;
        let mut info: Self = serde_json::from_str(&meta).expect("deserialize error");

        info.primary_index = index::load(dir)?;

        Ok(info)
    }

    /// Persists the descriptor as the part's metadata file
    pub(crate) fn write_meta(&self, dir: &Path) -> crate::Result<()> {
        // NOTE: Serialization can't fail here
        #[allow(clippy::expect_used)]
        let json = serde_json::to_string_pretty(self).expect("should serialize");

        let mut file = File::create(dir.join(PART_METADATA_FILE))?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        Ok(())
    }

    /// Builds the descriptor of a freshly written part directory,
    /// re-reading the primary index from disk
    pub(crate) fn from_written_dir(
        dir: &Path,
        name: Arc<str>,
        envelope: PartEnvelope,
        size_in_marks: u64,
        row_count: u64,
    ) -> crate::Result<Self> {
        let modification_time = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Ok(Self {
            name,
            envelope,
            size_in_marks,
            size_in_bytes: directory_size(dir)?,
            row_count,
            modification_time,
            primary_index: index::load(dir)?,
        })
    }
}
