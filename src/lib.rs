//! Merge planning and k-way part merging for a columnar, MergeTree-style
//! storage engine.
//!
//! ##### About
//!
//! A table is stored as a set of immutable, primary-key-sorted *parts*,
//! bucketed into month partitions. Bulk inserts publish sorted batches as new
//! level-0 parts; background workers continuously pick runs of parts and
//! merge each run into a single bigger part, keeping the part count (and with
//! it read amplification) bounded.
//!
//! This crate provides the two halves of that loop:
//!
//! - the *merge planner* ([`select_parts_to_merge`]): an amortized-cost
//!   heuristic that picks balanced runs, relaxes with part age, tightens with
//!   size, allows bigger merges at night and refuses to outgrow the disk
//! - the *merge executor* ([`MergeExecutor`]): reserves disk space, streams
//!   the selected parts through a k-way [`MergingReader`] into a new part
//!   directory, and atomically swaps the part set in the [`PartRegistry`]
//!
//! Rows with equal primary keys can be collapsed while merging, depending on
//! the table's [`MergeMode`]: kept as-is, annihilated by a ±1 sign column, or
//! folded by summing numeric columns.
//!
//! # Example usage
//!
//! ```
//! use merge_tree::{
//!     write_part, ActiveMerges, CancelToken, ColumnKind, ColumnSchema, DiskBudget, Field,
//!     MergeExecutor, MergeMode, MergeOutcome, MergeSettings, PartEnvelope, PartRegistry, Row,
//!     SelectOptions, SortOrder, TableSchema,
//! };
//! use std::sync::Arc;
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! let schema = Arc::new(TableSchema {
//!     columns: vec![
//!         ColumnSchema { name: "id".into(), kind: ColumnKind::UInt },
//!         ColumnSchema { name: "payload".into(), kind: ColumnKind::Bytes },
//!     ],
//!     primary_key: vec![("id".into(), SortOrder::Ascending)],
//!     mode: MergeMode::Ordinary,
//! });
//! let settings = MergeSettings::default().index_granularity(2);
//!
//! let registry = Arc::new(PartRegistry::create_new(folder.path())?);
//! let date = chrono::NaiveDate::from_ymd_opt(2023, 1, 1).expect("valid date");
//!
//! // Bulk inserts publish sorted batches as level-0 parts
//! for batch in [vec![1, 3], vec![2, 4]] {
//!     let block_id = registry.next_block_id();
//!
//!     let rows = batch
//!         .into_iter()
//!         .map(|id| Row(vec![Field::UInt(id), Field::Bytes(b"payload".to_vec().into())]))
//!         .collect();
//!
//!     let envelope = PartEnvelope {
//!         min_date: date,
//!         max_date: date,
//!         min_block_id: block_id,
//!         max_block_id: block_id,
//!         level: 0,
//!     };
//!
//!     let part = write_part(
//!         folder.path(),
//!         schema.sort_description()?,
//!         settings.index_granularity,
//!         envelope,
//!         rows,
//!     )?;
//!     registry.add_part(part)?;
//! }
//!
//! // A background worker folds them back into a single part
//! let executor = MergeExecutor {
//!     path: folder.path().into(),
//!     schema,
//!     settings,
//!     registry: registry.clone(),
//!     disk: Arc::new(DiskBudget::new(Box::new(|| u64::MAX))),
//!     cancel: CancelToken::default(),
//!     active: Arc::new(ActiveMerges::new()),
//! };
//!
//! let outcome = executor.select_and_merge(SelectOptions::default())?;
//! assert!(matches!(outcome, MergeOutcome::Merged(_)));
//! assert_eq!(1, registry.len());
//! #
//! # Ok::<(), merge_tree::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]

mod block;
mod cancel;
pub mod compaction;
mod config;
mod disk;
mod error;
mod merge;
mod part;
mod registry;
mod row;
mod schema;
mod source;

pub use {
    block::Block,
    cancel::CancelToken,
    compaction::{
        select_parts_to_merge, ActiveMerges, MergeCandidate, MergeExecutor, MergeOutcome,
        MergePredicate, SelectOptions,
    },
    config::{
        MergeSettings, DEFAULT_MERGE_BLOCK_SIZE, DISK_USAGE_COEFFICIENT_TO_RESERVE,
        DISK_USAGE_COEFFICIENT_TO_SELECT,
    },
    disk::{DiskBudget, FreeSpaceFn, Reservation},
    error::{Error, Result},
    merge::MergingReader,
    part::{write_part, GranuleIter, PartEnvelope, PartInfo, PartReader, PartWriter, PartWriterOptions, Partition},
    registry::{BusyGuard, PartRegistry},
    row::{Field, Row},
    schema::{
        ColumnKind, ColumnSchema, MergeMode, SortColumn, SortDescription, SortOrder, TableSchema,
    },
    source::{SortedSource, SortedStream},
};
