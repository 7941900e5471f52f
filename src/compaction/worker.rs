use super::{select_parts_to_merge, MergeCandidate, SelectOptions};
use crate::{
    cancel::CancelToken,
    config::{MergeSettings, DEFAULT_MERGE_BLOCK_SIZE, DISK_USAGE_COEFFICIENT_TO_RESERVE},
    disk::DiskBudget,
    merge::MergingReader,
    part::{PartInfo, PartWriter, PartWriterOptions, TMP_PART_PREFIX},
    registry::PartRegistry,
    schema::{MergeMode, TableSchema},
    source::{SortedSource, SortedStream},
};
use chrono::Local;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

/// Summed row count of the merges currently running across all workers.
///
/// Lets a worker notice that another worker is chewing on a large merge and
/// restrict itself to small parts meanwhile. Purely cooperative, nothing
/// blocks on it.
#[derive(Default)]
pub struct ActiveMerges {
    rows: AtomicU64,
}

impl ActiveMerges {
    /// Creates an idle counter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows currently being merged
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Acquire)
    }

    fn enter(self: &Arc<Self>, rows: u64) -> ActiveMergeGuard {
        self.rows.fetch_add(rows, Ordering::AcqRel);

        ActiveMergeGuard {
            merges: self.clone(),
            rows,
        }
    }
}

struct ActiveMergeGuard {
    merges: Arc<ActiveMerges>,
    rows: u64,
}

impl Drop for ActiveMergeGuard {
    fn drop(&mut self) {
        self.merges.rows.fetch_sub(self.rows, Ordering::AcqRel);
    }
}

/// Result of one merge attempt
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MergeOutcome {
    /// A new part was produced and swapped into the registry
    Merged(Arc<str>),

    /// Nothing to do, or every input row collapsed away; no replacement
    Nothing,

    /// Cancellation was observed; no registry change, no new part
    Cancelled,
}

/// Merges selected part runs into single new parts.
///
/// Spawn one merge loop per worker thread; each iteration calls
/// [`MergeExecutor::select_and_merge`].
pub struct MergeExecutor {
    /// Table data path, holding the part directories
    pub path: PathBuf,

    /// Table schema
    pub schema: Arc<TableSchema>,

    /// Merge settings
    pub settings: MergeSettings,

    /// Part catalog
    pub registry: Arc<PartRegistry>,

    /// Disk reservation tracking, shared by all workers of a mount point
    pub disk: Arc<DiskBudget>,

    /// Cooperative cancellation flag, checked between blocks
    pub cancel: CancelToken,

    /// Cross-worker large-merge signal
    pub active: Arc<ActiveMerges>,
}

impl MergeExecutor {
    /// One scheduler iteration: pick the best candidate run and merge it.
    ///
    /// Returns [`MergeOutcome::Nothing`] when no candidate qualifies or
    /// another worker grabbed the chosen parts first.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the merge fails; see [`MergeExecutor::merge`].
    pub fn select_and_merge(&self, opts: SelectOptions) -> crate::Result<MergeOutcome> {
        let mut opts = opts;

        // While somebody merges something large, everyone else goes small
        if self.active.rows() > self.settings.max_rows_to_merge_parts {
            opts.only_small = true;
        }

        let snapshot = self.registry.snapshot();

        let registry = self.registry.clone();
        let predicate = move |left: &PartInfo, right: &PartInfo| {
            !registry.is_busy(&left.name) && !registry.is_busy(&right.name)
        };

        log::debug!("Selecting parts to merge");

        let Some(candidate) = select_parts_to_merge(
            &snapshot,
            self.disk.available(),
            Local::now(),
            opts,
            &predicate,
            &self.settings,
        ) else {
            return Ok(MergeOutcome::Nothing);
        };

        let Some(_busy) = self.registry.mark_busy(&candidate.names()) else {
            log::debug!("Selected parts got busy in the meantime");
            return Ok(MergeOutcome::Nothing);
        };

        let _active = self
            .active
            .enter(candidate.rows(self.settings.index_granularity));

        self.merge(&candidate)
    }

    /// Merges the candidate's parts into a single new part.
    ///
    /// Reserves disk space for the duration, streams all input rows through
    /// the k-way merge into a staged `tmp_` directory, then renames it and
    /// atomically swaps the part set in the registry. A cancelled or failed
    /// merge leaves no trace: the staged directory is deleted and the
    /// registry stays untouched.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the candidate is invalid, disk space cannot be
    /// reserved, an IO error occurs, or an ordinary merge produces no rows.
    #[allow(clippy::too_many_lines)]
    pub fn merge(&self, candidate: &MergeCandidate) -> crate::Result<MergeOutcome> {
        candidate.validate()?;

        let parts = &candidate.parts;
        let first_name = &parts.first().expect("candidate should not be empty").name;
        let last_name = &parts.last().expect("candidate should not be empty").name;

        log::debug!(
            "Merging {} parts: from {first_name} to {last_name}",
            parts.len()
        );

        // Reserve slightly less than the selection gate required, so losing a
        // little free space since selection does not starve the merge
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let required = (candidate.bytes() as f64 * DISK_USAGE_COEFFICIENT_TO_RESERVE) as u64;

        let Some(_reservation) = self.disk.reserve(required) else {
            return Err(crate::Error::SpaceReservation {
                requested: required,
            });
        };

        let envelope = candidate.envelope();
        let new_name = envelope.name();

        // Sources ascending by block id; ties on the key resolve towards the
        // later insertion
        let sources: Vec<Box<dyn SortedStream>> = parts
            .iter()
            .map(|part| {
                Box::new(SortedSource::new(self.path.join(&*part.name))) as Box<dyn SortedStream>
            })
            .collect();

        let mut reader = MergingReader::new(sources, &self.schema, DEFAULT_MERGE_BLOCK_SIZE)?;

        let tmp_path = self.path.join(format!("{TMP_PART_PREFIX}{new_name}"));

        let mut writer = PartWriter::new(PartWriterOptions {
            path: tmp_path.clone(),
            index_granularity: self.settings.index_granularity,
            sort: self.schema.sort_description()?,
        })?;

        reader.read_prefix()?;
        writer.write_prefix()?;

        let start = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                log::info!("Cancelled merging parts");

                drop(writer);
                std::fs::remove_dir_all(&tmp_path)?;

                return Ok(MergeOutcome::Cancelled);
            }

            match reader.read()? {
                Some(block) => writer.write(block)?,
                None => break,
            }
        }

        reader.read_suffix()?;
        writer.write_suffix()?;

        let size_in_marks = writer.marks_count();
        let row_count = writer.row_count();
        drop(writer);

        if size_in_marks == 0 {
            std::fs::remove_dir_all(&tmp_path)?;

            // Rows cannot disappear in an ordinary merge
            if self.schema.mode == MergeMode::Ordinary {
                return Err(crate::Error::EmptyMerge);
            }

            log::info!(
                "All rows have been deleted while merging from {first_name} to {last_name}"
            );
            return Ok(MergeOutcome::Nothing);
        }

        let new_part = PartInfo::from_written_dir(
            &tmp_path,
            new_name.clone(),
            envelope,
            size_in_marks,
            row_count,
        )?;
        new_part.write_meta(&tmp_path)?;

        let final_path = self.path.join(&*new_name);
        std::fs::rename(&tmp_path, &final_path)?;

        if let Err(error) = self.registry.replace_parts(parts, new_part) {
            log::warn!("Part set changed under the merge, dropping {new_name}");
            std::fs::remove_dir_all(&final_path)?;
            return Err(error);
        }

        // The manifest no longer references the inputs; their folders can go
        for part in parts {
            let part_folder = self.path.join(&*part.name);

            log::trace!("rm -rf part folder at {}", part_folder.display());
            std::fs::remove_dir_all(part_folder)?;
        }

        log::trace!(
            "Merged {} parts: from {first_name} to {last_name} in {}ms",
            parts.len(),
            start.elapsed().as_millis()
        );

        Ok(MergeOutcome::Merged(new_name))
    }
}
