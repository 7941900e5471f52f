use crate::{
    block::Block,
    part::{GranuleIter, PartReader},
};
use std::path::PathBuf;

/// A pull-stream of sorted row blocks, used as merge input.
///
/// `read_prefix`/`read_suffix` bracket the stream so implementations can
/// defer opening file handles until the merge actually starts, and close
/// them as soon as it ends.
pub trait SortedStream {
    /// Prepares the stream (e.g. opens file handles)
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn read_prefix(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Next block of rows, or `None` once the stream is exhausted
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn read(&mut self) -> crate::Result<Option<Block>>;

    /// Tears the stream down (e.g. closes file handles)
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn read_suffix(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

/// Streams one part's granules in primary-key order.
///
/// The part directory is only opened once the merge pulls the first block.
pub struct SortedSource {
    path: PathBuf,
    granules: Option<GranuleIter>,
}

impl SortedSource {
    /// Creates a source over a part directory
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            granules: None,
        }
    }
}

impl SortedStream for SortedSource {
    fn read_prefix(&mut self) -> crate::Result<()> {
        log::trace!("Opening part {} for merge", self.path.display());

        let reader = PartReader::open(&self.path)?;
        self.granules = Some(reader.read_range(0..reader.marks_count())?);

        Ok(())
    }

    fn read(&mut self) -> crate::Result<Option<Block>> {
        if self.granules.is_none() {
            self.read_prefix()?;
        }

        let granules = self.granules.as_mut().expect("stream should be open");
        granules.next().transpose()
    }

    fn read_suffix(&mut self) -> crate::Result<()> {
        self.granules = None;
        Ok(())
    }
}
