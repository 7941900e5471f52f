use super::{BLOCKS_FILE, MARKS_FILE};
use crate::block::Block;
use byteorder::{BigEndian, ReadBytesExt};
use std::{
    fs::File,
    io::BufReader,
    ops::Range,
    path::{Path, PathBuf},
};

/// Reads a part's granules from disk.
///
/// Reads are mark-granular: any contiguous range of granules can be streamed
/// without touching the rest of the part.
pub struct PartReader {
    path: PathBuf,
    marks: Vec<(u64, u32)>,
}

impl PartReader {
    /// Opens a part directory, loading its mark index
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(path.join(MARKS_FILE))?;
        let mut reader = BufReader::new(file);

        let mark_count = reader.read_u32::<BigEndian>()? as usize;

        let mut marks = Vec::with_capacity(mark_count);
        for _ in 0..mark_count {
            let offset = reader.read_u64::<BigEndian>()?;
            let size = reader.read_u32::<BigEndian>()?;
            marks.push((offset, size));
        }

        Ok(Self { path, marks })
    }

    /// Number of granules in the part
    #[must_use]
    pub fn marks_count(&self) -> usize {
        self.marks.len()
    }

    /// Streams the blocks of a contiguous mark range
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn read_range(&self, marks: Range<usize>) -> crate::Result<GranuleIter> {
        let file = BufReader::new(File::open(self.path.join(BLOCKS_FILE))?);

        let marks = self
            .marks
            .get(marks)
            .unwrap_or_default()
            .to_vec();

        Ok(GranuleIter {
            file,
            marks,
            next: 0,
        })
    }
}

/// Iterates the blocks of a mark range, one granule at a time
pub struct GranuleIter {
    file: BufReader<File>,
    marks: Vec<(u64, u32)>,
    next: usize,
}

impl Iterator for GranuleIter {
    type Item = crate::Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let (offset, size) = *self.marks.get(self.next)?;
        self.next += 1;

        Some(Block::from_file_compressed(&mut self.file, offset, size))
    }
}
