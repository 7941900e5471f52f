use super::{index, PartEnvelope, PartInfo, BLOCKS_FILE, MARKS_FILE, TMP_PART_PREFIX};
use crate::{block::Block, row::Row, schema::SortDescription};
use byteorder::{BigEndian, WriteBytesExt};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Options for [`PartWriter`]
#[allow(clippy::module_name_repetitions)]
pub struct PartWriterOptions {
    /// Target part directory (usually a `tmp_`-prefixed one)
    pub path: PathBuf,

    /// Rows per granule
    pub index_granularity: u64,

    /// Primary key, used to extract the index entry of each granule
    pub sort: SortDescription,
}

/// Streams sorted blocks into a new part directory.
///
/// Rows are buffered into granules of `index_granularity` rows; every full
/// granule becomes one compressed block with a mark and a primary-index entry.
pub struct PartWriter {
    opts: PartWriterOptions,

    block_writer: BufWriter<File>,
    chunk: Vec<Row>,

    marks: Vec<(u64, u32)>,
    index_keys: Vec<Row>,

    file_pos: u64,
    row_count: u64,
}

impl PartWriter {
    /// Sets up a new part writer at the given directory
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn new(opts: PartWriterOptions) -> crate::Result<Self> {
        std::fs::create_dir_all(&opts.path)?;

        let block_writer = File::create(opts.path.join(BLOCKS_FILE))?;
        let block_writer = BufWriter::with_capacity(512_000, block_writer);

        Ok(Self {
            block_writer,
            chunk: Vec::new(),
            marks: Vec::new(),
            index_keys: Vec::new(),
            file_pos: 0,
            row_count: 0,
            opts,
        })
    }

    /// Part of the write lifecycle; file handles are already opened in
    /// [`PartWriter::new`]
    #[allow(clippy::unused_self)]
    pub fn write_prefix(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Appends a block of sorted rows
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn write(&mut self, block: Block) -> crate::Result<()> {
        for row in block.rows {
            self.chunk.push(row);
            self.row_count += 1;

            if self.chunk.len() as u64 == self.opts.index_granularity {
                self.write_granule()?;
            }
        }

        Ok(())
    }

    /// Writes the buffered granule as one compressed block
    fn write_granule(&mut self) -> crate::Result<()> {
        debug_assert!(!self.chunk.is_empty());

        let first = self.chunk.first().expect("granule should not be empty");
        self.index_keys.push(self.opts.sort.key_of(first));

        let block = Block::new(std::mem::take(&mut self.chunk));
        let bytes = block.to_compressed_bytes()?;

        self.block_writer.write_all(&bytes)?;

        // NOTE: Granules are never bigger than 4 GB anyway,
        // so it's fine to just truncate it
        #[allow(clippy::cast_possible_truncation)]
        let bytes_written = bytes.len() as u32;

        self.marks.push((self.file_pos, bytes_written));
        self.file_pos += u64::from(bytes_written);

        Ok(())
    }

    /// Finishes the part, making sure all data is written durably
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn write_suffix(&mut self) -> crate::Result<()> {
        if !self.chunk.is_empty() {
            self.write_granule()?;
        }

        self.block_writer.flush()?;
        self.block_writer.get_mut().sync_all()?;

        let marks_file = File::create(self.opts.path.join(MARKS_FILE))?;
        let mut marks_writer = BufWriter::new(marks_file);

        // NOTE: Truncation is okay and actually needed
        #[allow(clippy::cast_possible_truncation)]
        marks_writer.write_u32::<BigEndian>(self.marks.len() as u32)?;

        for (offset, size) in &self.marks {
            marks_writer.write_u64::<BigEndian>(*offset)?;
            marks_writer.write_u32::<BigEndian>(*size)?;
        }

        marks_writer.flush()?;
        marks_writer.get_mut().sync_all()?;

        index::write(&self.opts.path, &self.index_keys)?;

        // The rename that publishes the part is only durable once the
        // directory entries themselves are synced
        #[cfg(unix)]
        std::fs::File::open(&self.opts.path)?.sync_all()?;

        log::debug!(
            "Written {} rows in {} granules into new part, written {} KiB",
            self.row_count,
            self.marks.len(),
            self.file_pos / 1_024
        );

        Ok(())
    }

    /// Number of granules written
    #[must_use]
    pub fn marks_count(&self) -> u64 {
        self.marks.len() as u64
    }

    /// Number of rows written
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.row_count
    }
}

/// Writes a sorted batch of rows as a complete new part directory and returns
/// its descriptor.
///
/// This is the bulk-insert path: the batch becomes a level-0 part. The part
/// is staged under a `tmp_` name and renamed into place once fully written.
///
/// # Errors
///
/// Will return `Err` if an IO error occurs.
pub fn write_part<P: AsRef<Path>>(
    table_path: P,
    sort: SortDescription,
    index_granularity: u64,
    envelope: PartEnvelope,
    rows: Vec<Row>,
) -> crate::Result<PartInfo> {
    let table_path = table_path.as_ref();
    let name = envelope.name();

    let tmp_path = table_path.join(format!("{TMP_PART_PREFIX}{name}"));

    let mut writer = PartWriter::new(PartWriterOptions {
        path: tmp_path.clone(),
        index_granularity,
        sort,
    })?;

    writer.write_prefix()?;
    writer.write(Block::new(rows))?;
    writer.write_suffix()?;

    let size_in_marks = writer.marks_count();
    let row_count = writer.row_count();
    drop(writer);

    let info = PartInfo::from_written_dir(&tmp_path, name.clone(), envelope, size_in_marks, row_count)?;
    info.write_meta(&tmp_path)?;

    std::fs::rename(&tmp_path, table_path.join(&*name))?;

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        part::PartReader,
        row::Field,
        schema::{SortColumn, SortOrder},
    };
    use chrono::NaiveDate;
    use test_log::test;

    fn sort_by_first_column() -> SortDescription {
        SortDescription(vec![SortColumn {
            column: 0,
            order: SortOrder::Ascending,
        }])
    }

    #[test]
    fn write_and_read() -> crate::Result<()> {
        const ROW_COUNT: u64 = 100;

        let folder = tempfile::tempdir()?.into_path();

        let mut writer = PartWriter::new(PartWriterOptions {
            path: folder.clone(),
            index_granularity: 10,
            sort: sort_by_first_column(),
        })?;

        let rows = (0..ROW_COUNT)
            .map(|i| {
                Row(vec![
                    Field::UInt(i),
                    Field::Bytes(nanoid::nanoid!().as_bytes().into()),
                ])
            })
            .collect();

        writer.write_prefix()?;
        writer.write(Block::new(rows))?;
        writer.write_suffix()?;

        assert_eq!(10, writer.marks_count());
        assert_eq!(ROW_COUNT, writer.row_count());

        let reader = PartReader::open(&folder)?;
        assert_eq!(10, reader.marks_count());

        let mut read_back = 0;
        for block in reader.read_range(0..reader.marks_count())? {
            read_back += block?.len() as u64;
        }
        assert_eq!(ROW_COUNT, read_back);

        Ok(())
    }

    #[test]
    fn mark_range_read() -> crate::Result<()> {
        let folder = tempfile::tempdir()?.into_path();

        let mut writer = PartWriter::new(PartWriterOptions {
            path: folder.clone(),
            index_granularity: 10,
            sort: sort_by_first_column(),
        })?;

        let rows = (0u64..95).map(|i| Row(vec![Field::UInt(i)])).collect();

        writer.write(Block::new(rows))?;
        writer.write_suffix()?;

        // Last granule is short
        assert_eq!(10, writer.marks_count());

        let reader = PartReader::open(&folder)?;

        let mut rows = vec![];
        for block in reader.read_range(3..5)? {
            rows.extend(block?.rows);
        }

        assert_eq!(20, rows.len());
        assert_eq!(Some(&Row(vec![Field::UInt(30)])), rows.first());
        assert_eq!(Some(&Row(vec![Field::UInt(49)])), rows.last());

        Ok(())
    }

    #[test]
    fn bulk_insert_creates_part() -> crate::Result<()> {
        let folder = tempfile::tempdir()?.into_path();

        let envelope = PartEnvelope {
            min_date: NaiveDate::from_ymd_opt(2023, 1, 1).expect("valid date"),
            max_date: NaiveDate::from_ymd_opt(2023, 1, 2).expect("valid date"),
            min_block_id: 1,
            max_block_id: 1,
            level: 0,
        };

        let rows = (0u64..25).map(|i| Row(vec![Field::UInt(i)])).collect();

        let info = write_part(&folder, sort_by_first_column(), 10, envelope, rows)?;

        assert_eq!(3, info.size_in_marks);
        assert_eq!(25, info.row_count);
        assert_eq!(3, info.primary_index.len());
        assert!(folder.join(&*info.name).exists());

        // Round-trips through its metadata file
        let loaded = PartInfo::load(folder.join(&*info.name))?;
        assert_eq!(info.name, loaded.name);
        assert_eq!(info.envelope, loaded.envelope);
        assert_eq!(info.primary_index, loaded.primary_index);

        Ok(())
    }
}
