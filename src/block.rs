use crate::row::Row;
use byteorder::{BigEndian, ReadBytesExt};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use std::io::{Cursor, Read, Seek, Write};

/// A batch of rows, the unit of the streaming merge pipeline.
///
/// On disk, one block holds the rows of one granule, LZ4-compressed.
/// The integrity of a block can be checked using the CRC value that is saved in it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    /// Rows in primary-key order
    pub rows: Vec<Row>,
}

impl Block {
    /// Creates a block from rows
    #[must_use]
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the block holds no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Calculates the CRC from a list of rows
    pub(crate) fn create_crc(rows: &[Row]) -> crate::Result<u32> {
        let mut hasher = crc32fast::Hasher::new();

        // NOTE: Truncation is okay and actually needed
        #[allow(clippy::cast_possible_truncation)]
        hasher.update(&(rows.len() as u32).to_be_bytes());

        for row in rows {
            let mut encoded_row = Vec::new();
            row.write_to(&mut encoded_row)?;

            hasher.update(&encoded_row);
        }

        Ok(hasher.finalize())
    }

    /// Serializes and compresses the block into its on-disk form
    pub fn to_compressed_bytes(&self) -> crate::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(u16::MAX.into());

        let crc = Self::create_crc(&self.rows)?;
        bytes.write_all(&crc.to_be_bytes())?;

        // NOTE: Truncation is okay and actually needed
        #[allow(clippy::cast_possible_truncation)]
        bytes.write_all(&(self.rows.len() as u32).to_be_bytes())?;

        for row in &self.rows {
            row.write_to(&mut bytes)?;
        }

        Ok(compress_prepend_size(&bytes))
    }

    /// Reads, decompresses and verifies one block of the given compressed size
    pub fn from_reader_compressed<R: Read>(reader: &mut R, size: u32) -> crate::Result<Self> {
        let mut bytes = vec![0u8; size as usize];
        reader.read_exact(&mut bytes)?;

        let bytes = decompress_size_prepended(&bytes)?;
        let mut bytes = Cursor::new(bytes);

        let crc = bytes.read_u32::<BigEndian>()?;
        let row_count = bytes.read_u32::<BigEndian>()? as usize;

        let mut rows = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            rows.push(Row::read_from(&mut bytes)?);
        }

        if Self::create_crc(&rows)? != crc {
            return Err(crate::Error::ChecksumMismatch);
        }

        Ok(Self { rows })
    }

    /// Reads one block at the given file offset
    pub fn from_file_compressed<R: Read + Seek>(
        reader: &mut R,
        offset: u64,
        size: u32,
    ) -> crate::Result<Self> {
        reader.seek(std::io::SeekFrom::Start(offset))?;
        Self::from_reader_compressed(reader, size)
    }
}
