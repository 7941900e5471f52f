//! The primary index of a part: the first primary-key tuple of every granule.

use super::PRIMARY_INDEX_FILE;
use crate::row::Row;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Writes the primary index file of a part
pub fn write(dir: &Path, keys: &[Row]) -> crate::Result<()> {
    let file = File::create(dir.join(PRIMARY_INDEX_FILE))?;
    let mut writer = BufWriter::new(file);

    // NOTE: Truncation is okay and actually needed
    #[allow(clippy::cast_possible_truncation)]
    writer.write_u32::<BigEndian>(keys.len() as u32)?;

    for key in keys {
        key.write_to(&mut writer)?;
    }

    writer.flush()?;
    writer.get_mut().sync_all()?;

    Ok(())
}

/// Loads the primary index of a part back from disk
pub fn load(dir: &Path) -> crate::Result<Vec<Row>> {
    let file = File::open(dir.join(PRIMARY_INDEX_FILE))?;
    let mut reader = BufReader::new(file);

    let key_count = reader.read_u32::<BigEndian>()? as usize;

    let mut keys = Vec::with_capacity(key_count);
    for _ in 0..key_count {
        keys.push(Row::read_from(&mut reader)?);
    }

    Ok(keys)
}
