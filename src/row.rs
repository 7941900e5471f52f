use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::{
    cmp::Ordering,
    io::{Read, Write},
    sync::Arc,
};

/// A single typed value inside a row
///
/// # Disk representation
///
/// \[type tag; 1 byte] \[value; 8 bytes], except byte strings:
/// \[type tag; 1 byte] \[length; 4 bytes] \[data; N bytes]
#[derive(Clone, Debug)]
pub enum Field {
    /// Signed 64-bit integer
    Int(i64),

    /// Unsigned 64-bit integer
    UInt(u64),

    /// 64-bit float
    Float(f64),

    /// Arbitrary byte string
    Bytes(Arc<[u8]>),
}

impl Field {
    fn tag(&self) -> u8 {
        match self {
            Self::Int(_) => 0,
            Self::UInt(_) => 1,
            Self::Float(_) => 2,
            Self::Bytes(_) => 3,
        }
    }

    /// Writes the field in its disk encoding
    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        writer.write_u8(self.tag())?;

        match self {
            Self::Int(value) => writer.write_i64::<BigEndian>(*value)?,
            Self::UInt(value) => writer.write_u64::<BigEndian>(*value)?,
            Self::Float(value) => writer.write_u64::<BigEndian>(value.to_bits())?,
            Self::Bytes(bytes) => {
                // NOTE: Truncation is okay and actually needed
                #[allow(clippy::cast_possible_truncation)]
                writer.write_u32::<BigEndian>(bytes.len() as u32)?;
                writer.write_all(bytes)?;
            }
        }

        Ok(())
    }

    /// Reads one field back from its disk encoding
    pub(crate) fn read_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let tag = reader.read_u8()?;

        Ok(match tag {
            0 => Self::Int(reader.read_i64::<BigEndian>()?),
            1 => Self::UInt(reader.read_u64::<BigEndian>()?),
            2 => Self::Float(f64::from_bits(reader.read_u64::<BigEndian>()?)),
            3 => {
                let len = reader.read_u32::<BigEndian>()? as usize;
                let mut bytes = vec![0u8; len];
                reader.read_exact(&mut bytes)?;
                Self::Bytes(bytes.into())
            }
            _ => return Err(crate::Error::InvalidFieldTag(tag)),
        })
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Field {}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Fields of the same kind compare by value. Floats use the IEEE total order
// so sort keys stay totally ordered. Mixed kinds order by type tag (a schema
// keeps every column homogeneous, so this only matters for degenerate input).
impl Ord for Field {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::UInt(a), Self::UInt(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

/// A row is a flat tuple of fields, one per table column
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row(
    /// Field values in schema column order
    pub Vec<Field>,
);

impl std::ops::Deref for Row {
    type Target = [Field];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for Row {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Row {
    /// Writes the row as a field count followed by every field's encoding
    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> crate::Result<()> {
        // NOTE: Truncation is okay and actually needed
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u16::<BigEndian>(self.0.len() as u16)?;

        for field in &self.0 {
            field.write_to(writer)?;
        }

        Ok(())
    }

    /// Reads one row back from its disk encoding
    pub(crate) fn read_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let field_count = reader.read_u16::<BigEndian>()? as usize;

        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(Field::read_from(reader)?);
        }

        Ok(Self(fields))
    }
}
