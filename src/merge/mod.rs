//! k-way merging of sorted part streams, with mode-specific row collapsing

mod collapsing;
mod summing;

use crate::{
    block::Block,
    row::Row,
    schema::{MergeMode, SortDescription, SortOrder, TableSchema},
    source::SortedStream,
};
use min_max_heap::MinMaxHeap;
use std::collections::VecDeque;

/// One component of a comparable sort key, honoring its column's direction
#[derive(Clone, Debug)]
struct KeyPart {
    field: crate::row::Field,
    order: SortOrder,
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field
    }
}

impl Eq for KeyPart {}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.order {
            SortOrder::Ascending => self.field.cmp(&other.field),
            SortOrder::Descending => other.field.cmp(&self.field),
        }
    }
}

type SortKey = Vec<KeyPart>;

fn make_key(row: &Row, sort: &SortDescription) -> SortKey {
    sort.0
        .iter()
        .map(|c| KeyPart {
            field: row[c.column].clone(),
            order: c.order,
        })
        .collect()
}

/// Heap entry: the row's sort key plus its source index.
///
/// Ties on the key fall back to the source index, which keeps the merge
/// stable across sources.
#[derive(Debug)]
struct HeapEntry {
    key: SortKey,
    source: usize,
    row: Row,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key
            .cmp(&other.key)
            .then(self.source.cmp(&other.source))
    }
}

/// The mode-specific row combiner, resolved to column indices
enum Combiner {
    Ordinary,
    Collapsing(collapsing::SignCollapser),
    Summing(summing::SummingFolder),
}

impl Combiner {
    fn for_schema(schema: &TableSchema) -> crate::Result<Self> {
        Ok(match &schema.mode {
            MergeMode::Ordinary => Self::Ordinary,

            MergeMode::Collapsing { sign_column } => {
                let column = schema
                    .column_index(sign_column)
                    .ok_or_else(|| crate::Error::UnknownColumn(sign_column.clone()))?;

                Self::Collapsing(collapsing::SignCollapser::new(column))
            }

            MergeMode::Summing { columns } => {
                let mut indices = Vec::with_capacity(columns.len());

                for name in columns {
                    indices.push(
                        schema
                            .column_index(name)
                            .ok_or_else(|| crate::Error::UnknownColumn(name.clone()))?,
                    );
                }

                Self::Summing(summing::SummingFolder::new(indices))
            }
        })
    }

    fn push(&mut self, row: Row, out: &mut Vec<Row>) -> crate::Result<()> {
        match self {
            Self::Ordinary => {
                out.push(row);
                Ok(())
            }
            Self::Collapsing(collapser) => collapser.push(row),
            Self::Summing(folder) => folder.push(row),
        }
    }

    fn flush(&mut self, out: &mut Vec<Row>) {
        match self {
            Self::Ordinary => {}
            Self::Collapsing(collapser) => collapser.flush(out),
            Self::Summing(folder) => folder.flush(out),
        }
    }
}

struct SourceCursor {
    stream: Box<dyn SortedStream>,
    buffer: VecDeque<Row>,
}

impl SourceCursor {
    fn next_row(&mut self) -> crate::Result<Option<Row>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }

            match self.stream.read()? {
                Some(block) => self.buffer.extend(block.rows),
                None => return Ok(None),
            }
        }
    }
}

/// Merges k sorted sources into one sorted stream of blocks, applying the
/// table's merge mode to every maximal run of rows sharing the primary key.
///
/// When multiple sources tie on the key, rows are emitted in order of source
/// index. Sources are expected in ascending block-id order, so rows from
/// later insertions win ties; the collapsing and summing modes rely on this.
#[allow(clippy::module_name_repetitions)]
pub struct MergingReader {
    cursors: Vec<SourceCursor>,
    heap: MinMaxHeap<HeapEntry>,
    sort: SortDescription,
    combiner: Combiner,

    block_size: usize,
    out: Vec<Row>,
    current_key: Option<SortKey>,

    exhausted: bool,
    is_initialized: bool,
}

impl MergingReader {
    /// Builds a merging reader over the given sources
    ///
    /// # Errors
    ///
    /// Will return `Err` if the schema's merge mode references an unknown column.
    pub fn new(
        sources: Vec<Box<dyn SortedStream>>,
        schema: &TableSchema,
        block_size: usize,
    ) -> crate::Result<Self> {
        let sort = schema.sort_description()?;
        let combiner = Combiner::for_schema(schema)?;

        let cursors = sources
            .into_iter()
            .map(|stream| SourceCursor {
                stream,
                buffer: VecDeque::new(),
            })
            .collect();

        Ok(Self {
            cursors,
            heap: MinMaxHeap::new(),
            sort,
            combiner,
            block_size,
            out: Vec::new(),
            current_key: None,
            exhausted: false,
            is_initialized: false,
        })
    }

    /// Opens all sources and primes the merge heap
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn read_prefix(&mut self) -> crate::Result<()> {
        if self.is_initialized {
            return Ok(());
        }

        for cursor in &mut self.cursors {
            cursor.stream.read_prefix()?;
        }

        for idx in 0..self.cursors.len() {
            self.advance(idx)?;
        }

        self.is_initialized = true;

        Ok(())
    }

    fn advance(&mut self, idx: usize) -> crate::Result<()> {
        let cursor = self.cursors.get_mut(idx).expect("source should exist");

        if let Some(row) = cursor.next_row()? {
            let key = make_key(&row, &self.sort);

            self.heap.push(HeapEntry {
                key,
                source: idx,
                row,
            });
        }

        Ok(())
    }

    /// Next merged block, or `None` once all sources are exhausted.
    ///
    /// Every block holds exactly `block_size` rows, except the final one.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn read(&mut self) -> crate::Result<Option<Block>> {
        if !self.is_initialized {
            self.read_prefix()?;
        }

        while !self.exhausted && self.out.len() < self.block_size {
            match self.heap.pop_min() {
                Some(HeapEntry { key, source, row }) => {
                    self.advance(source)?;

                    if self.current_key.as_ref() != Some(&key) {
                        self.combiner.flush(&mut self.out);
                        self.current_key = Some(key);
                    }

                    self.combiner.push(row, &mut self.out)?;
                }
                None => {
                    self.combiner.flush(&mut self.out);
                    self.exhausted = true;
                }
            }
        }

        if self.out.is_empty() {
            return Ok(None);
        }

        let take = self.block_size.min(self.out.len());
        let rows: Vec<Row> = self.out.drain(..take).collect();

        Ok(Some(Block::new(rows)))
    }

    /// Closes all sources
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn read_suffix(&mut self) -> crate::Result<()> {
        for cursor in &mut self.cursors {
            cursor.stream.read_suffix()?;
        }

        let unbalanced = self.unbalanced_groups();
        if unbalanced > 0 {
            log::debug!("{unbalanced} sign groups kept a surplus after collapsing");
        }

        Ok(())
    }

    /// Key groups whose sign surplus was larger than one row (collapsing mode)
    #[must_use]
    pub fn unbalanced_groups(&self) -> u64 {
        match &self.combiner {
            Combiner::Collapsing(collapser) => collapser.unbalanced(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        row::Field,
        schema::{ColumnKind, ColumnSchema, SortOrder},
    };
    use test_log::test;

    struct VecSource {
        blocks: VecDeque<Block>,
    }

    impl VecSource {
        fn new(rows: Vec<Row>) -> Box<dyn SortedStream> {
            Box::new(Self {
                blocks: VecDeque::from(vec![Block::new(rows)]),
            })
        }
    }

    impl SortedStream for VecSource {
        fn read(&mut self) -> crate::Result<Option<Block>> {
            Ok(self.blocks.pop_front())
        }
    }

    fn schema(mode: MergeMode) -> TableSchema {
        TableSchema {
            columns: vec![
                ColumnSchema {
                    name: "id".into(),
                    kind: ColumnKind::UInt,
                },
                ColumnSchema {
                    name: "sign".into(),
                    kind: ColumnKind::Int,
                },
                ColumnSchema {
                    name: "value".into(),
                    kind: ColumnKind::UInt,
                },
            ],
            primary_key: vec![("id".into(), SortOrder::Ascending)],
            mode,
        }
    }

    fn row(id: u64, sign: i64, value: u64) -> Row {
        Row(vec![Field::UInt(id), Field::Int(sign), Field::UInt(value)])
    }

    fn collect(reader: &mut MergingReader) -> crate::Result<Vec<Row>> {
        let mut rows = vec![];

        reader.read_prefix()?;
        while let Some(block) = reader.read()? {
            rows.extend(block.rows);
        }
        reader.read_suffix()?;

        Ok(rows)
    }

    #[test]
    fn ordinary_merge_is_sorted() -> crate::Result<()> {
        let a = VecSource::new(vec![row(1, 1, 0), row(3, 1, 0), row(5, 1, 0)]);
        let b = VecSource::new(vec![row(2, 1, 0), row(4, 1, 0), row(6, 1, 0)]);

        let mut reader = MergingReader::new(vec![a, b], &schema(MergeMode::Ordinary), 100)?;
        let rows = collect(&mut reader)?;

        let ids: Vec<u64> = rows
            .iter()
            .map(|r| match r[0] {
                Field::UInt(id) => id,
                _ => unreachable!(),
            })
            .collect();

        assert_eq!(vec![1, 2, 3, 4, 5, 6], ids);

        Ok(())
    }

    #[test]
    fn equal_keys_keep_source_order() -> crate::Result<()> {
        // Both sources carry the same keys; the value column marks the origin
        let a = VecSource::new(vec![row(1, 1, 10), row(2, 1, 10)]);
        let b = VecSource::new(vec![row(1, 1, 20), row(2, 1, 20)]);

        let mut reader = MergingReader::new(vec![a, b], &schema(MergeMode::Ordinary), 100)?;
        let rows = collect(&mut reader)?;

        assert_eq!(
            vec![row(1, 1, 10), row(1, 1, 20), row(2, 1, 10), row(2, 1, 20)],
            rows
        );

        Ok(())
    }

    #[test]
    fn blocks_have_fixed_size() -> crate::Result<()> {
        let a = VecSource::new((0..5).map(|i| row(i, 1, 0)).collect());

        let mut reader = MergingReader::new(vec![a], &schema(MergeMode::Ordinary), 2)?;

        reader.read_prefix()?;
        assert_eq!(2, reader.read()?.expect("should read").len());
        assert_eq!(2, reader.read()?.expect("should read").len());
        assert_eq!(1, reader.read()?.expect("should read").len());
        assert!(reader.read()?.is_none());

        Ok(())
    }

    #[test]
    fn collapsing_balanced_group_annihilates() -> crate::Result<()> {
        let mode = MergeMode::Collapsing {
            sign_column: "sign".into(),
        };

        let a = VecSource::new(vec![row(1, 1, 10), row(2, 1, 10)]);
        let b = VecSource::new(vec![row(1, -1, 10)]);

        let mut reader = MergingReader::new(vec![a, b], &schema(mode), 100)?;
        let rows = collect(&mut reader)?;

        // Key 1 balances out, key 2 stays
        assert_eq!(vec![row(2, 1, 10)], rows);

        Ok(())
    }

    #[test]
    fn collapsing_surplus_keeps_last_row() -> crate::Result<()> {
        let mode = MergeMode::Collapsing {
            sign_column: "sign".into(),
        };

        let a = VecSource::new(vec![row(1, 1, 10), row(1, 1, 10)]);
        let b = VecSource::new(vec![row(1, -1, 20)]);

        let mut reader = MergingReader::new(vec![a, b], &schema(mode), 100)?;
        let rows = collect(&mut reader)?;

        // Surplus of +1: the group's last row survives with sign +1
        assert_eq!(vec![row(1, 1, 20)], rows);

        Ok(())
    }

    #[test]
    fn collapsing_preserves_sign_sum() -> crate::Result<()> {
        let mode = MergeMode::Collapsing {
            sign_column: "sign".into(),
        };

        let a = VecSource::new(vec![row(1, 1, 0), row(1, 1, 0), row(1, 1, 0), row(2, -1, 0)]);
        let b = VecSource::new(vec![row(1, -1, 0), row(2, 1, 0), row(3, 1, 0)]);

        let mut reader = MergingReader::new(vec![a, b], &schema(mode), 100)?;
        let rows = collect(&mut reader)?;

        let sign_sum: i64 = rows
            .iter()
            .map(|r| match r[1] {
                Field::Int(sign) => sign,
                _ => unreachable!(),
            })
            .sum();

        // Input sum: (+3 -1) + (-1 +1) + (+1) = 3
        assert_eq!(3, sign_sum);
        assert_eq!(1, reader.unbalanced_groups());

        Ok(())
    }

    #[test]
    fn summing_folds_groups() -> crate::Result<()> {
        let mode = MergeMode::Summing {
            columns: vec!["value".into()],
        };

        let a = VecSource::new(vec![row(1, 1, 10), row(2, 1, 5)]);
        let b = VecSource::new(vec![row(1, 1, 32)]);

        let mut reader = MergingReader::new(vec![a, b], &schema(mode), 100)?;
        let rows = collect(&mut reader)?;

        assert_eq!(vec![row(1, 1, 42), row(2, 1, 5)], rows);

        Ok(())
    }

    #[test]
    fn descending_key_order() -> crate::Result<()> {
        let mut schema = schema(MergeMode::Ordinary);
        schema.primary_key = vec![("id".into(), SortOrder::Descending)];

        let a = VecSource::new(vec![row(5, 1, 0), row(3, 1, 0)]);
        let b = VecSource::new(vec![row(4, 1, 0)]);

        let mut reader = MergingReader::new(vec![a, b], &schema, 100)?;
        let rows = collect(&mut reader)?;

        let ids: Vec<u64> = rows
            .iter()
            .map(|r| match r[0] {
                Field::UInt(id) => id,
                _ => unreachable!(),
            })
            .collect();

        assert_eq!(vec![5, 4, 3], ids);

        Ok(())
    }
}
