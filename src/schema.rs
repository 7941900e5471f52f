use crate::row::Row;
use std::sync::Arc;

/// Data type of a column
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ColumnKind {
    /// Signed 64-bit integer
    Int,

    /// Unsigned 64-bit integer
    UInt,

    /// 64-bit float
    Float,

    /// Arbitrary byte string
    Bytes,
}

/// A named, typed table column
#[derive(Clone, Debug)]
pub struct ColumnSchema {
    /// Column name
    pub name: Arc<str>,

    /// Column type
    pub kind: ColumnKind,
}

/// Sort direction of a primary-key column
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SortOrder {
    /// Smallest key first
    Ascending,

    /// Largest key first
    Descending,
}

/// One column of the sort description, resolved to a column index
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SortColumn {
    /// Index into the schema's column list
    pub column: usize,

    /// Sort direction
    pub order: SortOrder,
}

/// The primary key: ordered sort columns defining row order within a part
#[derive(Clone, Debug, Default)]
pub struct SortDescription(
    /// Sort columns, most significant first
    pub Vec<SortColumn>,
);

impl SortDescription {
    /// Extracts the primary-key tuple of a row
    #[must_use]
    pub fn key_of(&self, row: &Row) -> Row {
        Row(self.0.iter().map(|c| row[c.column].clone()).collect())
    }
}

/// Row-collapsing policy applied while merging parts
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MergeMode {
    /// Every input row is kept
    Ordinary,

    /// Rows carry a ±1 sign column; key groups with balanced signs annihilate,
    /// unbalanced groups keep the surplus
    Collapsing {
        /// Name of the sign column
        sign_column: Arc<str>,
    },

    /// Equal-key rows are folded into one by summing the given numeric columns
    Summing {
        /// Names of the columns to sum
        columns: Vec<Arc<str>>,
    },
}

/// Schema of one table: its columns, primary key and merge mode
#[derive(Clone, Debug)]
pub struct TableSchema {
    /// All table columns, in storage order
    pub columns: Vec<ColumnSchema>,

    /// Primary-key column names with their sort direction
    pub primary_key: Vec<(Arc<str>, SortOrder)>,

    /// Merge mode of the table
    pub mode: MergeMode,
}

impl TableSchema {
    /// Index of a column by name
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| &*c.name == name)
    }

    /// Resolves the primary-key column names into a sort description
    ///
    /// # Errors
    ///
    /// Will return `Err` if a primary-key column does not exist.
    pub fn sort_description(&self) -> crate::Result<SortDescription> {
        let mut columns = Vec::with_capacity(self.primary_key.len());

        for (name, order) in &self.primary_key {
            let column = self
                .column_index(name)
                .ok_or_else(|| crate::Error::UnknownColumn(name.clone()))?;

            columns.push(SortColumn {
                column,
                order: *order,
            });
        }

        Ok(SortDescription(columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn resolve_sort_description() -> crate::Result<()> {
        let schema = TableSchema {
            columns: vec![
                ColumnSchema {
                    name: "value".into(),
                    kind: ColumnKind::UInt,
                },
                ColumnSchema {
                    name: "id".into(),
                    kind: ColumnKind::UInt,
                },
            ],
            primary_key: vec![("id".into(), SortOrder::Ascending)],
            mode: MergeMode::Ordinary,
        };

        let sort = schema.sort_description()?;
        assert_eq!(1, sort.0.len());
        assert_eq!(1, sort.0.first().expect("should exist").column);

        Ok(())
    }

    #[test]
    fn unknown_key_column() {
        let schema = TableSchema {
            columns: vec![],
            primary_key: vec![("missing".into(), SortOrder::Ascending)],
            mode: MergeMode::Ordinary,
        };

        assert!(schema.sort_description().is_err());
    }
}
