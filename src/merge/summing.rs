use crate::row::{Field, Row};

/// Folds a key group into a single row by summing the declared numeric
/// columns. Key columns and all other columns keep the first row's values.
pub(crate) struct SummingFolder {
    columns: Vec<usize>,
    acc: Option<Row>,
}

impl SummingFolder {
    pub(crate) fn new(columns: Vec<usize>) -> Self {
        Self { columns, acc: None }
    }

    pub(crate) fn push(&mut self, row: Row) -> crate::Result<()> {
        let Some(acc) = &mut self.acc else {
            self.acc = Some(row);
            return Ok(());
        };

        for &column in &self.columns {
            let rhs = row
                .get(column)
                .ok_or(crate::Error::ColumnKindMismatch(column))?;

            let lhs = acc
                .get_mut(column)
                .ok_or(crate::Error::ColumnKindMismatch(column))?;

            match (lhs, rhs) {
                (Field::Int(a), Field::Int(b)) => *a = a.wrapping_add(*b),
                (Field::UInt(a), Field::UInt(b)) => *a = a.wrapping_add(*b),
                (Field::Float(a), Field::Float(b)) => *a += *b,
                _ => return Err(crate::Error::ColumnKindMismatch(column)),
            }
        }

        Ok(())
    }

    pub(crate) fn flush(&mut self, out: &mut Vec<Row>) {
        if let Some(row) = self.acc.take() {
            out.push(row);
        }
    }
}
