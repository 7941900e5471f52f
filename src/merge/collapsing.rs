use crate::row::{Field, Row};

/// Folds a key group of ±1-signed rows down to its surplus.
///
/// A balanced group (as many `+1` as `-1` rows) annihilates completely. A
/// positive surplus keeps the group's last row, a negative surplus keeps the
/// first row, repeated `|surplus|` times (typically once).
pub(crate) struct SignCollapser {
    sign_column: usize,

    sign_sum: i64,
    first: Option<Row>,
    last: Option<Row>,

    /// Key groups whose surplus was larger than one row
    unbalanced: u64,
}

impl SignCollapser {
    pub(crate) fn new(sign_column: usize) -> Self {
        Self {
            sign_column,
            sign_sum: 0,
            first: None,
            last: None,
            unbalanced: 0,
        }
    }

    fn sign_of(&self, row: &Row) -> crate::Result<i64> {
        match row.get(self.sign_column) {
            Some(Field::Int(value)) => Ok(if *value < 0 { -1 } else { 1 }),
            _ => Err(crate::Error::ColumnKindMismatch(self.sign_column)),
        }
    }

    pub(crate) fn push(&mut self, row: Row) -> crate::Result<()> {
        self.sign_sum += self.sign_of(&row)?;

        if self.first.is_none() {
            self.first = Some(row.clone());
        }
        self.last = Some(row);

        Ok(())
    }

    pub(crate) fn flush(&mut self, out: &mut Vec<Row>) {
        let surplus = self.sign_sum;

        if surplus > 0 {
            if let Some(mut row) = self.last.take() {
                row[self.sign_column] = Field::Int(1);

                for _ in 0..surplus {
                    out.push(row.clone());
                }
            }
        } else if surplus < 0 {
            if let Some(mut row) = self.first.take() {
                row[self.sign_column] = Field::Int(-1);

                for _ in 0..-surplus {
                    out.push(row.clone());
                }
            }
        }

        if surplus.unsigned_abs() > 1 {
            self.unbalanced += 1;
        }

        self.sign_sum = 0;
        self.first = None;
        self.last = None;
    }

    pub(crate) fn unbalanced(&self) -> u64 {
        self.unbalanced
    }
}
