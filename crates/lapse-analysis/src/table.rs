//! Row-indexed result tables.
//!
//! A [`DataTable`] holds one row per analyzed frame number and one
//! column per named output, in declared order. Rows live in a
//! `BTreeMap` so iteration is always frame-ordered regardless of
//! insertion order (the parallel runner merges completion-ordered
//! results through the same path as the serial loop).

use std::collections::BTreeMap;

/// A single table value.
///
/// Equality is bitwise for floats so NaN-bearing rows (e.g. a lost
/// contour) compare stably in round-trip tests.
#[derive(Debug, Clone)]
pub enum Cell {
    /// Floating-point value.
    Float(f64),
    /// Integer value.
    Int(i64),
    /// Text value.
    Text(String),
    /// No value.
    Null,
}

impl Cell {
    /// The value as `f64`, when numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    fn to_field(&self) -> String {
        match self {
            Self::Float(v) => format_float(*v),
            Self::Int(v) => v.to_string(),
            Self::Text(v) => v.clone(),
            Self::Null => String::new(),
        }
    }

    fn from_field(field: &str) -> Self {
        if field.is_empty() {
            return Self::Null;
        }
        if let Ok(v) = field.parse::<i64>() {
            return Self::Int(v);
        }
        if let Ok(v) = field.parse::<f64>() {
            return Self::Float(v);
        }
        Self::Text(field.to_owned())
    }
}

/// Format a float so it round-trips as a float (never as an integer).
fn format_float(v: f64) -> String {
    if v.is_finite() && v == v.trunc() && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Null, Self::Null) => true,
            _ => false,
        }
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<Option<f64>> for Cell {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Self::Null, Self::Float)
    }
}

/// Failure while parsing a serialized table.
#[derive(Debug, thiserror::Error)]
#[error("line {line}: {reason}")]
pub struct TableParseError {
    /// 1-based line number.
    pub line: usize,
    /// What went wrong.
    pub reason: String,
}

/// Frame-indexed table with named, ordered columns.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    columns: Vec<String>,
    rows: BTreeMap<i64, Vec<Cell>>,
}

impl Default for DataTable {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Name of the index column in serialized form.
const INDEX_COLUMN: &str = "num";

/// Separator used by the serialized form.
const SEPARATOR: char = '\t';

impl DataTable {
    /// Create an empty table with the given column names.
    #[must_use]
    pub const fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: BTreeMap::new(),
        }
    }

    /// Column names in declared order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Frame numbers of all rows, ascending.
    #[must_use]
    pub fn nums(&self) -> Vec<i64> {
        self.rows.keys().copied().collect()
    }

    /// Insert or overwrite the row for frame `num`.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::RowShape`](crate::AnalysisError::RowShape)
    /// when the cell count does not match the column count.
    pub fn insert_row(&mut self, num: i64, cells: Vec<Cell>) -> Result<(), crate::AnalysisError> {
        if cells.len() != self.columns.len() {
            return Err(crate::AnalysisError::RowShape {
                num,
                expected: self.columns.len(),
                actual: cells.len(),
            });
        }
        self.rows.insert(num, cells);
        Ok(())
    }

    /// The row for frame `num`, if analyzed.
    #[must_use]
    pub fn row(&self, num: i64) -> Option<&[Cell]> {
        self.rows.get(&num).map(Vec::as_slice)
    }

    /// A single value by frame number and column name.
    #[must_use]
    pub fn get(&self, num: i64, column: &str) -> Option<&Cell> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(&num)?.get(index)
    }

    /// Iterate over `(frame number, row)` pairs in ascending frame
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &[Cell])> {
        self.rows.iter().map(|(num, cells)| (*num, cells.as_slice()))
    }

    /// Serialize to tab-separated text with a `num` index column.
    #[must_use]
    pub fn to_tsv(&self) -> String {
        let mut out = String::from(INDEX_COLUMN);
        for column in &self.columns {
            out.push(SEPARATOR);
            out.push_str(column);
        }
        out.push('\n');
        for (num, cells) in &self.rows {
            out.push_str(&num.to_string());
            for cell in cells {
                out.push(SEPARATOR);
                out.push_str(&cell.to_field());
            }
            out.push('\n');
        }
        out
    }

    /// Parse the serialized form produced by [`to_tsv`](Self::to_tsv).
    ///
    /// # Errors
    ///
    /// Returns [`TableParseError`] for a missing/invalid header, a
    /// non-integer index, or a row with the wrong field count.
    pub fn from_tsv(text: &str) -> Result<Self, TableParseError> {
        let mut lines = text.lines().enumerate();
        let Some((_, header)) = lines.next() else {
            return Err(TableParseError {
                line: 1,
                reason: "empty file".to_owned(),
            });
        };
        let mut header_fields = header.split(SEPARATOR);
        if header_fields.next() != Some(INDEX_COLUMN) {
            return Err(TableParseError {
                line: 1,
                reason: format!("header must start with '{INDEX_COLUMN}'"),
            });
        }
        let columns: Vec<String> = header_fields.map(str::to_owned).collect();

        let mut table = Self::new(columns);
        for (index, line) in lines {
            if line.is_empty() {
                continue;
            }
            let line_number = index + 1;
            let mut fields = line.split(SEPARATOR);
            let num = fields
                .next()
                .and_then(|f| f.parse::<i64>().ok())
                .ok_or_else(|| TableParseError {
                    line: line_number,
                    reason: "row index is not an integer".to_owned(),
                })?;
            let cells: Vec<Cell> = fields.map(Cell::from_field).collect();
            if cells.len() != table.columns.len() {
                return Err(TableParseError {
                    line: line_number,
                    reason: format!(
                        "expected {} fields, found {}",
                        table.columns.len(),
                        cells.len(),
                    ),
                });
            }
            table.rows.insert(num, cells);
        }
        Ok(table)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> DataTable {
        let mut table = DataTable::new(vec!["zone 1".to_owned(), "zone 2".to_owned()]);
        table
            .insert_row(0, vec![Cell::Float(10.0), Cell::Float(11.5)])
            .unwrap();
        table
            .insert_row(2, vec![Cell::Float(30.0), Cell::Null])
            .unwrap();
        table
    }

    #[test]
    fn insert_row_checks_shape() {
        let mut table = sample();
        assert!(matches!(
            table.insert_row(3, vec![Cell::Float(1.0)]),
            Err(crate::AnalysisError::RowShape {
                num: 3,
                expected: 2,
                actual: 1,
            }),
        ));
    }

    #[test]
    fn overwrite_replaces_only_that_row() {
        let mut table = sample();
        table
            .insert_row(0, vec![Cell::Float(99.0), Cell::Float(98.0)])
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "zone 1"), Some(&Cell::Float(99.0)));
        assert_eq!(table.get(2, "zone 1"), Some(&Cell::Float(30.0)));
    }

    #[test]
    fn rows_iterate_in_frame_order() {
        let mut table = DataTable::new(vec!["v".to_owned()]);
        table.insert_row(5, vec![Cell::Int(5)]).unwrap();
        table.insert_row(1, vec![Cell::Int(1)]).unwrap();
        table.insert_row(3, vec![Cell::Int(3)]).unwrap();
        assert_eq!(table.nums(), vec![1, 3, 5]);
    }

    #[test]
    fn tsv_round_trip_is_exact() {
        let table = sample();
        let text = table.to_tsv();
        let restored = DataTable::from_tsv(&text).unwrap();
        assert_eq!(restored, table);
    }

    #[test]
    fn tsv_round_trip_preserves_value_types() {
        let mut table = DataTable::new(vec!["f".to_owned(), "i".to_owned(), "t".to_owned()]);
        table
            .insert_row(
                0,
                vec![Cell::Float(5.0), Cell::Int(5), Cell::Text("five".to_owned())],
            )
            .unwrap();
        let restored = DataTable::from_tsv(&table.to_tsv()).unwrap();
        assert_eq!(restored.get(0, "f"), Some(&Cell::Float(5.0)));
        assert_eq!(restored.get(0, "i"), Some(&Cell::Int(5)));
        assert_eq!(restored.get(0, "t"), Some(&Cell::Text("five".to_owned())));
    }

    #[test]
    fn tsv_round_trip_keeps_nan() {
        let mut table = DataTable::new(vec!["v".to_owned()]);
        table.insert_row(0, vec![Cell::Float(f64::NAN)]).unwrap();
        let restored = DataTable::from_tsv(&table.to_tsv()).unwrap();
        assert_eq!(restored, table);
    }

    #[test]
    fn from_tsv_rejects_bad_header() {
        let err = DataTable::from_tsv("frame\tv\n0\t1\n").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn from_tsv_rejects_short_row() {
        let err = DataTable::from_tsv("num\ta\tb\n0\t1\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn cell_float_int_inequality() {
        assert_ne!(Cell::Float(5.0), Cell::Int(5));
        assert_eq!(Cell::Float(f64::NAN), Cell::Float(f64::NAN));
    }
}
