//! Canonical row shapes and their CSV staging encoding

use crate::error::{Result, SyncError};

/// A warehouse-ready record with a fixed ordered column list
pub trait CanonicalRow {
    const COLUMNS: &'static [&'static str];

    /// Cell values in `COLUMNS` order; absent values are empty strings
    fn cells(&self) -> Vec<String>;
}

/// Encode typed rows as CSV with a header line
pub fn rows_to_csv<R: CanonicalRow>(rows: &[R]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(R::COLUMNS)?;
    for row in rows {
        let cells = row.cells();
        if cells.len() != R::COLUMNS.len() {
            return Err(SyncError::transform(format!(
                "row has {} cells, expected {}",
                cells.len(),
                R::COLUMNS.len()
            )));
        }
        writer.write_record(&cells)?;
    }
    finish(writer)
}

/// Rows whose columns are only known at run time (event feeds)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
        }
        finish(writer)
    }
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| SyncError::Io(e.into_error()))
}
