use std::{io::Cursor, path::Path, sync::Arc};

use anyhow::{Context, Result};
use polars::{frame::DataFrame, io::{SerReader, SerWriter}, prelude::{CsvReadOptions, CsvReader, CsvWriter, DataType, Field, Schema}};

use crate::common::open_for_write;

/// Read a score table, forcing the id column to text so leading zeros survive.
pub(crate) fn read_table(path: &Path, id_column: &str) -> Result<DataFrame> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("[io::csv] Failed to open CSV file: {}", path.display()))?;
    read_table_bytes(&bytes, id_column)
        .with_context(|| format!("[io::csv] Failed to read CSV from {}", path.display()))
}

pub(crate) fn read_table_bytes(bytes: &[u8], id_column: &str) -> Result<DataFrame> {
    let schema = Arc::new(Schema::from_iter([Field::new(id_column.into(), DataType::String)]));
    let options = CsvReadOptions::default()
        .with_has_header(true)
        .with_schema_overwrite(Some(schema));
    CsvReader::new(Cursor::new(bytes))
        .with_options(options)
        .finish()
        .context("[io::csv] Failed to parse CSV")
}

/// Atomically write a DataFrame to `path`.
pub(crate) fn write_table(df: &DataFrame, path: &Path) -> Result<()> {
    let mut pending = open_for_write(path)?;
    CsvWriter::new(&mut pending)
        .include_header(true)
        .finish(&mut df.clone())
        .with_context(|| format!("[io::csv] Failed to write CSV to {}", path.display()))?;
    pending.finalize()?;
    tracing::debug!(path = %path.display(), rows = df.height(), "wrote table");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::Column;

    #[test]
    fn id_column_keeps_leading_zeros() {
        let csv = b"DGUID,score\n0059,1.5\n0100,\n";
        let df = read_table_bytes(csv, "DGUID").unwrap();
        let ids: Vec<_> = df.column("DGUID").unwrap().str().unwrap().into_iter().flatten().collect();
        assert_eq!(ids, vec!["0059", "0100"]);
        assert_eq!(df.column("score").unwrap().null_count(), 1);
    }

    #[test]
    fn writes_nulls_as_empty_fields() {
        let df = DataFrame::new(vec![
            Column::new("DGUID".into(), vec!["a", "b"]),
            Column::new("x".into(), vec![Some(0.5), None]),
        ]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.csv");
        write_table(&df, &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "DGUID,x\na,0.5\nb,\n");
    }
}
