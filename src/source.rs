//! Reading the sales CSV file.

use crate::model::RawRow;
use crate::{utils, Result};
use anyhow::{bail, Context};
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// The raw content of a sales file: the header row and the data rows, untyped.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SalesTable {
    headers: Vec<String>,
    rows: Vec<RawRow>,
}

impl SalesTable {
    pub fn new(headers: Vec<String>, rows: Vec<RawRow>) -> Self {
        Self { headers, rows }
    }

    /// Reads a UTF-8 CSV file. A leading byte order mark is ignored and rows may have any number
    /// of fields; row width is checked later, by validation. A data row that is not valid UTF-8
    /// is kept as `RawRow::NotUtf8` so that validation can reject it on its own.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = utils::read_bytes(path).await?;
        Self::parse(&bytes).with_context(|| format!("Unable to read CSV from {}", path.display()))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let headers: Vec<String> = reader
            .headers()
            .context("Unable to read the header row")?
            .iter()
            .map(str::to_string)
            .collect();
        if headers.iter().all(|h| h.trim().is_empty()) {
            bail!("The file has no header row");
        }

        let mut rows = Vec::new();
        for (ix, record) in reader.byte_records().enumerate() {
            let record = record.with_context(|| format!("Unable to read data row {}", ix + 1))?;
            rows.push(decode(&record));
        }
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<RawRow> {
        self.rows
    }
}

fn decode(record: &csv::ByteRecord) -> RawRow {
    let mut fields = Vec::with_capacity(record.len());
    for (field, bytes) in record.iter().enumerate() {
        match std::str::from_utf8(bytes) {
            Ok(text) => fields.push(text.to_string()),
            Err(_) => return RawRow::NotUtf8 { field },
        }
    }
    RawRow::Text(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn text(row: &RawRow) -> &[String] {
        match row {
            RawRow::Text(fields) => fields,
            other => panic!("expected a text row, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_strips_bom_and_keeps_ragged_rows() {
        let data = "\u{feff}日付,商品名,売上金額\n2024-03-15,\"りんご, 青森産\",1000\n2024-03-16,みかん\n";
        let table = SalesTable::parse(data.as_bytes()).unwrap();
        assert_eq!(table.headers(), &["日付", "商品名", "売上金額"]);
        assert_eq!(table.rows().len(), 2);
        assert_eq!(text(&table.rows()[0])[1], "りんご, 青森産");
        assert_eq!(text(&table.rows()[1]).len(), 2);
    }

    #[test]
    fn test_parse_keeps_rows_around_invalid_utf8() {
        let data = b"\xE6\x97\xA5\xE4\xBB\x98,amount\n2024-01-01,5\n2024-01-02,\xff\xfe\n2024-01-03,7\n";
        let table = SalesTable::parse(data).unwrap();
        assert_eq!(table.rows().len(), 3);
        assert_eq!(text(&table.rows()[0]), &["2024-01-01", "5"]);
        assert_eq!(table.rows()[1], RawRow::NotUtf8 { field: 1 });
        assert_eq!(text(&table.rows()[2]), &["2024-01-03", "7"]);
    }

    #[test]
    fn test_parse_empty() {
        assert!(SalesTable::parse(b"").is_err());
    }

    #[tokio::test]
    async fn test_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sales.csv");
        utils::write(&path, "日付,売上金額\n2024-01-01,5\n").await.unwrap();
        let table = SalesTable::load(&path).await.unwrap();
        assert_eq!(
            table.into_rows(),
            vec![RawRow::from(vec!["2024-01-01", "5"])]
        );
        assert!(SalesTable::load(&dir.path().join("missing.csv")).await.is_err());
    }
}
