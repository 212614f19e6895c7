//! The typed sales record and the validation that produces it from raw CSV rows.

use crate::error::ValidationError;
use crate::model::Amount;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// The header of a sales file along with the positions of the two columns that a `Record` needs.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Schema {
    headers: Vec<String>,
    date_ix: usize,
    amount_ix: usize,
}

impl Schema {
    /// Locates `date_column` and `amount_column` in `headers`.
    pub fn new<S, I>(headers: I, date_column: &str, amount_column: &str) -> Result<Self, ValidationError>
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        let headers: Vec<String> = headers.into_iter().map(|s| s.into()).collect();
        let position = |column: &str| {
            headers
                .iter()
                .position(|h| h.trim() == column)
                .ok_or_else(|| ValidationError::MissingColumn {
                    column: column.to_string(),
                })
        };
        let date_ix = position(date_column)?;
        let amount_ix = position(amount_column)?;
        Ok(Self {
            headers,
            date_ix,
            amount_ix,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Whether a batch keeps going past a row that fails validation.
#[derive(
    Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Record the rejected row and continue with the next one.
    #[default]
    Skip,
    /// Stop at the first invalid row.
    Abort,
}

serde_plain::derive_display_from_serialize!(ValidationPolicy);
serde_plain::derive_fromstr_from_deserialize!(ValidationPolicy);

/// A single validated row of sales data.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Record {
    /// 1-based data row number in the source file.
    row: usize,
    date: NaiveDate,
    amount: Amount,
    /// Every field of the source row, verbatim and in source column order.
    fields: Vec<String>,
}

impl Record {
    /// Parses `raw` (the fields of data row `row`) according to `schema`.
    ///
    /// Rows shorter than the header are padded with empty fields; rows longer than the header are
    /// rejected. The date and the amount must both be present and parseable.
    pub fn parse<S, I>(schema: &Schema, row: usize, raw: I) -> Result<Self, ValidationError>
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        let mut fields: Vec<String> = raw.into_iter().map(|s| s.into()).collect();
        if fields.len() > schema.len() {
            return Err(ValidationError::RowLength {
                row,
                expected: schema.len(),
                found: fields.len(),
            });
        }
        fields.resize(schema.len(), String::new());

        let raw_date = fields[schema.date_ix].trim();
        if raw_date.is_empty() {
            return Err(ValidationError::MissingDate { row });
        }
        let date = parse_date(raw_date).ok_or_else(|| ValidationError::InvalidDate {
            row,
            value: raw_date.to_string(),
        })?;

        let raw_amount = fields[schema.amount_ix].trim();
        if raw_amount.is_empty() {
            return Err(ValidationError::MissingAmount { row });
        }
        let amount = Amount::from_str(raw_amount).map_err(|_| ValidationError::InvalidAmount {
            row,
            value: raw_amount.to_string(),
        })?;

        Ok(Self {
            row,
            date,
            amount,
            fields,
        })
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// One source row before validation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RawRow {
    Text(Vec<String>),
    /// The row could not be decoded; `field` is the 0-based position of the first bad field.
    NotUtf8 { field: usize },
}

impl<S: Into<String>> From<Vec<S>> for RawRow {
    fn from(fields: Vec<S>) -> Self {
        RawRow::Text(fields.into_iter().map(Into::into).collect())
    }
}

/// A row that was skipped under `ValidationPolicy::Skip`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct RejectedRow {
    row: usize,
    reason: String,
}

impl RejectedRow {
    pub fn row(&self) -> usize {
        self.row
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// The result of validating a batch of rows.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct Validated {
    records: Vec<Record>,
    rejected: Vec<RejectedRow>,
}

impl Validated {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn rejected(&self) -> &[RejectedRow] {
        &self.rejected
    }

    pub fn into_parts(self) -> (Vec<Record>, Vec<RejectedRow>) {
        (self.records, self.rejected)
    }
}

/// Validates every row in `rows`. Rows are numbered from 1 in iteration order.
///
/// # Errors
/// Under `ValidationPolicy::Abort` the first invalid row is returned as the error. Under
/// `ValidationPolicy::Skip` this never fails; invalid rows are collected in `Validated::rejected`.
pub fn validate<R>(
    schema: &Schema,
    rows: impl IntoIterator<Item = R>,
    policy: ValidationPolicy,
) -> Result<Validated, ValidationError>
where
    R: Into<RawRow>,
{
    let mut validated = Validated::default();
    for (ix, raw) in rows.into_iter().enumerate() {
        let row = ix + 1;
        let parsed = match raw.into() {
            RawRow::Text(fields) => Record::parse(schema, row, fields),
            RawRow::NotUtf8 { field } => Err(ValidationError::InvalidEncoding {
                row,
                column: field + 1,
            }),
        };
        match parsed {
            Ok(record) => validated.records.push(record),
            Err(e) => match policy {
                ValidationPolicy::Abort => return Err(e),
                ValidationPolicy::Skip => {
                    tracing::warn!("Skipping invalid row: {e}");
                    validated.rejected.push(RejectedRow {
                        row,
                        reason: e.to_string(),
                    });
                }
            },
        }
    }
    Ok(validated)
}

/// Parses the calendar date of `s`. Timestamps keep the date of their own offset, so
/// `2024-03-31T23:30:00+09:00` is March 31st regardless of where this program runs.
fn parse_date(s: &str) -> Option<NaiveDate> {
    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
    {
        return Some(date);
    }
    if let Some(date_time) = DATE_TIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
    {
        return Some(date_time.date());
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}
