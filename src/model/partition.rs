//! Grouping of records into calendar-month partitions.

use crate::model::Record;
use anyhow::ensure;
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// The (year, month) that a record belongs to. Orders by year, then month.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct PartitionKey {
    year: i32,
    month: u32,
}

impl PartitionKey {
    pub fn new(year: i32, month: u32) -> crate::Result<Self> {
        ensure!(
            (1..=12).contains(&month),
            "Month must be between 1 and 12, got {month}"
        );
        Ok(Self { year, month })
    }

    /// The key of the calendar month that contains `date`.
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl Display for PartitionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// The records of one calendar month, in input order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Partition {
    key: PartitionKey,
    records: Vec<Record>,
}

impl Partition {
    pub fn key(&self) -> PartitionKey {
        self.key
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// The total amount, or `None` when it does not fit in a `Decimal`.
    pub fn sum(&self) -> Option<Decimal> {
        self.records
            .iter()
            .try_fold(Decimal::ZERO, |acc, r| acc.checked_add(r.amount().value()))
    }

    /// The mean amount, or `None` for an empty partition (which `partition` never produces) or
    /// one whose total overflows.
    pub fn mean(&self) -> Option<Decimal> {
        if self.records.is_empty() {
            return None;
        }
        self.sum()?.checked_div(Decimal::from(self.records.len()))
    }
}

/// All partitions of a record set, enumerated in ascending key order.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Partitions(BTreeMap<PartitionKey, Partition>);

impl Partitions {
    pub fn get(&self, key: &PartitionKey) -> Option<&Partition> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = PartitionKey> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.0.values()
    }

    /// Total number of records across all partitions.
    pub fn record_count(&self) -> usize {
        self.0.values().map(Partition::count).sum()
    }
}

impl IntoIterator for Partitions {
    type Item = Partition;
    type IntoIter = std::collections::btree_map::IntoValues<PartitionKey, Partition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}

/// Groups `records` by the calendar month of their own date. Each record lands in exactly one
/// partition and keeps its relative input order there.
pub fn partition(records: impl IntoIterator<Item = Record>) -> Partitions {
    let mut map: BTreeMap<PartitionKey, Partition> = BTreeMap::new();
    for record in records {
        let key = PartitionKey::from_date(record.date());
        map.entry(key)
            .or_insert_with(|| Partition {
                key,
                records: Vec::new(),
            })
            .records
            .push(record);
    }
    Partitions(map)
}

/// Per-partition figures for reporting.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PartitionSummary {
    key: PartitionKey,
    count: usize,
    sum: Option<Decimal>,
    mean: Option<Decimal>,
}

impl PartitionSummary {
    pub fn key(&self) -> PartitionKey {
        self.key
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn sum(&self) -> Option<Decimal> {
        self.sum
    }
}

impl From<&Partition> for PartitionSummary {
    fn from(p: &Partition) -> Self {
        Self {
            key: p.key(),
            count: p.count(),
            sum: p.sum(),
            mean: p.mean(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Schema;

    fn records(rows: &[(&str, &str)]) -> Vec<Record> {
        let schema = Schema::new(vec!["日付", "売上金額"], "日付", "売上金額").unwrap();
        rows.iter()
            .enumerate()
            .map(|(ix, (d, a))| Record::parse(&schema, ix + 1, vec![*d, *a]).unwrap())
            .collect()
    }

    #[test]
    fn test_partition_key_rejects_bad_month() {
        assert!(PartitionKey::new(2024, 0).is_err());
        assert!(PartitionKey::new(2024, 13).is_err());
        assert_eq!(PartitionKey::new(2024, 3).unwrap().to_string(), "2024-03");
    }

    #[test]
    fn test_partition_key_order() {
        let mut keys = vec![
            PartitionKey::new(2024, 3).unwrap(),
            PartitionKey::new(2023, 12).unwrap(),
            PartitionKey::new(2024, 1).unwrap(),
        ];
        keys.sort();
        let display: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(display, vec!["2023-12", "2024-01", "2024-03"]);
    }

    #[test]
    fn test_partition_counts_and_sums() {
        let partitions = partition(records(&[
            ("2023-12-05", "500"),
            ("2024-03-15", "1000"),
            ("2024-03-20", "250"),
        ]));
        assert_eq!(partitions.len(), 2);

        let dec = partitions.get(&PartitionKey::new(2023, 12).unwrap()).unwrap();
        assert_eq!(dec.count(), 1);
        assert_eq!(dec.sum(), Some(Decimal::from(500)));

        let mar = partitions.get(&PartitionKey::new(2024, 3).unwrap()).unwrap();
        assert_eq!(mar.count(), 2);
        assert_eq!(mar.sum(), Some(Decimal::from(1250)));
        assert_eq!(mar.mean(), Some(Decimal::from(625)));
    }

    #[test]
    fn test_partition_is_complete_and_stable() {
        let input = records(&[
            ("2024-02-01", "1"),
            ("2024-01-31", "2"),
            ("2024-02-29", "3"),
            ("2023-12-31", "4"),
            ("2024-01-01", "5"),
            ("2024-02-10", "6"),
        ]);
        let total = input.len();
        let partitions = partition(input);
        assert_eq!(partitions.record_count(), total);

        let keys: Vec<String> = partitions.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["2023-12", "2024-01", "2024-02"]);

        // Input order survives inside a partition.
        let feb = partitions.get(&PartitionKey::new(2024, 2).unwrap()).unwrap();
        let rows: Vec<usize> = feb.records().iter().map(|r| r.row()).collect();
        assert_eq!(rows, vec![1, 3, 6]);

        // Every row appears exactly once.
        let mut all_rows: Vec<usize> = partitions
            .iter()
            .flat_map(|p| p.records().iter().map(|r| r.row()))
            .collect();
        all_rows.sort();
        assert_eq!(all_rows, (1..=total).collect::<Vec<_>>());
    }

    #[test]
    fn test_partition_boundaries_use_record_date() {
        let partitions = partition(records(&[("2023-12-31", "1"), ("2024-01-01", "1")]));
        assert!(partitions.get(&PartitionKey::new(2023, 12).unwrap()).is_some());
        assert!(partitions.get(&PartitionKey::new(2024, 1).unwrap()).is_some());
    }

    #[test]
    fn test_partition_empty() {
        let partitions = partition(Vec::new());
        assert!(partitions.is_empty());
        assert_eq!(partitions.record_count(), 0);
    }

    #[test]
    fn test_partition_summary() {
        let partitions = partition(records(&[("2024-05-01", "-100"), ("2024-05-02", "300")]));
        let summary = PartitionSummary::from(partitions.iter().next().unwrap());
        assert_eq!(summary.count(), 2);
        assert_eq!(summary.sum(), Some(Decimal::from(200)));
    }

    #[test]
    fn test_partition_sum_overflow() {
        let partitions = partition(records(&[
            ("2024-03-01", "79228162514264337593543950335"),
            ("2024-03-02", "79228162514264337593543950335"),
        ]));
        let p = partitions.iter().next().unwrap();
        assert_eq!(p.count(), 2);
        assert_eq!(p.sum(), None);
        assert_eq!(p.mean(), None);

        let summary = PartitionSummary::from(p);
        assert_eq!(summary.count(), 2);
        assert_eq!(summary.sum(), None);
    }
}
