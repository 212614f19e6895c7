//! Naming of remote folders and artifact files from a partition key.
//!
//! Templates use two placeholders: `{year}` expands to the 4-digit year and `{month}` to the
//! zero-padded 2-digit month. With the defaults, partition 2024-03 is uploaded as
//! `2024年/03月/2024年03月_売上データ.csv` below the anchor.

use crate::model::PartitionKey;
use anyhow::ensure;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub(crate) const DEFAULT_YEAR_FOLDER: &str = "{year}年";
pub(crate) const DEFAULT_MONTH_FOLDER: &str = "{month}月";
pub(crate) const DEFAULT_FILE_NAME: &str = "{year}年{month}月_売上データ.csv";

const YEAR: &str = "{year}";
const MONTH: &str = "{month}";

/// An ordered list of node names from the anchor down to a leaf folder. This is a desired
/// location; it says nothing about whether the folders exist.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(transparent)]
pub struct NodePath(Vec<String>);

impl NodePath {
    pub fn new<S, I>(segments: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        Self(segments.into_iter().map(|s| s.into()).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The top-level segment, which identifies the branch this path belongs to.
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for NodePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// The naming templates for one run.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    year_folder: String,
    month_folder: String,
    file_name: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            year_folder: DEFAULT_YEAR_FOLDER.to_string(),
            month_folder: DEFAULT_MONTH_FOLDER.to_string(),
            file_name: DEFAULT_FILE_NAME.to_string(),
        }
    }
}

impl Layout {
    /// Creates a layout after checking that each template carries the placeholders it needs. The
    /// file name needs both so that no two partitions share a name.
    pub fn new(
        year_folder: impl Into<String>,
        month_folder: impl Into<String>,
        file_name: impl Into<String>,
    ) -> crate::Result<Self> {
        let layout = Self {
            year_folder: year_folder.into(),
            month_folder: month_folder.into(),
            file_name: file_name.into(),
        };
        ensure!(
            layout.year_folder.contains(YEAR),
            "The year folder template '{}' must contain {YEAR}",
            layout.year_folder
        );
        ensure!(
            layout.month_folder.contains(MONTH),
            "The month folder template '{}' must contain {MONTH}",
            layout.month_folder
        );
        ensure!(
            layout.file_name.contains(YEAR) && layout.file_name.contains(MONTH),
            "The file name template '{}' must contain both {YEAR} and {MONTH}",
            layout.file_name
        );
        for t in [&layout.year_folder, &layout.month_folder, &layout.file_name] {
            ensure!(!t.contains('/'), "Template '{t}' must not contain '/'");
        }
        Ok(layout)
    }

    pub fn year_folder(&self, key: PartitionKey) -> String {
        expand(&self.year_folder, key)
    }

    pub fn month_folder(&self, key: PartitionKey) -> String {
        expand(&self.month_folder, key)
    }

    pub fn file_name(&self, key: PartitionKey) -> String {
        expand(&self.file_name, key)
    }

    /// The remote folder path for a partition: `[year folder, month folder]`.
    pub fn node_path(&self, key: PartitionKey) -> NodePath {
        NodePath::new([self.year_folder(key), self.month_folder(key)])
    }

    /// The partition whose file this layout would name `name`, or `None` if `name` was not
    /// produced by the file name template.
    pub fn parse_file_name(&self, name: &str) -> Option<PartitionKey> {
        let mut template = self.file_name.as_str();
        let mut rest = name;
        let mut year = None;
        let mut month = None;
        while !template.is_empty() {
            if let Some(t) = template.strip_prefix(YEAR) {
                let (digits, r) = take_digits(rest, 4)?;
                year = Some(digits.parse::<i32>().ok()?);
                (template, rest) = (t, r);
            } else if let Some(t) = template.strip_prefix(MONTH) {
                let (digits, r) = take_digits(rest, 2)?;
                month = Some(digits.parse::<u32>().ok()?);
                (template, rest) = (t, r);
            } else {
                let c = template.chars().next()?;
                rest = rest.strip_prefix(c)?;
                template = &template[c.len_utf8()..];
            }
        }
        if !rest.is_empty() {
            return None;
        }
        let key = PartitionKey::new(year?, month?).ok()?;
        // A template that repeats a placeholder must repeat the same value.
        (self.file_name(key) == name).then_some(key)
    }
}

fn take_digits(s: &str, n: usize) -> Option<(&str, &str)> {
    let digits = s.get(..n)?;
    digits
        .bytes()
        .all(|b| b.is_ascii_digit())
        .then(|| (digits, &s[n..]))
}

fn expand(template: &str, key: PartitionKey) -> String {
    template
        .replace(YEAR, &format!("{:04}", key.year()))
        .replace(MONTH, &format!("{:02}", key.month()))
}
