//! Command handlers for the sales-sync CLI.
//!
//! This module contains implementations for all CLI subcommands.

mod auth;
mod check;
mod drives;
mod init;
mod split;
mod upload;

use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info};

pub use auth::auth;
pub use check::check;
pub use drives::drives;
pub use init::init;
pub use split::split;
pub use upload::upload;

/// The output type for a command. This allows the command to return a consistent message and,
/// optionally, structured data that is printed as JSON at debug level.
#[derive(Debug, Clone, Serialize)]
pub struct Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// A message that can be printed to the user regarding the outcome of the command execution.
    message: String,

    /// Extra lines printed after the message, e.g. one per partition.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,

    /// Any structured data that needs to be output from the call.
    structure: Option<T>,
}

impl<T, S> From<S> for Out<T>
where
    T: Debug + Clone + Serialize,
    S: Into<String>,
{
    fn from(value: S) -> Self {
        Out::new_message(value)
    }
}

impl<T> Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// Create a new `Out` object that has `Some(structure)`.
    pub fn new<S>(message: S, structure: T) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            details: Vec::new(),
            structure: Some(structure),
        }
    }

    /// Create a new `Out` object that has `None` for `structure`.
    pub fn new_message<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            details: Vec::new(),
            structure: None,
        }
    }

    /// Adds lines that are printed after the message.
    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    /// Get the `message`.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &[String] {
        &self.details
    }

    /// Get the structured data stored in `structure`.
    pub fn structure(&self) -> Option<&T> {
        self.structure.as_ref()
    }

    /// Print the message and details to `info!` and the structured data (if it exists) as JSON to
    /// `debug!`.
    pub fn print(&self) {
        info!("{}", self.message);
        for line in &self.details {
            info!("  {line}");
        }
        if let Some(structure) = self.structure() {
            if let Ok(json) = serde_json::to_string_pretty(structure) {
                debug!("Command output:\n\n{json}\n\n");
            }
        }
    }
}
