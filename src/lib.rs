//! sales-sync splits a sales CSV export by calendar month and uploads each month as its own file
//! into a `<year>/<month>` folder tree on Google Drive.
//!
//! The pipeline lives in [`sync`]; [`api::Drive`] is the seam between it and the remote store.

pub mod api;
pub mod args;
pub mod artifact;
pub mod commands;
mod config;
pub mod error;
pub mod layout;
pub mod model;
pub mod source;
pub mod sync;
mod utils;

#[cfg(test)]
mod test;

pub use api::Mode;
pub use config::Config;
pub use error::Error;
pub use error::Result;
