use crate::api::{self, DriveNode, Mode};
use crate::commands::Out;
use crate::sync::retry;
use crate::{Config, Result};
use anyhow::Context;

/// Handles the `sales-sync drives` command: lists the shared drives the credentials can see, so
/// that one of them can be used as the anchor.
pub async fn drives(config: &Config, mode: Mode) -> Result<Out<Vec<DriveNode>>> {
    let drive = api::drive(config, mode).await?;
    let settings = config.settings();
    let found = retry(settings.retry_policy(), "shared drive listing", |_| {
        drive.list_drives()
    })
    .await
    .result
    .context("Unable to list shared drives")?;

    let anchor = config.anchor_id();
    let details = found
        .iter()
        .map(|d| {
            let marker = if d.id == anchor { " (anchor)" } else { "" };
            format!("{}: {}{marker}", d.id, d.name)
        })
        .collect();
    let message = match found.len() {
        0 => "No shared drives are visible to these credentials".to_string(),
        n => format!("Found {n} shared drive(s)"),
    };
    Ok(Out::new(message, found).with_details(details))
}
