use crate::api::{self, DriveNode, Mode};
use crate::commands::Out;
use crate::sync::retry;
use crate::{Config, Result};
use anyhow::Context;

/// Handles the `sales-sync check` command: looks up the configured anchor.
///
/// A permanent error here usually means the anchor id is wrong (not found) or the account has not
/// been given access to it (permission denied).
pub async fn check(config: &Config, mode: Mode) -> Result<Out<DriveNode>> {
    let drive = api::drive(config, mode).await?;
    let settings = config.settings();
    let anchor = settings.anchor_id();
    let node = retry(settings.retry_policy(), "anchor lookup", |_| {
        drive.anchor_info(anchor)
    })
    .await
    .result
    .with_context(|| format!("The anchor {anchor} is not accessible"))?;
    Ok(Out::new(
        format!(
            "The anchor '{}' ({}) is accessible as a {:?}",
            node.name, node.id, node.kind
        ),
        node,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;

    #[tokio::test]
    async fn test_check() {
        let env = TestEnv::new().await;
        let out = check(env.config(), Mode::Testing).await.unwrap();
        assert_eq!(out.structure().unwrap().id, env.config().anchor_id());
    }
}
