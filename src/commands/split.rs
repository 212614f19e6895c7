use crate::args::SplitArgs;
use crate::commands::Out;
use crate::source::SalesTable;
use crate::sync::{self, Prepared, RunSummary};
use crate::{utils, Config, Result};
use tracing::debug;

/// Handles the `sales-sync split` command: partitions the input by month and writes one CSV per
/// month to `<output>/<year>/<file name>`. Nothing is uploaded.
pub async fn split(config: &Config, args: &SplitArgs) -> Result<Out<RunSummary>> {
    let output = args
        .output()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| config.split_dir());
    utils::make_dir(&output).await?;

    let table = SalesTable::load(args.input()).await?;
    let Prepared { artifacts, summary } =
        sync::prepare(&config.settings(), table, args.on_invalid())?;

    for artifact in &artifacts {
        let path = artifact.write_to(&output).await?;
        debug!("Wrote {}", path.display());
    }

    let message = format!(
        "{} Wrote {} file(s) to {}.",
        summary.message(),
        artifacts.len(),
        output.display()
    );
    Ok(Out::new(message, summary.clone()).with_details(summary.partition_lines()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ValidationPolicy;
    use crate::test::{TestEnv, SAMPLE_SALES};

    #[tokio::test]
    async fn test_split_writes_year_tree() {
        let env = TestEnv::new().await;
        let input = env.write_input(SAMPLE_SALES).await;
        let output = env.root().join("out");
        let args = SplitArgs::new(input, Some(output.clone()), ValidationPolicy::Skip);

        let out = split(env.config(), &args).await.unwrap();
        let summary = out.structure().unwrap();
        assert_eq!(summary.partitions().len(), 3);
        assert_eq!(summary.rejected().len(), 1);
        assert_eq!(out.details().len(), 3);

        let march = output.join("2024").join("2024年03月_売上データ.csv");
        let content = utils::read(&march).await.unwrap();
        assert_eq!(
            content,
            "日付,商品名,売上金額\n2024-03-15,りんご,\"¥1,000\"\n2024-03-20,もも,250\n"
        );
        assert!(output.join("2023").join("2023年12月_売上データ.csv").is_file());
    }

    #[tokio::test]
    async fn test_split_abort_on_invalid() {
        let env = TestEnv::new().await;
        let input = env.write_input(SAMPLE_SALES).await;
        let args = SplitArgs::new(input, None, ValidationPolicy::Abort);
        assert!(split(env.config(), &args).await.is_err());
    }
}
