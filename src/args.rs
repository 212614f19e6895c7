//! These structs provide the CLI interface for the sales-sync CLI.

use crate::model::ValidationPolicy;
use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// sales-sync: split sales data by month and upload it to Google Drive.
///
/// The input is a CSV export of sales rows with a date column and an amount column. Rows are
/// grouped by calendar month and each month is written as its own CSV file into a
/// `<year>/<month>` folder tree below a shared drive or folder (the "anchor"). Folders that already
/// exist are re-used, so running the same upload twice does not create duplicate folders.
///
/// You will need Google OAuth client credentials and a token with the Drive scope, or a service
/// account key.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory and initialize the configuration files.
    ///
    /// This is the first command you should run. You need:
    ///
    /// - The id or URL of the shared drive or folder that should hold the year folders, passed as
    ///   --anchor.
    ///
    /// - Your downloaded OAuth client credentials (--client-secret) and a token file obtained for
    ///   them with the https://www.googleapis.com/auth/drive scope (--token). Both are copied into
    ///   the secrets directory. You can also put them there yourself later.
    ///
    /// - Or, instead of those two, a service account key (--service-account). The anchor must be
    ///   shared with the service account.
    Init(InitArgs),
    /// Verify the configured credentials by obtaining an access token.
    Auth,
    /// Check that the anchor exists and is accessible.
    Check,
    /// List the shared drives the credentials can see.
    Drives,
    /// Split a sales CSV into monthly files on the local disk.
    Split(SplitArgs),
    /// Split a sales CSV into monthly files and upload them to Google Drive.
    Upload(UploadArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG. See the tracing-subscriber EnvFilter docs.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where sales-sync configuration and secrets are held. Defaults to ~/sales-sync
    #[arg(long, env = "SALES_SYNC_HOME", default_value_t = default_sales_sync_home())]
    sales_sync_home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, sales_sync_home: PathBuf) -> Self {
        Self {
            log_level,
            sales_sync_home: sales_sync_home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn sales_sync_home(&self) -> &DisplayPath {
        &self.sales_sync_home
    }
}

/// (Not shown): Args for the `sales-sync init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The shared drive id, folder id, or folder URL, e.g.
    /// https://drive.google.com/drive/folders/0AbCdEfGhIjKlMnOp
    #[arg(long)]
    anchor: String,

    /// The path to your downloaded OAuth client credentials.
    #[arg(long)]
    client_secret: Option<PathBuf>,

    /// The path to an OAuth token file for those credentials.
    #[arg(long)]
    token: Option<PathBuf>,

    /// The path to a service account key. Uploads then run as that account instead of a user.
    #[arg(long, conflicts_with_all = ["client_secret", "token"])]
    service_account: Option<PathBuf>,
}

impl InitArgs {
    pub fn new(
        anchor: impl Into<String>,
        client_secret: Option<PathBuf>,
        token: Option<PathBuf>,
    ) -> Self {
        Self {
            anchor: anchor.into(),
            client_secret,
            token,
            service_account: None,
        }
    }

    pub fn anchor(&self) -> &str {
        &self.anchor
    }

    pub fn client_secret(&self) -> Option<&Path> {
        self.client_secret.as_deref()
    }

    pub fn token(&self) -> Option<&Path> {
        self.token.as_deref()
    }

    pub fn service_account(&self) -> Option<&Path> {
        self.service_account.as_deref()
    }
}

/// (Not shown): Args for the `sales-sync split` command.
#[derive(Debug, Parser, Clone)]
pub struct SplitArgs {
    /// The sales CSV file.
    #[arg(long)]
    input: PathBuf,

    /// Where to write the monthly files. Defaults to $SALES_SYNC_HOME/split
    #[arg(long)]
    output: Option<PathBuf>,

    /// What to do with rows that have a missing or invalid date or amount.
    #[arg(long, value_enum, default_value_t = ValidationPolicy::Skip)]
    on_invalid: ValidationPolicy,
}

impl SplitArgs {
    pub fn new(input: PathBuf, output: Option<PathBuf>, on_invalid: ValidationPolicy) -> Self {
        Self {
            input,
            output,
            on_invalid,
        }
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn on_invalid(&self) -> ValidationPolicy {
        self.on_invalid
    }
}

/// (Not shown): Args for the `sales-sync upload` command.
#[derive(Debug, Parser, Clone)]
pub struct UploadArgs {
    /// The sales CSV file.
    #[arg(long, required_unless_present = "from_split", conflicts_with = "from_split")]
    input: Option<PathBuf>,

    /// Upload the files that `split` wrote to this directory instead of reading a sales CSV.
    #[arg(long)]
    from_split: Option<PathBuf>,

    /// What to do with rows that have a missing or invalid date or amount.
    #[arg(long, value_enum, default_value_t = ValidationPolicy::Skip)]
    on_invalid: ValidationPolicy,

    /// Show where each file would be uploaded without changing anything on Drive.
    #[arg(long)]
    dry_run: bool,
}

impl UploadArgs {
    pub fn new(input: PathBuf, on_invalid: ValidationPolicy, dry_run: bool) -> Self {
        Self {
            input: Some(input),
            from_split: None,
            on_invalid,
            dry_run,
        }
    }

    pub fn from_split(dir: PathBuf, dry_run: bool) -> Self {
        Self {
            input: None,
            from_split: Some(dir),
            on_invalid: ValidationPolicy::default(),
            dry_run,
        }
    }

    pub fn input(&self) -> Option<&Path> {
        self.input.as_deref()
    }

    pub fn split_dir(&self) -> Option<&Path> {
        self.from_split.as_deref()
    }

    pub fn on_invalid(&self) -> ValidationPolicy {
        self.on_invalid
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

fn default_sales_sync_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("sales-sync"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --sales-sync-home or SALES_SYNC_HOME instead of relying on the \
                default home directory. If you continue using the program right now, you may have \
                problems!",
            );
            PathBuf::from("sales-sync")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn path(&self) -> &Path {
        &self.0
    }
}
