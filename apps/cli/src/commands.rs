//! CLI definition, tracing setup, and the update run.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use nbcrate_core::{ProgressReporter, UpdateCrateResult};
use nbcrate_shared::{
    CrateDefaults, DEFAULT_GITHUB_API, FetchConfig, LicenceTable, RunConfig, load_defaults,
};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// update-crate: describe a notebook repository as an RO-Crate.
#[derive(Parser, Debug)]
#[command(
    name = "update-crate",
    about = "Create or update the RO-Crate metadata for a repository of notebooks.",
    long_about = None,
    disable_version_flag = true,
)]
pub(crate) struct Cli {
    /// JSON file with crate default values (name, description, authors, ...).
    #[arg(long)]
    pub defaults: Option<PathBuf>,

    /// Working directory holding the notebooks and the code crate.
    #[arg(long, default_value = "./")]
    pub crate_path: PathBuf,

    /// New version number; records an UpdateAction for it.
    #[arg(long)]
    pub version: Option<String>,

    /// Data repository URL; builds a data crate for it instead of a code crate.
    #[arg(long)]
    pub data_repo: Option<String>,

    /// JSON file mapping licence keys to licence entities.
    #[arg(long)]
    pub licences: Option<PathBuf>,

    /// Token for the GitHub API.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// GitHub API base URL.
    #[arg(long, env = "NBCRATE_GITHUB_API", default_value = DEFAULT_GITHUB_API)]
    pub github_api: String,

    /// HTTP request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "nbcrate=info,update_crate=info",
        1 => "nbcrate=debug,update_crate=debug",
        _ => "nbcrate=trace,update_crate=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Merge flags and config files into the run configuration.
pub(crate) fn build_config(cli: &Cli) -> Result<RunConfig> {
    let defaults = match &cli.defaults {
        Some(path) => load_defaults(path)?,
        None => CrateDefaults::default(),
    };
    let licences = match &cli.licences {
        Some(path) => LicenceTable::load(path)?,
        None => LicenceTable::builtin(),
    };

    Ok(RunConfig {
        crate_path: cli.crate_path.clone(),
        defaults,
        version: cli.version.clone().filter(|v| !v.is_empty()),
        data_repo: cli.data_repo.clone().filter(|url| !url.is_empty()),
        licences,
        fetch: FetchConfig {
            timeout_secs: cli.timeout_secs,
            github_api: cli.github_api.clone(),
            github_token: cli.github_token.clone().filter(|t| !t.is_empty()),
        },
    })
}

/// Run one crate update and print a summary.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;

    info!(
        crate_path = %config.crate_path.display(),
        version = config.version.as_deref().unwrap_or(""),
        data_repo = config.data_repo.as_deref().unwrap_or(""),
        "updating crate"
    );

    let reporter = CliProgress::new();
    let result = nbcrate_core::update_crate(&config, &reporter).await?;

    let kind = if result.data_crate { "Data" } else { "Code" };
    println!();
    println!("  {kind} crate updated!");
    println!("  Notebooks: {}", result.notebook_count);
    println!("  Entities:  {}", result.entity_count);
    println!("  Metadata:  {}", result.metadata_path.display());
    println!("  Time:      {:.1}s", result.elapsed.as_secs_f64());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn notebook_added(&self, path: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Adding notebooks [{current}/{total}] {path}"));
    }

    fn done(&self, _result: &UpdateCrateResult) {
        self.spinner.finish_and_clear();
    }
}
