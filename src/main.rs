use std::{num::NonZeroUsize, path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use copy_release_assets::{
    copy_release_assets, default_scratch_root, get_error_chain, Config, TransferRequest,
    TOKEN_ENV_VAR,
};
use humantime::format_duration;
use tokio::runtime;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "copy-release-assets", version)]
#[command(about = "Copies the assets of one GitHub release to another release of the same repo")]
#[command(after_help = concat!(
    "Environment:\n",
    "  GITHUB_AUTH_TOKEN  token used for all api requests\n",
    "  GITHUB_API_URL     api base url, for GitHub Enterprise\n\n",
    "Examples:\n",
    "  $ copy-release-assets sass node-sass v3.11.2 v3.11.3",
))]
struct Cli {
    /// Owner of the repository
    owner: String,
    /// Name of the repository
    repo: String,
    /// Tag of the release to copy assets from
    from: String,
    /// Tag of the release to copy assets to
    to: String,
    /// Filters assets to copy by a case-sensitive substring match
    #[arg(short, long)]
    filter: Option<String>,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
    /// Max number of assets transferred at once, 0 for no limit
    #[arg(short, long, default_value_t = 0)]
    jobs: usize,
    /// Where to create the scratch directory [default: next to this executable]
    #[arg(long)]
    scratch_root: Option<PathBuf>,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "copy_release_assets=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn inner_main(cli: Cli) -> anyhow::Result<()> {
    let scratch_root = match cli.scratch_root {
        Some(scratch_root) => scratch_root,
        None => default_scratch_root()?,
    };

    let mut config = Config::from_env(scratch_root);
    config.jobs = NonZeroUsize::new(cli.jobs);
    if config.token.is_some() {
        debug!("using {TOKEN_ENV_VAR} for api requests.");
    }
    debug!(api_url = %config.api_url, jobs = ?config.jobs, "starting transfer");

    let request = TransferRequest {
        owner: cli.owner,
        repo: cli.repo,
        from: cli.from,
        to: cli.to,
        filter: cli.filter,
    };

    let report = copy_release_assets(&config, &request).await?;

    if report.outcomes.is_empty() {
        println!("no assets to copy ({} on {}).", report.listed, request.from);
    }

    let took = Duration::from_millis(report.elapsed.as_millis() as u64);
    println!(
        "summary: copied {}/{} assets from {} to {}, took {}",
        report.copied().count(),
        report.outcomes.len(),
        request.from,
        request.to,
        format_duration(took)
    );
    for failed in report.failed() {
        println!("  failed: {}", failed.name());
    }

    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let rt = runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()?;

    rt.block_on(inner_main(cli))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("errors: {}", get_error_chain(&err));
            ExitCode::FAILURE
        }
    }
}
