use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use futures_util::{stream, StreamExt};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{
    filter_assets, get_error_chain, Config, GithubClient, Release, ReleaseAsset, SCRATCH_PREFIX,
};

/// Which assets to copy, and between which releases.
#[derive(Debug, Clone, Default)]
pub struct TransferRequest {
    pub owner: String,
    pub repo: String,
    /// Tag of the release to copy from.
    pub from: String,
    /// Tag of the release to copy to.
    pub to: String,
    pub filter: Option<String>,
}

impl TransferRequest {
    fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("owner", &self.owner),
            ("repo", &self.repo),
            ("from", &self.from),
            ("to", &self.to),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(field, _)| field)
        .collect()
    }
}

/// What happened to one selected asset.
#[derive(Debug)]
pub enum AssetOutcome {
    Copied { name: String, bytes: u64 },
    DownloadFailed { name: String, error: anyhow::Error },
    /// The download worked but the destination lookup or the upload did not.
    UploadFailed { name: String, error: anyhow::Error },
}

impl AssetOutcome {
    pub fn name(&self) -> &str {
        match self {
            Self::Copied { name, .. }
            | Self::DownloadFailed { name, .. }
            | Self::UploadFailed { name, .. } => name,
        }
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Copied { .. } => None,
            Self::DownloadFailed { error, .. } | Self::UploadFailed { error, .. } => Some(error),
        }
    }

    pub fn is_copied(&self) -> bool {
        matches!(self, Self::Copied { .. })
    }
}

#[derive(Debug)]
pub struct TransferReport {
    /// Assets on the source release before filtering.
    pub listed: usize,
    /// One entry per asset that passed the filter, in listing order.
    pub outcomes: Vec<AssetOutcome>,
    /// Where downloads were staged. Removed by the time the report is returned.
    pub scratch_dir: PathBuf,
    pub elapsed: Duration,
}

impl TransferReport {
    pub fn copied(&self) -> impl Iterator<Item = &AssetOutcome> {
        self.outcomes.iter().filter(|o| o.is_copied())
    }

    pub fn failed(&self) -> impl Iterator<Item = &AssetOutcome> {
        self.outcomes.iter().filter(|o| !o.is_copied())
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(AssetOutcome::is_copied)
    }
}

/// Copies the assets of release `request.from` to release `request.to`.
///
/// Fails as a whole only when the arguments are incomplete, the source release or its assets
/// can't be fetched, or the scratch directory can't be created. Failures of single assets are
/// printed as they happen and recorded in the report.
pub async fn copy_release_assets(
    config: &Config,
    request: &TransferRequest,
) -> anyhow::Result<TransferReport> {
    let missing = request.missing_fields();
    if !missing.is_empty() {
        bail!("insufficient arguments, missing {}", missing.join(", "));
    }

    let start = Instant::now();
    let client = GithubClient::new(config)?;
    let TransferRequest {
        owner,
        repo,
        from,
        to,
        filter,
    } = request;

    let source = client
        .get_release_by_tag(owner, repo, from)
        .await
        .with_context(|| format!("resolving source release `{from}`"))?;
    let assets = client
        .list_release_assets(owner, repo, source.id)
        .await
        .with_context(|| format!("listing assets of `{from}`"))?;

    let listed = assets.len();
    let selected = filter_assets(assets, filter.as_deref());
    debug!(listed, selected = selected.len(), ?filter, "filtered assets");

    let scratch = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir_in(&config.scratch_root)
        .with_context(|| {
            format!(
                "creating scratch directory in {}",
                config.scratch_root.display()
            )
        })?;
    let scratch_dir = scratch.path().to_path_buf();
    debug!(scratch_dir = %scratch_dir.display(), "created scratch directory");

    // shared by all uploads, a failed lookup is not cached.
    let destination = OnceCell::new();
    let limit = config
        .jobs
        .map_or(selected.len(), NonZeroUsize::get)
        .max(1);

    let outcomes = stream::iter(&selected)
        .map(|asset| {
            let target = Target {
                client: &client,
                owner,
                repo,
                tag: to,
                release: &destination,
            };
            transfer_asset(target, asset, &scratch_dir)
        })
        .buffered(limit)
        .collect::<Vec<_>>()
        .await;

    if let Err(err) = scratch.close() {
        eprintln!(
            "failed to remove {}, errors: {err}",
            scratch_dir.display()
        );
    }

    Ok(TransferReport {
        listed,
        outcomes,
        scratch_dir,
        elapsed: start.elapsed(),
    })
}

/// The destination release, resolved at most once successfully.
struct Target<'a> {
    client: &'a GithubClient,
    owner: &'a str,
    repo: &'a str,
    tag: &'a str,
    release: &'a OnceCell<Release>,
}

impl Target<'_> {
    async fn upload(&self, file: &Path) -> anyhow::Result<u64> {
        let release = self
            .release
            .get_or_try_init(|| self.client.get_release_by_tag(self.owner, self.repo, self.tag))
            .await
            .with_context(|| format!("resolving destination release `{}`", self.tag))?;

        println!("Uploading {} to {}", file.display(), release.tag_name);
        self.client.upload_asset(release, file).await
    }
}

async fn transfer_asset(target: Target<'_>, asset: &ReleaseAsset, dir: &Path) -> AssetOutcome {
    let name = asset.name.clone();
    println!("Downloading {name} to {}", dir.display());

    let file = match target.client.download_asset(asset, dir).await {
        Ok((file, bytes)) => {
            debug!(%name, bytes, "downloaded");
            file
        }
        Err(err) => {
            let error = err.context(format!("downloading {name}"));
            eprintln!("errors: {}", get_error_chain(&error));
            return AssetOutcome::DownloadFailed { name, error };
        }
    };

    match target.upload(&file).await {
        Ok(bytes) => {
            debug!(%name, bytes, "uploaded");
            AssetOutcome::Copied { name, bytes }
        }
        Err(err) => {
            let error = err.context(format!("uploading {name}"));
            eprintln!("errors: {}", get_error_chain(&error));
            AssetOutcome::UploadFailed { name, error }
        }
    }
}
