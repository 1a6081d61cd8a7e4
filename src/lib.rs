use std::{env, num::NonZeroUsize, path::PathBuf, time::Duration};

use anyhow::anyhow;

pub mod github;
pub mod transfer;

pub use github::{GithubClient, Release, ReleaseAsset};
pub use transfer::{copy_release_assets, AssetOutcome, TransferReport, TransferRequest};

pub const TOKEN_ENV_VAR: &str = "GITHUB_AUTH_TOKEN";
pub const API_URL_ENV_VAR: &str = "GITHUB_API_URL";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
/// Prefix of the per-run scratch directory, followed by a random suffix.
pub const SCRATCH_PREFIX: &str = ".tmp";

pub fn get_error_chain(err: &anyhow::Error) -> String {
    err.chain()
        .rev()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" => ")
}

/// Everything a transfer needs from the outside world.
///
/// Nothing here reads global state except [`Config::from_env`], so tests can build one by hand.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token sent with every api request. Not validated, github rejects bad ones.
    pub token: Option<String>,
    pub api_url: String,
    pub download_timeout: Duration,
    /// Directory the scratch directory is created in.
    pub scratch_root: PathBuf,
    /// Max assets in flight at once, `None` for no limit.
    pub jobs: Option<NonZeroUsize>,
}

impl Config {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            token: None,
            api_url: DEFAULT_API_URL.to_string(),
            download_timeout: DOWNLOAD_TIMEOUT,
            scratch_root: scratch_root.into(),
            jobs: None,
        }
    }

    /// Reads the token and api url overrides from the environment.
    pub fn from_env(scratch_root: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(scratch_root);
        config.token = env::var(TOKEN_ENV_VAR).ok();

        if let Ok(api_url) = env::var(API_URL_ENV_VAR) {
            let api_url = api_url.trim();
            if !api_url.is_empty() {
                config.api_url = api_url.to_string();
            }
        }

        config
    }
}

/// The directory containing the running executable.
pub fn default_scratch_root() -> anyhow::Result<PathBuf> {
    let current_exe = env::current_exe()?;
    let current_dir = current_exe
        .parent()
        .ok_or(anyhow!("could not get path of current executable."))?;

    Ok(current_dir.to_path_buf())
}

/// Keeps the assets whose name contains `filter`, case-sensitively. No filter keeps everything.
pub fn filter_assets(assets: Vec<ReleaseAsset>, filter: Option<&str>) -> Vec<ReleaseAsset> {
    let Some(filter) = filter else {
        return assets;
    };

    assets
        .into_iter()
        .filter(|a| a.name.contains(filter))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assets(names: &[&str]) -> Vec<ReleaseAsset> {
        names
            .iter()
            .map(|name| ReleaseAsset {
                name: name.to_string(),
                browser_download_url: format!("https://example.com/{name}"),
            })
            .collect()
    }

    fn names(assets: &[ReleaseAsset]) -> Vec<&str> {
        assets.iter().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn filter_keeps_substring_matches_in_order() {
        let kept = filter_assets(
            assets(&["a.zip", "notes.txt", "b.zip", "zipper.tar"]),
            Some("zip"),
        );
        assert_eq!(names(&kept), ["a.zip", "b.zip", "zipper.tar"]);
    }

    #[test]
    fn filter_is_case_sensitive() {
        let kept = filter_assets(assets(&["App.ZIP", "app.zip"]), Some("zip"));
        assert_eq!(names(&kept), ["app.zip"]);
    }

    #[test]
    fn filter_is_not_a_glob() {
        let kept = filter_assets(assets(&["a.zip", "*.zip"]), Some("*.zip"));
        assert_eq!(names(&kept), ["*.zip"]);
    }

    #[test]
    fn missing_or_empty_filter_keeps_everything() {
        let all = ["a.zip", "notes.txt"];
        assert_eq!(names(&filter_assets(assets(&all), None)), all);
        assert_eq!(names(&filter_assets(assets(&all), Some(""))), all);
    }

    #[test]
    fn error_chain_starts_at_root_cause() {
        let err = anyhow!("connection reset").context("downloading a.zip");
        assert_eq!(get_error_chain(&err), "connection reset => downloading a.zip");
    }

    #[test]
    fn new_config_has_no_token() {
        let config = Config::new("/tmp");
        assert!(config.token.is_none());
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.download_timeout, Duration::from_secs(60));
        assert!(config.jobs.is_none());
    }
}
