use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use futures_util::{stream, Stream, StreamExt, TryStreamExt};
use reqwest::{header, Body, Client, IntoUrl, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::Config;

/// A release's asset. Does not contain all fields.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

/// A github release. Does not contain all fields.
///
/// See the github [docs](https://docs.github.com/en/rest/releases/releases?apiVersion=2022-11-28#get-a-release-by-tag-name) for more information
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    pub name: Option<String>,
    /// Hypermedia template, e.g. `https://uploads.github.com/repos/o/r/releases/1/assets{?name,label}`
    pub upload_url: String,
}

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
// the max github allows.
const ASSETS_PER_PAGE: u8 = 100;

pub struct GithubClient {
    api: Client,
    /// Separate client for raw asset downloads: has connect/read timeouts and skips certificate
    /// checks.
    downloads: Client,
    api_url: Url,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let api_url = Url::parse(&config.api_url)
            .with_context(|| format!("invalid api url `{}`", config.api_url))?;
        if api_url.cannot_be_a_base() {
            bail!("invalid api url `{api_url}`");
        }

        let api = Client::builder().user_agent(USER_AGENT).build()?;
        // no total timeout, a large asset may stream for longer as long as bytes keep arriving.
        let downloads = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.download_timeout)
            .read_timeout(config.download_timeout)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            api,
            downloads,
            api_url,
            token: config.token.clone(),
        })
    }

    /// `api_url` with `segments` appended, each one percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        // checked in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: impl IntoUrl) -> RequestBuilder {
        let request = self
            .api
            .request(method, url)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);

        if let Some(token) = &self.token {
            request.bearer_auth(token)
        } else {
            request
        }
    }

    pub async fn get_release_by_tag(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> anyhow::Result<Release> {
        let url = self.endpoint(&["repos", owner, repo, "releases", "tags", tag]);
        debug!(%url, "resolving release");

        let resp = self.request(Method::GET, url).send().await?;
        match resp.status() {
            StatusCode::OK => Ok(resp.json().await?),
            StatusCode::NOT_FOUND => Err(anyhow!("no release tagged `{tag}` in {owner}/{repo}")),
            _ => Err(unexpected_status(resp).await),
        }
    }

    /// Pages of a release's assets, in the order github returns them.
    ///
    /// Each page is only requested once the previous one has been received, by following the
    /// `Link` header. The stream ends after the last page or the first error.
    pub fn asset_pages(
        &self,
        owner: &str,
        repo: &str,
        release_id: u64,
    ) -> impl Stream<Item = anyhow::Result<Vec<ReleaseAsset>>> + '_ {
        let release_id = release_id.to_string();
        let mut first = self.endpoint(&[
            "repos",
            owner,
            repo,
            "releases",
            release_id.as_str(),
            "assets",
        ]);
        first
            .query_pairs_mut()
            .append_pair("per_page", &ASSETS_PER_PAGE.to_string());

        stream::try_unfold(Some(String::from(first)), move |next| async move {
            match next {
                Some(url) => self.fetch_asset_page(&url).await.map(Some),
                None => Ok(None),
            }
        })
    }

    async fn fetch_asset_page(
        &self,
        url: &str,
    ) -> anyhow::Result<(Vec<ReleaseAsset>, Option<String>)> {
        debug!(%url, "fetching asset page");

        let resp = self.request(Method::GET, url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(unexpected_status(resp).await);
        }

        let next = resp
            .headers()
            .get(header::LINK)
            .and_then(|link| link.to_str().ok())
            .and_then(next_page_url);
        let page: Vec<ReleaseAsset> = resp.json().await?;
        debug!(assets = page.len(), has_next = next.is_some(), "got asset page");

        Ok((page, next))
    }

    /// Every asset of a release. Drains all pages before returning.
    pub async fn list_release_assets(
        &self,
        owner: &str,
        repo: &str,
        release_id: u64,
    ) -> anyhow::Result<Vec<ReleaseAsset>> {
        self.asset_pages(owner, repo, release_id).try_concat().await
    }

    /// Streams `asset` into `dir/<asset name>`, returning the path and the number of bytes written.
    pub async fn download_asset(
        &self,
        asset: &ReleaseAsset,
        dir: &Path,
    ) -> anyhow::Result<(PathBuf, u64)> {
        // asset names come from the server, never let one point outside `dir`.
        let file_name = Path::new(&asset.name)
            .file_name()
            .ok_or(anyhow!("asset name `{}` is not a file name", asset.name))?;
        let dest = dir.join(file_name);

        let resp = self
            .downloads
            .get(&asset.browser_download_url)
            .send()
            .await
            .with_context(|| format!("requesting {}", asset.browser_download_url))?;

        if resp.status() != StatusCode::OK {
            return Err(anyhow!(
                "request failed, status code: {}",
                resp.status().as_u16()
            ));
        }

        let mut file = File::create(&dest)
            .await
            .with_context(|| format!("creating {}", dest.display()))?;

        let mut written = 0;
        let mut bytes_stream = resp.bytes_stream();
        while let Some(chunk) = bytes_stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok((dest, written))
    }

    /// Attaches `file` to `release`, named after the file's base name. Returns the uploaded size.
    pub async fn upload_asset(&self, release: &Release, file: &Path) -> anyhow::Result<u64> {
        let name = file
            .file_name()
            .ok_or(anyhow!("{} has no file name", file.display()))?
            .to_string_lossy()
            .into_owned();

        let reader = File::open(file)
            .await
            .with_context(|| format!("opening {}", file.display()))?;
        let size = reader.metadata().await?.len();

        let url = upload_endpoint(&release.upload_url);
        debug!(%url, %name, size, "uploading asset");

        let resp = self
            .request(Method::POST, url)
            .query(&[("name", name.as_str())])
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, size)
            .body(Body::wrap_stream(ReaderStream::new(reader)))
            .send()
            .await?;

        match resp.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(size),
            // github answers 422 when an asset with that name is already attached.
            StatusCode::UNPROCESSABLE_ENTITY => Err(anyhow!(
                "{} rejected `{name}`: {}",
                release.tag_name,
                response_text(resp).await
            )),
            _ => Err(unexpected_status(resp).await),
        }
    }
}

async fn response_text(resp: Response) -> String {
    resp.text().await.map_or_else(
        |_| "no text could be parsed".to_string(),
        |t| t.trim().to_string(),
    )
}

async fn unexpected_status(resp: Response) -> anyhow::Error {
    match resp.status() {
        status @ (StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED) => anyhow!(
            "got {} on api request: {}",
            status.as_u16(),
            response_text(resp).await
        ),
        status => anyhow!("unhandled status {status}"),
    }
}

/// Finds the `rel="next"` target in a `Link` header.
pub fn next_page_url(link: &str) -> Option<String> {
    link.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| matches!(param.trim(), r#"rel="next""# | "rel=next"));

        is_next.then(|| {
            target
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        })
    })
}

/// Drops the `{?name,label}` template from a release's `upload_url`.
pub fn upload_endpoint(upload_url: &str) -> &str {
    upload_url
        .split_once('{')
        .map_or(upload_url, |(endpoint, _)| endpoint)
}
