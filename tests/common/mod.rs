#![allow(dead_code)]

use std::{fs, path::Path, time::Duration};

use copy_release_assets::Config;
use serde_json::{json, Value};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const OWNER: &str = "octo";
pub const REPO: &str = "tool";
pub const TOKEN: &str = "test-token";

pub fn config(server: &MockServer, scratch_root: &Path) -> Config {
    let mut config = Config::new(scratch_root);
    config.api_url = server.uri();
    config.token = Some(TOKEN.to_string());
    config.download_timeout = Duration::from_millis(500);
    config
}

pub fn release_json(server: &MockServer, id: u64, tag: &str) -> Value {
    json!({
        "id": id,
        "tag_name": tag,
        "name": format!("Release {tag}"),
        "draft": false,
        "upload_url": format!(
            "{}/uploads/repos/{OWNER}/{REPO}/releases/{id}/assets{{?name,label}}",
            server.uri()
        ),
    })
}

pub fn asset_json(server: &MockServer, name: &str) -> Value {
    json!({
        "name": name,
        "size": 3,
        "browser_download_url": format!("{}/download/{name}", server.uri()),
    })
}

pub async fn mount_release(server: &MockServer, id: u64, tag: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{OWNER}/{REPO}/releases/tags/{tag}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_json(server, id, tag)))
        .mount(server)
        .await;
}

pub async fn mount_missing_release(server: &MockServer, tag: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{OWNER}/{REPO}/releases/tags/{tag}")))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })),
        )
        .mount(server)
        .await;
}

/// A single page of assets, no `Link` header.
pub async fn mount_assets(server: &MockServer, release_id: u64, names: &[&str]) {
    let assets = names
        .iter()
        .map(|name| asset_json(server, name))
        .collect::<Vec<_>>();

    Mock::given(method("GET"))
        .and(path(format!(
            "/repos/{OWNER}/{REPO}/releases/{release_id}/assets"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(assets))
        .mount(server)
        .await;
}

pub async fn mount_download(server: &MockServer, name: &str, body: &[u8], times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/download/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(times)
        .mount(server)
        .await;
}

pub fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).unwrap().next().is_none()
}
