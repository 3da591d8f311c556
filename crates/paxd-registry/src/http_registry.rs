use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use paxd_core::{PackageManifest, PackageSource};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use tracing::debug;

use crate::{check_package_id, parse_manifest, MANIFEST_FILE_NAMES};

const USER_AGENT: &str = concat!("paxd/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Registry served over HTTP(S) with the same `packages/<id>/` layout as
/// [`crate::FsRegistry`].
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    base_url: String,
    client: Client,
}

impl HttpRegistry {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn file_url(&self, package_id: &str, rel_path: &str) -> String {
        let rel_path = rel_path.replace('\\', "/");
        format!(
            "{}/packages/{}/{}",
            self.base_url,
            package_id,
            rel_path.trim_start_matches("./")
        )
    }

    fn get(&self, url: &str) -> Result<Option<Response>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("request failed: {url}"))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response)),
            status => Err(anyhow!("request failed: {url} returned {status}")),
        }
    }
}

impl PackageSource for HttpRegistry {
    fn load_manifest(&self, package_id: &str) -> Result<Option<PackageManifest>> {
        check_package_id(package_id)?;
        for name in MANIFEST_FILE_NAMES {
            let url = self.file_url(package_id, name);
            let Some(response) = self.get(&url)? else {
                continue;
            };
            let raw = response
                .text()
                .with_context(|| format!("failed to read response body: {url}"))?;
            debug!(package = package_id, url = %url, "loaded manifest");
            return parse_manifest(name, &raw).map(Some);
        }
        Ok(None)
    }

    fn fetch_file(&self, package_id: &str, rel_path: &str, destination: &Path) -> Result<()> {
        check_package_id(package_id)?;
        let url = self.file_url(package_id, rel_path);
        let mut response = self
            .get(&url)?
            .ok_or_else(|| anyhow!("file not found in registry: {url}"))?;

        let mut partial = destination.as_os_str().to_owned();
        partial.push(".tmp");
        let partial = Path::new(&partial);
        let mut file = fs::File::create(partial)
            .with_context(|| format!("failed to create {}", partial.display()))?;
        let copied = io::copy(&mut response, &mut file);
        drop(file);
        if let Err(err) = copied {
            let _ = fs::remove_file(partial);
            return Err(err).with_context(|| format!("failed to download {url}"));
        }

        fs::rename(partial, destination).with_context(|| {
            format!(
                "failed to move download into place: {}",
                destination.display()
            )
        })?;
        debug!(package = package_id, url = %url, "downloaded file");
        Ok(())
    }
}
