//! Live adapter for the `PackageIndex` port using the PyPI JSON API.

use reqwest::Client;
use serde::Deserialize;

use crate::ports::{PackageIndex, PortFuture, ReleaseFile};

/// Queries `{index_url}/{name}/{version}/json`.
pub struct LivePackageIndex {
    client: Client,
    index_url: String,
}

impl LivePackageIndex {
    /// Creates an index client for `index_url` (e.g. `https://pypi.org/pypi`).
    #[must_use]
    pub fn new(index_url: &str) -> Self {
        Self { client: Client::new(), index_url: index_url.trim_end_matches('/').to_string() }
    }
}

#[derive(Deserialize)]
struct ReleaseResponse {
    urls: Vec<ReleaseUrl>,
}

#[derive(Deserialize)]
struct ReleaseUrl {
    filename: String,
    url: String,
    packagetype: String,
    digests: Digests,
}

#[derive(Deserialize)]
struct Digests {
    sha256: String,
}

fn parse_release(body: &str) -> Result<Vec<ReleaseFile>, serde_json::Error> {
    let response: ReleaseResponse = serde_json::from_str(body)?;
    Ok(response
        .urls
        .into_iter()
        .map(|u| ReleaseFile {
            filename: u.filename,
            url: u.url,
            sha256: u.digests.sha256,
            packagetype: u.packagetype,
        })
        .collect())
}

impl PackageIndex for LivePackageIndex {
    fn release_files<'a>(
        &'a self,
        name: &'a str,
        version: &'a str,
    ) -> PortFuture<'a, Vec<ReleaseFile>> {
        Box::pin(async move {
            let url = format!("{}/{name}/{version}/json", self.index_url);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| format!("index request for {name}=={version} failed: {e}"))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| format!("failed to read index response: {e}"))?;
            if !status.is_success() {
                return Err(format!("index returned {} for {name}=={version}", status.as_u16())
                    .into());
            }
            Ok(parse_release(&body).map_err(|e| format!("failed to parse index response: {e}"))?)
        })
    }
}
