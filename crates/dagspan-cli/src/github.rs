//! GitHub Actions artifact listing and download.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::future::Future;
use thiserror::Error;
use tracing::{info, warn};

const GITHUB_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("dagspan/", env!("CARGO_PKG_VERSION"));
const PER_PAGE: usize = 30;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request to {url} failed with status {status}")]
    Status { status: u16, url: String },

    #[error("Repository should be in format owner/repo-name, got {0}")]
    InvalidRepository(String),

    #[error("GITHUB_TOKEN should be set")]
    MissingToken,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteArtifact {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub size_in_bytes: u64,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArtifactPage {
    pub total_count: usize,
    pub artifacts: Vec<RemoteArtifact>,
}

/// Fetches numbered pages starting at 1 until one comes back empty.
pub async fn paginate<F, Fut>(mut fetch: F) -> Result<Vec<RemoteArtifact>, RemoteError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<ArtifactPage, RemoteError>>,
{
    let mut artifacts = Vec::new();
    let mut total_count = 0;

    for page in 1.. {
        let result = fetch(page).await?;
        total_count = result.total_count;
        if result.artifacts.is_empty() {
            break;
        }
        artifacts.extend(result.artifacts);
    }

    if artifacts.len() != total_count {
        warn!(
            fetched = artifacts.len(),
            total_count, "Artifact count does not match the reported total"
        );
    }
    Ok(artifacts)
}

fn validate_repository(repository: &str) -> Result<(), RemoteError> {
    match repository.split('/').collect::<Vec<_>>().as_slice() {
        [owner, name] if !owner.is_empty() && !name.is_empty() => Ok(()),
        _ => Err(RemoteError::InvalidRepository(repository.to_string())),
    }
}

/// Client for the artifacts of one repository.
pub struct GithubArtifacts {
    client: Client,
    api_base: String,
    repository: String,
    token: String,
}

impl GithubArtifacts {
    pub fn new(repository: &str, token: impl Into<String>) -> Result<Self, RemoteError> {
        validate_repository(repository)?;
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            api_base: GITHUB_API_URL.to_string(),
            repository: repository.to_string(),
            token: token.into(),
        })
    }

    /// Reads the token from `GITHUB_TOKEN`.
    pub fn from_env(repository: &str) -> Result<Self, RemoteError> {
        validate_repository(repository)?;
        let token = std::env::var("GITHUB_TOKEN").map_err(|_| RemoteError::MissingToken)?;
        Self::new(repository, token)
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, RemoteError> {
        Ok(self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github+json")
            .send()
            .await?)
    }

    async fn fetch_page(&self, page: usize) -> Result<ArtifactPage, RemoteError> {
        let url = format!(
            "{}/repos/{}/actions/artifacts?per_page={}&page={}",
            self.api_base, self.repository, PER_PAGE, page
        );
        let response = self.get(&url).await?;
        if !response.status().is_success() {
            return Err(RemoteError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.json().await?)
    }

    pub async fn list(&self) -> Result<Vec<RemoteArtifact>, RemoteError> {
        let artifacts = paginate(|page| self.fetch_page(page)).await?;
        info!(repository = %self.repository, count = artifacts.len(), "Listed artifacts");
        Ok(artifacts)
    }

    /// Zip archive of one artifact; `None` once the artifact has expired.
    pub async fn download(&self, artifact_id: u64) -> Result<Option<Vec<u8>>, RemoteError> {
        let url = format!(
            "{}/repos/{}/actions/artifacts/{}/zip",
            self.api_base, self.repository, artifact_id
        );
        let response = self.get(&url).await?;

        match response.status() {
            StatusCode::GONE => {
                warn!(artifact_id, "Artifact is gone, its content may have expired");
                Ok(None)
            }
            status if status.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            status => Err(RemoteError::Status {
                status: status.as_u16(),
                url,
            }),
        }
    }
}
