use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::{ACCEPT, AUTHORIZATION},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::RemoteStore;
use crate::{config::RemoteConfig, error::PublishError};

const GITHUB_API_URL: &str = "https://api.github.com";
const GITHUB_API_VERSION: &str = "2022-11-28";

/// Environment variables consulted for the access token, in order
pub const TOKEN_ENV_VARS: &[&str] = &["GITHUB_TOKEN", "CRON_GITHUB_TOKEN"];

/// Reads the GitHub access token from the environment
#[must_use]
pub fn token_from_env() -> Option<String> {
    TOKEN_ENV_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|token| !token.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    sha: String,
}

/// A file in a GitHub repository, written through the contents API
pub struct GitHubStore {
    client: Client,
    api_url: String,
    repository: String,
    branch: String,
    token: String,
}

impl GitHubStore {
    #[must_use]
    pub fn new(client: Client, remote: &RemoteConfig, token: String) -> Self {
        Self {
            client,
            api_url: GITHUB_API_URL.to_string(),
            repository: remote.repository.clone(),
            branch: remote.branch.clone(),
            token,
        }
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.api_url,
            self.repository,
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }
}

/// Maps a failed contents API response onto a [`PublishError`]
fn status_error(status: StatusCode, path: &str, body: String) -> PublishError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PublishError::Unauthorized,
        // 409 when the branch moved, 422 when the sha is stale or missing
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            PublishError::Conflict(path.to_string())
        }
        status => PublishError::Remote {
            status: status.as_u16(),
            body,
        },
    }
}

async fn remote_error(res: Response, path: &str) -> PublishError {
    let status = res.status();
    status_error(status, path, res.text().await.unwrap_or_default())
}

/// Body of a contents API write. `sha` is only sent when replacing an existing file.
fn put_body(message: &str, content: &str, branch: &str, revision: Option<&str>) -> Value {
    let mut body = json!({
        "message": message,
        "content": BASE64.encode(content),
        "branch": branch,
    });
    if let Some(sha) = revision {
        body["sha"] = json!(sha);
    }
    body
}

#[async_trait]
impl RemoteStore for GitHubStore {
    fn describe(&self, path: &str) -> String {
        format!("github.com/{}@{}:{path}", self.repository, self.branch)
    }

    #[instrument(skip(self))]
    async fn revision(&self, path: &str) -> Result<Option<String>, PublishError> {
        let res = self
            .authorized(self.client.get(self.contents_url(path)))
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;

        if res.status() == StatusCode::NOT_FOUND {
            debug!("{path} does not exist yet");
            return Ok(None);
        }
        if !res.status().is_success() {
            return Err(remote_error(res, path).await);
        }

        let entry = res.json::<ContentEntry>().await?;
        Ok(Some(entry.sha))
    }

    #[instrument(skip(self, content))]
    async fn put(
        &self,
        path: &str,
        content: &str,
        message: &str,
        revision: Option<&str>,
    ) -> Result<(), PublishError> {
        let res = self
            .authorized(self.client.put(self.contents_url(path)))
            .json(&put_body(message, content, &self.branch, revision))
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(remote_error(res, path).await);
        }
        Ok(())
    }
}
