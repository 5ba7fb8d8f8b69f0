//! GitHub REST implementation of the repository host used for report submission.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::SubmissionConfig;
use crate::reports::{ForkHandle, RepoHost};

const FORK_READY_ATTEMPTS: u32 = 10;
const FORK_READY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct RepoResponse {
    full_name: String,
    #[serde(default)]
    owner: Option<OwnerResponse>,
}

#[derive(Debug, Deserialize)]
struct OwnerResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Clone)]
struct Api {
    client: Client,
    base: String,
}

impl Api {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base, path.trim_start_matches('/')))
    }
}

pub struct GithubHost {
    api: Api,
    ready_attempts: u32,
    ready_delay: Duration,
}

impl GithubHost {
    pub fn new(config: &SubmissionConfig) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| anyhow!("Report submission requires a GitHub token"))?;

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("GitHub token is not a valid header value")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("scamdb-api/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build GitHub HTTP client")?;
        Ok(Self {
            api: Api {
                client,
                base: config.api_base.trim_end_matches('/').to_string(),
            },
            ready_attempts: FORK_READY_ATTEMPTS,
            ready_delay: FORK_READY_DELAY,
        })
    }
}

#[async_trait]
impl RepoHost for GithubHost {
    async fn fork_repo(&self, upstream: &str) -> Result<Box<dyn ForkHandle>> {
        let fork: RepoResponse = self
            .api
            .request(Method::POST, &format!("repos/{upstream}/forks"))
            .json(&json!({}))
            .send()
            .await
            .with_context(|| format!("Failed to fork {upstream}"))?
            .error_for_status()
            .with_context(|| format!("Forking {upstream} was rejected"))?
            .json()
            .await
            .context("Fork response was not valid JSON")?;

        let owner = fork
            .owner
            .map(|owner| owner.login)
            .or_else(|| fork.full_name.split('/').next().map(str::to_string))
            .unwrap_or_default();
        info!(fork = %fork.full_name, "Fork requested");
        Ok(Box::new(GithubFork {
            api: self.api.clone(),
            upstream: upstream.to_string(),
            full_name: fork.full_name,
            owner,
            ready_attempts: self.ready_attempts,
            ready_delay: self.ready_delay,
        }))
    }
}

pub struct GithubFork {
    api: Api,
    upstream: String,
    full_name: String,
    owner: String,
    ready_attempts: u32,
    ready_delay: Duration,
}

impl GithubFork {
    async fn existing_sha(&self, path: &str) -> Result<Option<String>> {
        #[derive(Deserialize)]
        struct Contents {
            sha: String,
        }

        let response = self
            .api
            .request(Method::GET, &format!("repos/{}/contents/{path}", self.full_name))
            .send()
            .await
            .with_context(|| format!("Failed to read {path} in {}", self.full_name))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let contents: Contents = response
            .error_for_status()
            .with_context(|| format!("Reading {path} in {} was rejected", self.full_name))?
            .json()
            .await
            .context("Contents response was not valid JSON")?;
        Ok(Some(contents.sha))
    }
}

#[async_trait]
impl ForkHandle for GithubFork {
    fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Forks are created asynchronously; poll until the repository answers.
    async fn wait_until_ready(&self) -> Result<()> {
        let full_name = self.full_name.as_str();
        for attempt in 1..=self.ready_attempts {
            let response = self
                .api
                .request(Method::GET, &format!("repos/{full_name}"))
                .send()
                .await
                .with_context(|| format!("Failed to poll fork {full_name}"))?;
            match response.status() {
                status if status.is_success() => {
                    info!(fork = full_name, "Fork ready");
                    return Ok(());
                }
                StatusCode::NOT_FOUND | StatusCode::CONFLICT => {
                    debug!(fork = full_name, attempt, "Fork not ready yet");
                    tokio::time::sleep(self.ready_delay).await;
                }
                status => bail!("Polling fork {full_name} returned {status}"),
            }
        }
        bail!(
            "Fork {full_name} not ready after {} attempts",
            self.ready_attempts
        )
    }

    async fn write_file(&self, path: &str, message: &str, content: &str) -> Result<()> {
        let mut body = json!({
            "message": message,
            "content": STANDARD.encode(content.as_bytes()),
        });
        if let Some(sha) = self.existing_sha(path).await? {
            body["sha"] = json!(sha);
        }
        self.api
            .request(Method::PUT, &format!("repos/{}/contents/{path}", self.full_name))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to commit {path} to {}", self.full_name))?
            .error_for_status()
            .with_context(|| format!("Commit of {path} to {} was rejected", self.full_name))?;
        Ok(())
    }

    async fn open_request(&self, title: &str, body: &str, base: &str) -> Result<Option<String>> {
        let pull: PullResponse = self
            .api
            .request(Method::POST, &format!("repos/{}/pulls", self.upstream))
            .json(&pull_request_body(title, body, &self.owner, base))
            .send()
            .await
            .with_context(|| format!("Failed to open pull request on {}", self.upstream))?
            .error_for_status()
            .with_context(|| format!("Pull request on {} was rejected", self.upstream))?
            .json()
            .await
            .context("Pull request response was not valid JSON")?;
        Ok(pull.html_url)
    }

    async fn delete(&self) -> Result<()> {
        let response = self
            .api
            .request(Method::DELETE, &format!("repos/{}", self.full_name))
            .send()
            .await
            .with_context(|| format!("Failed to delete fork {}", self.full_name))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        response
            .error_for_status()
            .with_context(|| format!("Deleting fork {} was rejected", self.full_name))?;
        Ok(())
    }
}

fn pull_request_body(title: &str, body: &str, owner: &str, base: &str) -> serde_json::Value {
    // The fork's default branch carries the commit.
    json!({
        "title": title,
        "body": body,
        "head": format!("{owner}:{base}"),
        "base": base,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: Option<&str>) -> SubmissionConfig {
        SubmissionConfig {
            enabled: true,
            upstream: "CryptoScamDB/blacklist".to_string(),
            base_branch: "master".to_string(),
            file_path: "commands/cmd.yaml".to_string(),
            api_base: "https://api.github.com/".to_string(),
            token: token.map(str::to_string),
            drain_interval_ms: 600_000,
            run_timeout_ms: 60_000,
            request_timeout_ms: 5_000,
            api_keys: Vec::new(),
        }
    }

    #[test]
    fn host_requires_token() {
        assert!(GithubHost::new(&config(None)).is_err());
        assert!(GithubHost::new(&config(Some(""))).is_err());
        let host = GithubHost::new(&config(Some("ghp_test"))).unwrap();
        assert_eq!(host.api.base, "https://api.github.com");
    }

    #[test]
    fn pull_request_heads_from_fork_owner() {
        let body = pull_request_body("Added a new entry", "body", "scamdb-bot", "master");
        assert_eq!(body["head"], "scamdb-bot:master");
        assert_eq!(body["base"], "master");
        assert_eq!(body["title"], "Added a new entry");
    }

    #[test]
    fn contents_are_base64() {
        assert_eq!(STANDARD.encode("type: ADD\n"), "dHlwZTogQURECg==");
    }
}
