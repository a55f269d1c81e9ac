//! Upload relay: forwards a blob to public file hosts and returns a URL.
//!
//! Every eligible target is tried in parallel; the first success in target
//! order wins. No retries, no backoff.

mod catbox;
mod transfer_sh;

pub use catbox::CatboxTarget;
pub use transfer_sh::TransferShTarget;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::config::RelayConfig;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{service} responded {status}: {body}")]
    Upstream {
        service: String,
        status: u16,
        body: String,
    },
    #[error("{service} returned no usable URL: {body}")]
    InvalidResponse { service: String, body: String },
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("No upload target accepts {0}")]
    NoEligibleTarget(String),
    #[error("Every upload target failed: {0}")]
    AllTargetsFailed(UploadReport),
}

/// A public file host the relay can forward to.
#[async_trait]
pub trait UploadTarget: Send + Sync {
    fn name(&self) -> &str;

    /// Lowercase extensions with a leading dot. Empty accepts anything.
    fn allowed_extensions(&self) -> &[String];

    /// Upload and return the public URL.
    async fn upload(&self, filename: &str, data: Bytes) -> Result<String, RelayError>;

    fn accepts(&self, filename: &str) -> bool {
        let allowed = self.allowed_extensions();
        allowed.is_empty() || extension_of(filename).is_some_and(|ext| allowed.contains(&ext))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Failed,
}

/// Outcome of one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadAttempt {
    pub service: String,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Every attempt of one fan-out, in target order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReport {
    pub attempts: Vec<UploadAttempt>,
}

impl UploadReport {
    /// The first successful URL in target order.
    pub fn url(&self) -> Option<&str> {
        self.attempts.iter().find_map(|a| a.url.as_deref())
    }
}

impl fmt::Display for UploadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failures: Vec<String> = self
            .attempts
            .iter()
            .map(|a| format!("{}: {}", a.service, a.error.as_deref().unwrap_or("ok")))
            .collect();
        f.write_str(&failures.join("; "))
    }
}

pub struct UploadRelay {
    targets: Vec<Arc<dyn UploadTarget>>,
}

impl UploadRelay {
    pub fn new(targets: Vec<Arc<dyn UploadTarget>>) -> Self {
        Self { targets }
    }

    /// Catbox first, then transfer.sh.
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        let catbox = CatboxTarget::new(
            client.clone(),
            &config.catbox_url,
            config.catbox_extensions.clone(),
        )?;
        let transfer_sh = TransferShTarget::new(client, &config.transfer_sh_url)?;

        Ok(Self::new(vec![Arc::new(catbox), Arc::new(transfer_sh)]))
    }

    /// Upload to every target that accepts `filename`, in parallel.
    ///
    /// Succeeds if at least one target produced a URL; the report records
    /// every attempt either way.
    pub async fn upload(&self, filename: &str, data: Bytes) -> Result<UploadReport, RelayError> {
        let eligible: Vec<&Arc<dyn UploadTarget>> =
            self.targets.iter().filter(|t| t.accepts(filename)).collect();
        if eligible.is_empty() {
            return Err(RelayError::NoEligibleTarget(filename.to_string()));
        }

        let uploads = eligible.iter().map(|target| {
            let data = data.clone();
            async move { (target.name().to_string(), target.upload(filename, data).await) }
        });
        let attempts: Vec<UploadAttempt> = futures::future::join_all(uploads)
            .await
            .into_iter()
            .map(|(service, result)| match result {
                Ok(url) => UploadAttempt {
                    service,
                    status: AttemptStatus::Success,
                    url: Some(url),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(service = %service, filename, error = %e, "Upload target failed");
                    UploadAttempt {
                        service,
                        status: AttemptStatus::Failed,
                        url: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();

        let report = UploadReport { attempts };
        match report.url() {
            Some(url) => {
                tracing::debug!(filename, url, "Relayed upload");
                Ok(report)
            }
            None => Err(RelayError::AllTargetsFailed(report)),
        }
    }
}

/// Lowercase extension with a leading dot, e.g. `.png`.
pub fn extension_of(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
}

/// Accept `body` as the upload URL only if it is an absolute http(s) URL.
fn public_url(service: &str, body: &str) -> Result<String, RelayError> {
    let candidate = body.trim();
    match url::Url::parse(candidate) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(candidate.to_string()),
        _ => Err(RelayError::InvalidResponse {
            service: service.to_string(),
            body: candidate.chars().take(200).collect(),
        }),
    }
}
