use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use url::Url;

use super::{public_url, RelayError, UploadTarget};

/// transfer.sh-style hosts: PUT the body at `{base}/{filename}`, the URL
/// comes back as the response body.
pub struct TransferShTarget {
    client: Client,
    base_url: Url,
}

impl TransferShTarget {
    pub fn new(client: Client, base_url: &str) -> Result<Self, RelayError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RelayError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(RelayError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { client, base_url })
    }

    fn upload_url(&self, filename: &str) -> Result<Url, RelayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RelayError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(filename);
        Ok(url)
    }
}

#[async_trait]
impl UploadTarget for TransferShTarget {
    fn name(&self) -> &str {
        "Transfer.sh"
    }

    fn allowed_extensions(&self) -> &[String] {
        &[]
    }

    async fn upload(&self, filename: &str, data: Bytes) -> Result<String, RelayError> {
        let resp = self
            .client
            .put(self.upload_url(filename)?)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(RelayError::Upstream {
                service: self.name().to_string(),
                status: status.as_u16(),
                body,
            });
        }

        public_url(self.name(), &body).or_else(|_| public_url(self.name(), &final_url))
    }
}
