use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use super::{public_url, RelayError, UploadTarget};

/// catbox.moe: multipart POST, answers with the URL as plain text.
pub struct CatboxTarget {
    client: Client,
    url: String,
    extensions: Vec<String>,
}

#[derive(Deserialize)]
struct CatboxJson {
    fileurl: Option<String>,
}

impl CatboxTarget {
    pub fn new(client: Client, url: &str, extensions: Vec<String>) -> Result<Self, RelayError> {
        url::Url::parse(url).map_err(|e| RelayError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            extensions,
        })
    }
}

#[async_trait]
impl UploadTarget for CatboxTarget {
    fn name(&self) -> &str {
        "Catbox"
    }

    fn allowed_extensions(&self) -> &[String] {
        &self.extensions
    }

    async fn upload(&self, filename: &str, data: Bytes) -> Result<String, RelayError> {
        let mime = mime_guess::from_path(filename).first_or_octet_stream();
        let part = Part::bytes(data.to_vec())
            .file_name(filename.to_string())
            .mime_str(mime.as_ref())?;
        let form = Form::new()
            .text("reqtype", "fileupload")
            .part("fileToUpload", part);

        let resp = self.client.post(&self.url).multipart(form).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(RelayError::Upstream {
                service: self.name().to_string(),
                status: status.as_u16(),
                body,
            });
        }

        // Usually a bare URL, occasionally JSON
        match serde_json::from_str::<CatboxJson>(&body) {
            Ok(CatboxJson {
                fileurl: Some(url),
            }) => public_url(self.name(), &url),
            _ => public_url(self.name(), &body),
        }
    }
}
