//! HTTP transport built on `reqwest`.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::{Deserialize, Serialize};

use super::{Transfer, UploadTransport};
use crate::error::UploadError;
use crate::model::HttpMethod;
use crate::task::{ProgressReporter, UploadTask};

/// Multipart field the album upload handler reads the file from.
pub const FILE_FIELD: &str = "file";

/// Body chunk size; progress is reported once per chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Which backend protocol to speak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    /// Multipart POST straight to each task's configured endpoint
    Direct,

    /// Legacy flow: ask `sign_endpoint` for one signed URL per file, then PUT
    /// the raw bytes to it
    Signed { sign_endpoint: String },
}

#[derive(Serialize)]
struct SignRequest<'a> {
    files: Vec<SignFile<'a>>,
}

#[derive(Serialize)]
struct SignFile<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    content_type: &'a str,
}

#[derive(Deserialize)]
struct SignResponse {
    urls: Vec<String>,
}

pub struct HttpTransport {
    client: Client,
    protocol: Protocol,
}

impl HttpTransport {
    pub fn new(protocol: Protocol) -> Self {
        Self::with_client(Client::new(), protocol)
    }

    pub fn with_client(client: Client, protocol: Protocol) -> Self {
        HttpTransport { client, protocol }
    }

    async fn sign(&self, sign_endpoint: &str, tasks: &[UploadTask]) -> Result<Vec<String>, UploadError> {
        let request = SignRequest {
            files: tasks
                .iter()
                .map(|task| SignFile {
                    name: task.filename(),
                    content_type: &task.file().content_type,
                })
                .collect(),
        };
        let payload = serde_json::to_vec(&request).map_err(|e| UploadError::SigningFailed {
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .post(sign_endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| UploadError::SigningFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| UploadError::SigningFailed {
                reason: format!("failed to read sign response: {}", e),
            })?;
        if !status.is_success() {
            return Err(UploadError::SigningFailed {
                reason: format!(
                    "sign endpoint responded with {}: {}",
                    status,
                    String::from_utf8_lossy(&body)
                ),
            });
        }

        let signed: SignResponse =
            serde_json::from_slice(&body).map_err(|e| UploadError::SigningFailed {
                reason: format!("malformed sign response: {}", e),
            })?;
        if signed.urls.len() != tasks.len() {
            return Err(UploadError::SigningFailed {
                reason: format!(
                    "expected {} signed URLs, got {}",
                    tasks.len(),
                    signed.urls.len()
                ),
            });
        }
        Ok(signed.urls)
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn prepare_batch(&self, tasks: &[UploadTask]) -> Result<(), UploadError> {
        let sign_endpoint = match &self.protocol {
            Protocol::Direct => return Ok(()),
            Protocol::Signed { sign_endpoint } => sign_endpoint,
        };

        debug!("requesting {} signed URL(s) from {}", tasks.len(), sign_endpoint);
        let urls = self.sign(sign_endpoint, tasks).await.inspect_err(|err| {
            warn!("{}", err);
        })?;
        for (task, url) in tasks.iter().zip(urls) {
            task.configure_endpoint(url, HttpMethod::Put);
        }
        Ok(())
    }

    async fn send(&self, transfer: Transfer) -> Result<u16, UploadError> {
        let Transfer {
            task_id,
            file,
            endpoint,
            progress,
        } = transfer;
        let total = file.size();
        let body = progress_body(file.data.clone(), progress);

        let request = match endpoint.method {
            HttpMethod::Post => {
                let part = Part::stream_with_length(body, total)
                    .file_name(file.name.clone())
                    .mime_str(&file.content_type)
                    .map_err(|e| UploadError::TransferFailed {
                        id: task_id,
                        reason: format!("invalid content type {:?}: {}", file.content_type, e),
                    })?;
                self.client
                    .post(&endpoint.url)
                    .multipart(Form::new().part(FILE_FIELD, part))
            }
            HttpMethod::Put => self
                .client
                .put(&endpoint.url)
                .header(CONTENT_TYPE, file.content_type.as_str())
                .header(CONTENT_LENGTH, total)
                .body(body),
        };

        let response = request
            .send()
            .await
            .map_err(|e| UploadError::TransferFailed {
                id: task_id,
                reason: e.to_string(),
            })?;
        Ok(response.status().as_u16())
    }
}

/// Stream `data` in chunks, reporting the running byte count as each chunk
/// is handed to the connection.
fn progress_body(data: Bytes, progress: ProgressReporter) -> Body {
    let total = data.len() as u64;
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(CHUNK_SIZE)
        .map(|start| data.slice(start..data.len().min(start + CHUNK_SIZE)))
        .collect();

    let mut sent = 0u64;
    let stream = futures_util::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        progress.report(sent, total);
        Ok::<_, std::io::Error>(chunk)
    });
    Body::wrap_stream(stream)
}
