//! Multipart HTTP uploader

use super::{UploadTask, Uploader};
use crate::error::UploadError;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::io;
use std::time::Duration;
use tracing::debug;

/// Response bodies longer than this are cut in error messages.
const MAX_ERROR_BODY: usize = 500;

/// Posts each file as a single-part multipart form.
#[derive(Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
    form_field: String,
}

impl HttpUploader {
    /// `timeout` bounds the whole request so a hung endpoint cannot pin a worker.
    pub fn new(
        endpoint: impl Into<String>,
        form_field: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            form_field: form_field.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Uploader for HttpUploader {
    async fn upload(&self, task: UploadTask) -> Result<(), UploadError> {
        let bytes = match tokio::fs::read(&task.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(UploadError::Superseded(task.name));
            }
            Err(source) => {
                return Err(UploadError::Read {
                    name: task.name,
                    source,
                })
            }
        };

        debug!(file = %task.name, bytes = bytes.len(), endpoint = %self.endpoint, "POST segment");
        let part = Part::bytes(bytes).file_name(task.name.clone());
        let form = Form::new().part(self.form_field.clone(), part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|source| UploadError::Transport {
                name: task.name.clone(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(UploadError::Rejected {
            name: task.name,
            status: status.as_u16(),
            body: truncate_body(&body),
        })
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");

        let long = "x".repeat(MAX_ERROR_BODY + 10);
        let cut = truncate_body(&long);
        assert!(cut.ends_with("... (truncated)"));
        assert_eq!(cut.len(), MAX_ERROR_BODY + "... (truncated)".len());

        let multibyte = "é".repeat(MAX_ERROR_BODY);
        assert!(truncate_body(&multibyte).ends_with("... (truncated)"));
    }

    #[tokio::test]
    async fn test_missing_file_is_superseded() {
        let tmp = tempfile::tempdir().unwrap();
        let uploader =
            HttpUploader::new("http://127.0.0.1:9/", "file", Duration::from_secs(1)).unwrap();

        let err = uploader
            .upload(UploadTask::new("gone.ts", tmp.path().join("gone.ts")))
            .await
            .unwrap_err();
        assert!(err.is_superseded());
    }
}
