use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, multipart};
use serde::Deserialize;

pub const DEFAULT_UPLOAD_URL: &str = "https://upload.uploadcare.com";
pub const DEFAULT_CDN_URL: &str = "https://ucarecdn.com";

/// Errors from the blob store. None of them are fatal to a session.
#[derive(Debug)]
pub enum UploadError {
    Http(reqwest::Error),
    UnexpectedStatus { status: StatusCode, body: String },
    MalformedResponse(String),
    MissingKey,
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Http(err) => write!(f, "http error: {err}"),
            UploadError::UnexpectedStatus { status, body } => {
                write!(f, "unexpected status {status}: {body}")
            }
            UploadError::MalformedResponse(body) => write!(f, "malformed upload response: {body}"),
            UploadError::MissingKey => write!(f, "no upload public key configured"),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<reqwest::Error> for UploadError {
    fn from(value: reqwest::Error) -> Self {
        UploadError::Http(value)
    }
}

/// Durable storage for evidence images.
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` and returns a URL that stays valid after the session.
    fn upload(&self, bytes: Vec<u8>, file_name: &str, mime_type: &'static str) -> Result<String, UploadError>;
}

/// Stand-in used when no upload key is configured. Every upload fails,
/// so violations are still counted but carry no evidence.
#[derive(Debug, Default)]
pub struct DisabledStore;

impl BlobStore for DisabledStore {
    fn upload(&self, _bytes: Vec<u8>, _file_name: &str, _mime_type: &'static str) -> Result<String, UploadError> {
        Err(UploadError::MissingKey)
    }
}

#[derive(Debug, Deserialize)]
struct DirectUploadResponse {
    file: String,
}

/// Uploadcare direct-upload client.
#[derive(Debug, Clone)]
pub struct UploadcareStore {
    upload_url: String,
    cdn_url: String,
    public_key: String,
    http: Client,
}

impl UploadcareStore {
    pub fn new(
        upload_url: impl Into<String>,
        cdn_url: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Result<Self, UploadError> {
        let public_key = public_key.into();
        if public_key.trim().is_empty() {
            return Err(UploadError::MissingKey);
        }
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            upload_url: upload_url.into().trim_end_matches('/').to_string(),
            cdn_url: cdn_url.into().trim_end_matches('/').to_string(),
            public_key,
            http,
        })
    }

    fn cdn_url_for(&self, file_id: &str) -> String {
        format!("{}/{}/", self.cdn_url, file_id)
    }
}

impl BlobStore for UploadcareStore {
    fn upload(&self, bytes: Vec<u8>, file_name: &str, mime_type: &'static str) -> Result<String, UploadError> {
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_type)?;
        let form = multipart::Form::new()
            .text("UPLOADCARE_PUB_KEY", self.public_key.clone())
            .text("UPLOADCARE_STORE", "auto")
            .part("file", part);

        let url = format!("{}/base/", self.upload_url);
        let response = self.http.post(url).multipart(form).send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(UploadError::UnexpectedStatus { status, body });
        }

        let body = response.text()?;
        let parsed: DirectUploadResponse =
            serde_json::from_str(&body).map_err(|_| UploadError::MalformedResponse(body.clone()))?;
        if parsed.file.is_empty() {
            return Err(UploadError::MalformedResponse(body));
        }
        Ok(self.cdn_url_for(&parsed.file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdn_url_keeps_trailing_slash() {
        let store = UploadcareStore::new(DEFAULT_UPLOAD_URL, "https://ucarecdn.com/", "pub").expect("store");
        assert_eq!(store.cdn_url_for("abc-123"), "https://ucarecdn.com/abc-123/");
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(
            UploadcareStore::new(DEFAULT_UPLOAD_URL, DEFAULT_CDN_URL, "  "),
            Err(UploadError::MissingKey)
        ));
    }

    #[test]
    fn direct_upload_response_parses() {
        let parsed: DirectUploadResponse =
            serde_json::from_str(r#"{"file":"17be4678-dab7-4bc7-8753-28914a22960a"}"#).expect("parse");
        assert_eq!(parsed.file, "17be4678-dab7-4bc7-8753-28914a22960a");
    }

    #[test]
    fn disabled_store_always_fails() {
        assert!(matches!(
            DisabledStore.upload(vec![1, 2, 3], "x.png", "image/png"),
            Err(UploadError::MissingKey)
        ));
    }
}
