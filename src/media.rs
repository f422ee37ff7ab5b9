use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::MediaConfig;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("local file unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("media host unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("media host rejected the request: {0}")]
    Rejected(String),
    #[error("not a hosted media url: {0}")]
    UnknownUrl(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Video,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Image => "image",
            ResourceKind::Video => "video",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UploadedMedia {
    pub url: String,
    /// Seconds, reported for audio/video uploads.
    pub duration: Option<f64>,
}

/// Third-party storage for uploaded media.
#[async_trait]
pub trait MediaHost: Send + Sync {
    /// Uploads a local file. The local file is gone afterwards whether or
    /// not the upload succeeded.
    async fn upload(&self, path: &Path, kind: ResourceKind) -> Result<UploadedMedia, MediaError>;

    async fn delete(&self, url: &str, kind: ResourceKind) -> Result<(), MediaError>;
}

pub struct CloudinaryHost {
    config: MediaConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl CloudinaryHost {
    pub fn new(config: MediaConfig) -> Result<Self, MediaError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, kind: ResourceKind, action: &str) -> String {
        format!(
            "{}/v1_1/{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.cloud_name,
            kind.as_str(),
            action
        )
    }

    async fn send_upload(&self, path: &Path, kind: ResourceKind) -> Result<UploadedMedia, MediaError> {
        let bytes = fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let timestamp = unix_timestamp().to_string();
        let signature = sign(&[("timestamp", timestamp.as_str())], &self.config.api_secret);

        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("api_key", self.config.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature", signature)
            .text("signature_algorithm", "sha256");

        let response = self
            .client
            .post(self.endpoint(kind, "upload"))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let body: UploadResponse = response.json().await?;
        let url = body
            .secure_url
            .or(body.url)
            .ok_or_else(|| MediaError::Rejected("upload response carried no url".to_string()))?;

        Ok(UploadedMedia {
            url,
            duration: body.duration,
        })
    }
}

#[async_trait]
impl MediaHost for CloudinaryHost {
    async fn upload(&self, path: &Path, kind: ResourceKind) -> Result<UploadedMedia, MediaError> {
        let result = self.send_upload(path, kind).await;

        if let Err(e) = fs::remove_file(path).await {
            warn!("[media] Failed to remove local file {:?}: {}", path, e);
        }

        match &result {
            Ok(media) => info!("[media] ✅ Uploaded {} ({})", media.url, kind.as_str()),
            Err(e) => warn!("[media] ❌ Upload of {:?} failed: {}", path, e),
        }
        result
    }

    async fn delete(&self, url: &str, kind: ResourceKind) -> Result<(), MediaError> {
        let public_id =
            public_id_from_url(url).ok_or_else(|| MediaError::UnknownUrl(url.to_string()))?;

        let timestamp = unix_timestamp().to_string();
        let signature = sign(
            &[("public_id", public_id.as_str()), ("timestamp", timestamp.as_str())],
            &self.config.api_secret,
        );

        let params = [
            ("public_id", public_id.as_str()),
            ("timestamp", timestamp.as_str()),
            ("api_key", self.config.api_key.as_str()),
            ("signature", signature.as_str()),
            ("signature_algorithm", "sha256"),
        ];

        let response = self
            .client
            .post(self.endpoint(kind, "destroy"))
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let body: DestroyResponse = response.json().await?;
        match body.result.as_str() {
            "ok" | "not found" => {
                debug!("[media] destroy {} -> {}", public_id, body.result);
                Ok(())
            }
            other => Err(MediaError::Rejected(format!("destroy returned `{}`", other))),
        }
    }
}

async fn rejection(response: reqwest::Response) -> MediaError {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(body) => MediaError::Rejected(format!("{}: {}", status, body.error.message)),
        Err(_) => MediaError::Rejected(status.to_string()),
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Hex SHA-256 over the `&`-joined, key-sorted parameters followed by the secret.
pub fn sign(params: &[(&str, &str)], secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `.../upload/v123/folder/name.ext` -> `folder/name`. The version segment
/// is optional.
pub fn public_id_from_url(url: &str) -> Option<String> {
    let url = url.split(['?', '#']).next()?;
    let parts: Vec<&str> = url.split('/').filter(|p| !p.is_empty()).collect();
    let (file_name, dirs) = parts.split_last()?;

    let stem = file_name
        .rsplit_once('.')
        .map_or(*file_name, |(stem, _)| stem);
    if stem.is_empty() {
        return None;
    }

    let mut folders: &[&str] = match dirs.iter().position(|p| *p == "upload") {
        Some(index) => &dirs[index + 1..],
        None => &[],
    };
    if let Some(first) = folders.first() {
        if is_version(first) {
            folders = &folders[1..];
        }
    }

    if folders.is_empty() {
        Some(stem.to_string())
    } else {
        Some(format!("{}/{}", folders.join("/"), stem))
    }
}

fn is_version(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}
