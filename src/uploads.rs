use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::http::{header::CONTENT_TYPE, HeaderMap};
use bytes::Bytes;
use multer::{Constraints, Multipart, SizeLimit};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::ApiError;

const MAX_FIELDS: usize = 16;

/// A multipart file streamed to the upload directory. The file is removed
/// when this value is dropped unless something else already removed it.
#[derive(Debug)]
pub struct SavedFile {
    pub path: PathBuf,
    pub original_name: String,
    pub size: u64,
}

impl Drop for SavedFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Text fields and saved files of one multipart request.
#[derive(Debug, Default)]
pub struct UploadForm {
    fields: HashMap<String, String>,
    files: HashMap<String, SavedFile>,
}

impl UploadForm {
    /// Trimmed value of a text field; blank counts as missing.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn take_file(&mut self, name: &str) -> Option<SavedFile> {
        self.files.remove(name)
    }
}

fn bad_request(e: multer::Error) -> ApiError {
    match e {
        multer::Error::FieldSizeExceeded { limit, .. } | multer::Error::StreamSizeExceeded { limit } => {
            ApiError::InvalidInput(format!(
                "File too large. Maximum file size is {}MB.",
                limit / 1024 / 1024
            ))
        }
        other => ApiError::InvalidInput(format!("Error parsing multipart request: {}", other)),
    }
}

fn write_failed(e: std::io::Error) -> ApiError {
    error!("Failed to save upload: {}", e);
    ApiError::Internal("Failed to save uploaded file".to_string())
}

/// Keeps the final path component and replaces anything unusual.
fn sanitize_file_name(raw: &str) -> String {
    let name = Path::new(raw)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Parses a buffered multipart body, streaming every file part into
/// `upload_dir`.
pub async fn parse_upload(
    headers: &HeaderMap,
    body: Bytes,
    upload_dir: &Path,
    max_file_size: u64,
) -> Result<UploadForm, ApiError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidInput("Missing Content-Type header".to_string()))?;

    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| ApiError::InvalidInput(format!("Invalid multipart request: {}", e)))?;

    let stream = futures::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = Multipart::with_constraints(
        stream,
        boundary,
        Constraints::new().size_limit(SizeLimit::new().per_field(max_file_size)),
    );

    fs::create_dir_all(upload_dir).await.map_err(write_failed)?;

    let mut form = UploadForm::default();
    let mut seen = 0usize;

    while let Some(mut field) = multipart.next_field().await.map_err(bad_request)? {
        seen += 1;
        if seen > MAX_FIELDS {
            return Err(ApiError::InvalidInput("Too many multipart fields".to_string()));
        }

        let name = field.name().unwrap_or("").to_string();

        let original_name = match field.file_name().map(str::to_string) {
            Some(file_name) => file_name,
            None => {
                let value = field.text().await.map_err(bad_request)?;
                form.fields.insert(name, value);
                continue;
            }
        };

        let path = upload_dir.join(format!(
            "{}-{}",
            Uuid::new_v4().simple(),
            sanitize_file_name(&original_name)
        ));
        let mut saved = SavedFile {
            path,
            original_name,
            size: 0,
        };

        let mut file = fs::File::create(&saved.path).await.map_err(write_failed)?;
        while let Some(chunk) = field.chunk().await.map_err(bad_request)? {
            file.write_all(&chunk).await.map_err(write_failed)?;
            saved.size += chunk.len() as u64;
        }
        file.flush().await.map_err(write_failed)?;

        debug!(
            "[upload] saved `{}` as `{}` ({:.2} MB) to {:?}",
            saved.original_name,
            name,
            saved.size as f64 / 1024.0 / 1024.0,
            saved.path
        );
        form.files.insert(name, saved);
    }

    Ok(form)
}

#[cfg(test)]
pub fn multipart_body(texts: &[(&str, &str)], files: &[(&str, &str, &[u8])]) -> (HeaderMap, Bytes) {
    let boundary = "XyZboundary42";
    let mut body = Vec::new();

    for (name, value) in texts {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for (name, file_name, data) in files {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        format!("multipart/form-data; boundary={boundary}")
            .parse()
            .unwrap(),
    );
    (headers, Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn saves_files_and_collects_text() {
        let dir = tempfile::tempdir().unwrap();
        let (headers, body) = multipart_body(
            &[("title", "  My clip "), ("description", "")],
            &[("videoFile", "../../etc/clip one.mp4", &b"0123456789"[..])],
        );

        let mut form = parse_upload(&headers, body, dir.path(), 1024).await.unwrap();
        assert_eq!(form.text("title"), Some("My clip"));
        assert_eq!(form.text("description"), None);

        let file = form.take_file("videoFile").unwrap();
        assert_eq!(file.size, 10);
        assert_eq!(file.original_name, "../../etc/clip one.mp4");
        assert!(file.path.starts_with(dir.path()));
        assert!(file.path.to_string_lossy().ends_with("clip_one.mp4"));
        assert!(file.path.exists());

        let path = file.path.clone();
        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn oversized_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (headers, body) = multipart_body(&[], &[("videoFile", "big.mp4", &[7u8; 64][..])]);

        let err = parse_upload(&headers, body, dir.path(), 16).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn non_multipart_requests_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());

        let err = parse_upload(&headers, Bytes::from_static(b"{}"), dir.path(), 16)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }
}
