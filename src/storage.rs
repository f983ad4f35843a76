//! Blob storage for lesson videos: Azure Blob Storage (REST + SharedKey)
//! or a local directory. Reads are streamed and support byte ranges.

use std::path::{Component, Path, PathBuf};

use axum::body::{Body, Bytes};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use futures::TryStreamExt;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use sha2::Sha256;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::config::StorageSettings;
use crate::error::{AppError, Result, msg};

type HmacSha256 = Hmac<Sha256>;

const AZURE_API_VERSION: &str = "2021-08-06";

/// Outcome of interpreting a `Range` header against a blob size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No (usable) range: send everything
    Full,
    /// Inclusive start and end offsets
    Partial(u64, u64),
    Unsatisfiable,
}

impl ByteRange {
    /// Parse a single `bytes=` range. Syntax we don't understand (units other
    /// than bytes, multiple ranges) falls back to the full body.
    pub fn parse(header: Option<&str>, total: u64) -> Self {
        let Some(spec) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
            return Self::Full;
        };
        if spec.contains(',') {
            return Self::Full;
        }
        let Some((start, end)) = spec.trim().split_once('-') else {
            return Self::Full;
        };

        match (start.trim(), end.trim()) {
            ("", "") => Self::Full,
            // Suffix: last N bytes
            ("", suffix) => match suffix.parse::<u64>() {
                Ok(0) => Self::Unsatisfiable,
                Ok(_) if total == 0 => Self::Unsatisfiable,
                Ok(n) => Self::Partial(total.saturating_sub(n), total - 1),
                Err(_) => Self::Full,
            },
            (start, end) => {
                let Ok(start) = start.parse::<u64>() else {
                    return Self::Full;
                };
                let end = if end.is_empty() {
                    total.saturating_sub(1)
                } else {
                    match end.parse::<u64>() {
                        Ok(e) if e < start => return Self::Full,
                        Ok(e) => e.min(total.saturating_sub(1)),
                        Err(_) => return Self::Full,
                    }
                };
                if start >= total {
                    Self::Unsatisfiable
                } else {
                    Self::Partial(start, end)
                }
            }
        }
    }

    pub fn len(&self, total: u64) -> u64 {
        match self {
            Self::Full => total,
            Self::Partial(start, end) => end - start + 1,
            Self::Unsatisfiable => 0,
        }
    }
}

/// Reject names that could escape the storage root.
fn validate_blob_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && !name.starts_with('/')
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("Invalid blob name: {}", name)))
    }
}

pub enum BlobStore {
    Local { root: PathBuf },
    Azure(AzureBlobClient),
}

impl BlobStore {
    pub fn from_settings(settings: &StorageSettings) -> Self {
        match settings {
            StorageSettings::Local { dir } => Self::Local {
                root: PathBuf::from(dir),
            },
            StorageSettings::Azure {
                account,
                access_key,
                container,
                endpoint,
            } => Self::Azure(AzureBlobClient::new(
                account,
                access_key,
                container,
                endpoint.as_deref(),
            )),
        }
    }

    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::Local { root: root.into() }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Azure(_) => "azure",
        }
    }

    pub async fn put(&self, name: &str, data: Bytes, content_type: &str) -> Result<()> {
        validate_blob_name(name)?;
        match self {
            Self::Local { root } => {
                let path = root.join(name);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let mut file = tokio::fs::File::create(&path).await?;
                file.write_all(&data).await?;
                file.flush().await?;
                Ok(())
            }
            Self::Azure(client) => client.put_blob(name, data, content_type).await,
        }
    }

    /// Stream `range` of a blob whose total size is already known.
    pub async fn read(&self, name: &str, range: ByteRange, total: u64) -> Result<Body> {
        validate_blob_name(name)?;
        let (start, len) = match range {
            ByteRange::Full => (0, total),
            ByteRange::Partial(start, end) => (start, end - start + 1),
            ByteRange::Unsatisfiable => return Ok(Body::empty()),
        };
        match self {
            Self::Local { root } => {
                let mut file = match tokio::fs::File::open(root.join(name)).await {
                    Ok(file) => file,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(AppError::NotFound(msg::VIDEO_NOT_FOUND.into()));
                    }
                    Err(e) => return Err(e.into()),
                };
                file.seek(std::io::SeekFrom::Start(start)).await?;
                Ok(Body::from_stream(ReaderStream::new(file.take(len))))
            }
            Self::Azure(client) => {
                let range = match range {
                    ByteRange::Partial(start, end) => Some((start, end)),
                    _ => None,
                };
                client.get_blob(name, range).await
            }
        }
    }

    /// Delete a blob. Missing blobs are not an error.
    pub async fn delete(&self, name: &str) -> Result<()> {
        validate_blob_name(name)?;
        match self {
            Self::Local { root } => match tokio::fs::remove_file(root.join(name)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            Self::Azure(client) => client.delete_blob(name).await,
        }
    }
}

/// Minimal Azure Blob Storage REST client using SharedKey authorization.
pub struct AzureBlobClient {
    client: Client,
    account: String,
    key: Vec<u8>,
    container: String,
    endpoint: String,
}

impl AzureBlobClient {
    pub fn new(account: &str, access_key: &str, container: &str, endpoint: Option<&str>) -> Self {
        let key = BASE64.decode(access_key.trim()).unwrap_or_else(|_| {
            tracing::error!("AZURE_STORAGE_KEY is not valid base64; requests will be rejected");
            Vec::new()
        });
        Self {
            client: Client::new(),
            account: account.to_string(),
            key,
            container: container.to_string(),
            endpoint: endpoint
                .map(|e| e.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", account)),
        }
    }

    fn blob_url(&self, name: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.container, name)
    }

    /// SharedKey signature over the canonical request.
    /// `ms_headers` must hold every `x-ms-*` header that will be sent.
    fn sign(
        &self,
        method: &Method,
        url: &str,
        content_length: Option<u64>,
        content_type: &str,
        ms_headers: &[(&str, String)],
    ) -> Result<String> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| AppError::Storage(format!("Invalid blob URL: {}", e)))?;

        let mut headers: Vec<(String, &str)> = ms_headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.as_str()))
            .collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();

        let mut canonical_resource = format!("/{}{}", self.account, parsed.path());
        let mut query: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
            .collect();
        query.sort();
        for (k, v) in query {
            canonical_resource.push_str(&format!("\n{}:{}", k, v));
        }

        let content_length = match content_length {
            Some(0) | None => String::new(),
            Some(n) => n.to_string(),
        };
        let string_to_sign = format!(
            "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n{}{}",
            method.as_str(),
            content_length,
            content_type,
            canonical_headers,
            canonical_resource
        );

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|_| AppError::Storage("Invalid storage key".into()))?;
        mac.update(string_to_sign.as_bytes());
        Ok(format!(
            "SharedKey {}:{}",
            self.account,
            BASE64.encode(mac.finalize().into_bytes())
        ))
    }

    fn ms_date() -> String {
        Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }

    pub async fn put_blob(&self, name: &str, data: Bytes, content_type: &str) -> Result<()> {
        let url = self.blob_url(name);
        let ms_headers = vec![
            ("x-ms-blob-type", "BlockBlob".to_string()),
            ("x-ms-date", Self::ms_date()),
            ("x-ms-version", AZURE_API_VERSION.to_string()),
        ];
        let auth = self.sign(
            &Method::PUT,
            &url,
            Some(data.len() as u64),
            content_type,
            &ms_headers,
        )?;

        let mut request = self
            .client
            .put(&url)
            .header("Authorization", auth)
            .header("Content-Type", content_type);
        for (k, v) in &ms_headers {
            request = request.header(*k, v);
        }
        let response = request
            .body(data)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Azure upload failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Storage(format!(
                "Azure upload failed: {} - {}",
                status, body
            )));
        }
        Ok(())
    }

    pub async fn get_blob(&self, name: &str, range: Option<(u64, u64)>) -> Result<Body> {
        let url = self.blob_url(name);
        let mut ms_headers = vec![
            ("x-ms-date", Self::ms_date()),
            ("x-ms-version", AZURE_API_VERSION.to_string()),
        ];
        if let Some((start, end)) = range {
            ms_headers.push(("x-ms-range", format!("bytes={}-{}", start, end)));
        }
        let auth = self.sign(&Method::GET, &url, None, "", &ms_headers)?;

        let mut request = self.client.get(&url).header("Authorization", auth);
        for (k, v) in &ms_headers {
            request = request.header(*k, v);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Azure download failed: {}", e)))?;

        match response.status() {
            s if s.is_success() => Ok(Body::from_stream(
                response
                    .bytes_stream()
                    .map_err(|e| std::io::Error::other(e.to_string())),
            )),
            StatusCode::NOT_FOUND => Err(AppError::NotFound(msg::VIDEO_NOT_FOUND.into())),
            s => Err(AppError::Storage(format!("Azure download failed: {}", s))),
        }
    }

    pub async fn delete_blob(&self, name: &str) -> Result<()> {
        let url = self.blob_url(name);
        let ms_headers = vec![
            ("x-ms-date", Self::ms_date()),
            ("x-ms-version", AZURE_API_VERSION.to_string()),
        ];
        let auth = self.sign(&Method::DELETE, &url, None, "", &ms_headers)?;

        let mut request = self.client.delete(&url).header("Authorization", auth);
        for (k, v) in &ms_headers {
            request = request.header(*k, v);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Azure delete failed: {}", e)))?;

        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            s => Err(AppError::Storage(format!("Azure delete failed: {}", s))),
        }
    }
}
