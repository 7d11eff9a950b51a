use std::io;
use std::path::Path;
use std::time::SystemTime;

use futures_util::StreamExt;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use tempfile::NamedTempFile;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;

const SCRATCH_PREFIX: &str = ".canvas-sync-";
const COMPARE_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("download returned {0}")]
    Status(StatusCode),
    #[error("entry has no content source")]
    Unavailable,
}

/// Where a file's bytes come from. The string encodings are the ones carried
/// in the `url` field of catalog records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// Empty url: the remote refuses to serve the file.
    Unavailable,
    /// Fetched over HTTP.
    Remote(String),
    /// `URL:<target>`: written as an internet-shortcut stub.
    Shortcut(String),
    /// `SubHeader:<title>`: written as an empty placeholder.
    Placeholder,
}

impl ContentSource {
    pub fn parse(encoded: &str) -> Self {
        if encoded.is_empty() {
            ContentSource::Unavailable
        } else if let Some(target) = encoded.strip_prefix("URL:") {
            ContentSource::Shortcut(target.to_string())
        } else if encoded.starts_with("SubHeader:") {
            ContentSource::Placeholder
        } else {
            ContentSource::Remote(encoded.to_string())
        }
    }
}

#[derive(Clone)]
pub struct TransferClient {
    http: Client,
    token: Option<String>,
}

impl TransferClient {
    pub fn new(token: Option<String>) -> Self {
        Self::with_http(Client::new(), token)
    }

    pub fn with_http(http: Client, token: Option<String>) -> Self {
        Self { http, token }
    }

    /// Produces the content of `source` as a scratch file inside `dir`, with its
    /// modification time set to `modified`. The scratch file is deleted when
    /// dropped unless it is persisted.
    pub async fn fetch_scratch(
        &self,
        source: &ContentSource,
        dir: &Path,
        modified: OffsetDateTime,
    ) -> Result<NamedTempFile, TransferError> {
        tokio::fs::create_dir_all(dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempfile_in(dir)?;
        let mut file = tokio::fs::File::from_std(scratch.reopen()?);

        match source {
            ContentSource::Unavailable => return Err(TransferError::Unavailable),
            ContentSource::Remote(href) => {
                let url = Url::parse(href)?;
                let mut request = self.http.get(url);
                if let Some(token) = &self.token {
                    request = request.header(AUTHORIZATION, format!("Bearer {token}"));
                }
                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(TransferError::Status(response.status()));
                }
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    file.write_all(&chunk?).await?;
                }
            }
            ContentSource::Shortcut(target) => {
                file.write_all(format!("[InternetShortcut]\nURL={target}\n").as_bytes())
                    .await?;
            }
            ContentSource::Placeholder => {}
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        scratch.as_file().set_modified(SystemTime::from(modified))?;
        Ok(scratch)
    }

    /// Writes `source` to `target`, replacing whatever is there in one rename.
    pub async fn materialize(
        &self,
        source: &ContentSource,
        target: &Path,
        modified: OffsetDateTime,
    ) -> Result<(), TransferError> {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let scratch = self.fetch_scratch(source, dir, modified).await?;
        persist(scratch, target)
    }
}

/// Moves a scratch file over `target`.
pub fn persist(scratch: NamedTempFile, target: &Path) -> Result<(), TransferError> {
    scratch
        .persist(target)
        .map(|_| ())
        .map_err(|err| TransferError::Io(err.error))
}

pub async fn set_modified(path: &Path, modified: OffsetDateTime) -> io::Result<()> {
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    let file = file.into_std().await;
    file.set_modified(SystemTime::from(modified))
}

pub async fn modified_time(path: &Path) -> io::Result<SystemTime> {
    tokio::fs::metadata(path).await?.modified()
}

/// Byte-for-byte comparison of two files.
pub async fn files_identical(left: &Path, right: &Path) -> io::Result<bool> {
    let left_meta = tokio::fs::metadata(left).await?;
    let right_meta = tokio::fs::metadata(right).await?;
    if left_meta.len() != right_meta.len() {
        return Ok(false);
    }

    let mut left = tokio::fs::File::open(left).await?;
    let mut right = tokio::fs::File::open(right).await?;
    let mut left_buf = vec![0u8; COMPARE_CHUNK];
    let mut right_buf = vec![0u8; COMPARE_CHUNK];
    loop {
        let read = fill(&mut left, &mut left_buf).await?;
        let other = fill(&mut right, &mut right_buf).await?;
        if read != other || left_buf[..read] != right_buf[..other] {
            return Ok(false);
        }
        if read == 0 {
            return Ok(true);
        }
    }
}

async fn fill(file: &mut tokio::fs::File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = file.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}
