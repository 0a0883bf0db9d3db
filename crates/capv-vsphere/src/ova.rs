//! Random-access reader for OVA (tar) archives.
//!
//! Only tar headers are read while indexing; entry data is fetched on demand
//! with positioned reads, which for remote archives are HTTP range requests.
//! An OVA on a web server is never downloaded as a whole.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use crate::types::basename;
use crate::{Error, Result};

const BLOCK: u64 = 512;

/// Positioned reads from wherever the archive lives
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Up to `len` bytes at `offset`; shorter only at end of file
    async fn read_at(&self, offset: u64, len: u64) -> Result<Bytes>;
}

/// Archive on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalArchive {
    path: PathBuf,
}

impl LocalArchive {
    /// Reads `path` on demand
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ArchiveSource for LocalArchive {
    async fn read_at(&self, offset: u64, len: u64) -> Result<Bytes> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.take(len).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Archive served over HTTP(S); the server must honour `Range`
#[derive(Debug, Clone)]
pub struct HttpArchive {
    client: reqwest::Client,
    url: Url,
}

impl HttpArchive {
    /// Reads `url` with ranged GETs
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl ArchiveSource for HttpArchive {
    async fn read_at(&self, offset: u64, len: u64) -> Result<Bytes> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let range = format!("bytes={}-{}", offset, offset + len - 1);
        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, &range)
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => Ok(response.bytes().await?),
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(Bytes::new()),
            status if status.is_success() => Err(Error::archive(
                self.url.as_str(),
                "server does not support range requests",
            )),
            status => Err(Error::archive(
                self.url.as_str(),
                format!("unexpected status {} for {}", status, range),
            )),
        }
    }
}

/// One regular file inside the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive
    pub name: String,
    /// Offset of the entry's data (just past its header)
    pub offset: u64,
    /// Data length in bytes
    pub size: u64,
}

/// Indexed view of an OVA
pub struct OvaArchive {
    location: String,
    source: Arc<dyn ArchiveSource>,
    entries: OnceCell<Vec<ArchiveEntry>>,
}

impl OvaArchive {
    /// Archive read through `source`; nothing is read until an entry is needed
    pub fn new(location: impl Into<String>, source: Arc<dyn ArchiveSource>) -> Self {
        Self {
            location: location.into(),
            source,
            entries: OnceCell::new(),
        }
    }

    /// A local path or an `http(s)://` URL
    pub fn open(location: &str) -> Result<Self> {
        if is_remote(location) {
            let url = Url::parse(location)?;
            let client = reqwest::Client::builder().build()?;
            Ok(Self::new(location, Arc::new(HttpArchive::new(client, url))))
        } else {
            Ok(Self::new(location, Arc::new(LocalArchive::new(location))))
        }
    }

    /// Path or URL the archive was opened from
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Regular files in archive order
    pub async fn entries(&self) -> Result<&[ArchiveEntry]> {
        let entries = self.entries.get_or_try_init(|| self.scan()).await?;
        Ok(entries.as_slice())
    }

    async fn scan(&self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::new();
        let mut offset = 0u64;
        let mut long_name: Option<String> = None;

        loop {
            let block = self.source.read_at(offset, BLOCK).await?;
            if block.len() < BLOCK as usize || block.iter().all(|b| *b == 0) {
                break;
            }
            let header = tar::Header::from_byte_slice(&block);
            let size = header
                .entry_size()
                .map_err(|e| Error::archive(&self.location, format!("bad header at {}: {}", offset, e)))?;
            let data_offset = offset + BLOCK;
            let entry_type = header.entry_type();

            if entry_type.is_gnu_longname() {
                let data = self.source.read_at(data_offset, size).await?;
                long_name = Some(String::from_utf8_lossy(&data).trim_end_matches('\0').to_string());
            } else if entry_type.is_pax_local_extensions() {
                let data = self.source.read_at(data_offset, size).await?;
                if let Some(path) = pax_path(&data) {
                    long_name = Some(path);
                }
            } else if entry_type.is_file() {
                let name = match long_name.take() {
                    Some(name) => name,
                    None => header
                        .path()
                        .map_err(|e| Error::archive(&self.location, e.to_string()))?
                        .to_string_lossy()
                        .into_owned(),
                };
                entries.push(ArchiveEntry {
                    name,
                    offset: data_offset,
                    size,
                });
            } else {
                long_name = None;
            }

            offset = data_offset + size.div_ceil(BLOCK) * BLOCK;
        }

        debug!(location = %self.location, entries = entries.len(), "indexed archive");
        Ok(entries)
    }

    /// First entry whose base name matches a glob such as `*.ovf`
    pub async fn find(&self, pattern: &str) -> Result<ArchiveEntry> {
        let glob = glob_pattern(pattern)?;
        self.entries()
            .await?
            .iter()
            .find(|e| glob.matches(basename(&e.name)))
            .cloned()
            .ok_or_else(|| Error::not_found("archive entry", format!("{} in {}", pattern, self.location)))
    }

    /// Entry whose name or base name equals `path`
    pub async fn entry(&self, path: &str) -> Result<ArchiveEntry> {
        self.entries()
            .await?
            .iter()
            .find(|e| e.name == path || basename(&e.name) == basename(path))
            .cloned()
            .ok_or_else(|| Error::not_found("archive entry", format!("{} in {}", path, self.location)))
    }

    /// `len` bytes of an entry starting at `offset` within it
    pub async fn read_range(&self, entry: &ArchiveEntry, offset: u64, len: u64) -> Result<Bytes> {
        let len = len.min(entry.size.saturating_sub(offset));
        let data = self.source.read_at(entry.offset + offset, len).await?;
        if (data.len() as u64) < len {
            return Err(Error::archive(
                &self.location,
                format!("{} is truncated", entry.name),
            ));
        }
        Ok(data)
    }

    /// Whole entry
    pub async fn read_entry(&self, entry: &ArchiveEntry) -> Result<Bytes> {
        self.read_range(entry, 0, entry.size).await
    }
}

/// Whether `location` is an HTTP(S) URL
pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// `path=` record of a pax extended header
fn pax_path(data: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(data);
    text.lines().find_map(|record| {
        let (_, kv) = record.split_once(' ')?;
        kv.strip_prefix("path=").map(str::to_string)
    })
}

/// Compile a shell-style pattern such as `*.ovf`
pub fn glob_pattern(pattern: &str) -> Result<glob::Pattern> {
    glob::Pattern::new(pattern).map_err(|e| {
        capv_common::Error::validation(format!("invalid pattern '{}': {}", pattern, e)).into()
    })
}
