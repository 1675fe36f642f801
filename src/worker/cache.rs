//! Disk-backed named caches
//!
//! Layout: `<root>/<cache name>/<key>.entry`, one file per entry. The first
//! line is the JSON metadata (status, headers, original method/url), the rest
//! of the file is the body. Each write goes to a uniquely named temp file that
//! is renamed over the entry, so concurrent writers never share a file and a
//! lookup sees one writer's whole entry or nothing.

use super::fetch::{cache_key, FetchRequest, FetchResponse};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncBufReadExt;

const ENTRY_EXTENSION: &str = "entry";

/// Suffix source for temp file names
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid cache name '{0}'")]
    InvalidName(String),

    #[error("cache I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cache entry {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache entry {0} has no metadata line")]
    Truncated(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    method: String,
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage (all caches)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CacheStorage {
    root: PathBuf,
}

impl CacheStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Open (creating if needed) the cache called `name`
    pub async fn open(&self, name: &str) -> Result<Cache, CacheError> {
        let dir = self.dir_for(name)?;
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        Ok(Cache {
            name: name.to_string(),
            dir,
        })
    }

    /// Names of every existing cache
    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.root)(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&self.root))? {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a cache; `false` if it did not exist
    pub async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let dir = self.dir_for(name)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&dir)(e)),
        }
    }

    fn dir_for(&self, name: &str) -> Result<PathBuf, CacheError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(CacheError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// One named cache
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Cache {
    name: String,
    dir: PathBuf,
}

impl Cache {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store a response under the request's key, replacing any previous entry
    pub async fn put(
        &self,
        request: &FetchRequest,
        response: &FetchResponse,
    ) -> Result<(), CacheError> {
        let path = self.entry_path(&request.cache_key());
        let meta = EntryMeta {
            method: request.method.to_string(),
            url: request.url.to_string(),
            status: response.status,
            headers: response.headers.clone(),
        };
        // Compact JSON escapes newlines, so the header is exactly one line
        let mut contents = serde_json::to_vec(&meta).map_err(|source| CacheError::Corrupt {
            path: path.clone(),
            source,
        })?;
        contents.reserve(response.body.len() + 1);
        contents.push(b'\n');
        contents.extend_from_slice(&response.body);

        write_atomic(&path, &contents).await
    }

    /// Exact-match lookup (same method and URL)
    pub async fn match_request(
        &self,
        request: &FetchRequest,
    ) -> Result<Option<FetchResponse>, CacheError> {
        self.match_key(&request.cache_key()).await
    }

    /// Lookup by method and URL string
    pub async fn match_url(&self, method: &str, url: &str) -> Result<Option<FetchResponse>, CacheError> {
        self.match_key(&cache_key(method, url)).await
    }

    /// Remove one entry; `false` if absent
    pub async fn delete(&self, request: &FetchRequest) -> Result<bool, CacheError> {
        let path = self.entry_path(&request.cache_key());
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// URLs of every stored entry
    pub async fn urls(&self) -> Result<Vec<String>, CacheError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err(&self.dir))?;
        let mut urls = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&self.dir))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(meta) = read_meta_line(&path).await? {
                urls.push(meta.url);
            }
        }
        urls.sort();
        Ok(urls)
    }

    #[cfg(test)]
    pub(crate) fn entry_path_for(&self, request: &FetchRequest) -> PathBuf {
        self.entry_path(&request.cache_key())
    }

    async fn match_key(&self, key: &str) -> Result<Option<FetchResponse>, CacheError> {
        let path = self.entry_path(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => Bytes::from(raw),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path)(e)),
        };
        let split = raw
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| CacheError::Truncated(path.clone()))?;
        let meta: EntryMeta =
            serde_json::from_slice(&raw[..split]).map_err(|source| CacheError::Corrupt {
                path: path.clone(),
                source,
            })?;
        Ok(Some(FetchResponse {
            status: meta.status,
            headers: meta.headers,
            body: raw.slice(split + 1..),
        }))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{ENTRY_EXTENSION}"))
    }
}

/// Read only the metadata line of an entry
async fn read_meta_line(path: &Path) -> Result<Option<EntryMeta>, CacheError> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        // Replaced or deleted while listing
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };
    let mut line = Vec::new();
    tokio::io::BufReader::new(file)
        .read_until(b'\n', &mut line)
        .await
        .map_err(io_err(path))?;
    if line.pop() != Some(b'\n') {
        return Err(CacheError::Truncated(path.to_path_buf()));
    }
    serde_json::from_slice(&line)
        .map(Some)
        .map_err(|source| CacheError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("{}-{}.tmp", std::process::id(), seq));

    if let Err(e) = tokio::fs::write(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(&tmp)(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(path)(e));
    }
    Ok(())
}
