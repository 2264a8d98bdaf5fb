//! Raw feed capture: response bodies live once in a content-addressed blob tree, and each
//! fetch leaves a small capture record pointing at its blob.
//!
//! ```text
//! <root>/blobs/<hash[..2]>/<hash>.json
//! <root>/runs/<run_id>/<source_id>/posts-p<N>.capture.json
//! <root>/runs/<run_id>/<source_id>/categories.capture.json
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// One fetched response to archive. `page` is `None` for the category listing.
#[derive(Debug, Clone, Copy)]
pub struct PageCapture<'a> {
    pub run_id: Uuid,
    pub source_id: &'a str,
    pub page: Option<u32>,
    pub url: &'a str,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub run_id: Uuid,
    pub source_id: String,
    pub page: Option<u32>,
    pub url: String,
    pub captured_at: DateTime<Utc>,
    pub sha256: String,
    pub byte_size: usize,
    pub blob_path: PathBuf,
    /// The blob already existed from an earlier fetch with identical bytes.
    pub blob_reused: bool,
}

#[derive(Debug, Clone)]
pub struct PageArchive {
    root: PathBuf,
}

impl PageArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    pub fn blob_relative_path(sha256: &str) -> PathBuf {
        let shard = sha256.get(..2).unwrap_or("00");
        PathBuf::from("blobs")
            .join(shard)
            .join(format!("{sha256}.json"))
    }

    pub fn capture_relative_path(run_id: Uuid, source_id: &str, page: Option<u32>) -> PathBuf {
        let name = match page {
            Some(page) => format!("posts-p{page}.capture.json"),
            None => "categories.capture.json".to_string(),
        };
        PathBuf::from("runs")
            .join(run_id.to_string())
            .join(source_id)
            .join(name)
    }

    pub async fn store_page(&self, capture: PageCapture<'_>) -> anyhow::Result<CaptureRecord> {
        let sha256 = Self::sha256_hex(capture.body);
        let blob_path = Self::blob_relative_path(&sha256);
        let blob_reused = self.write_blob_once(&blob_path, capture.body).await?;

        let record = CaptureRecord {
            run_id: capture.run_id,
            source_id: capture.source_id.to_string(),
            page: capture.page,
            url: capture.url.to_string(),
            captured_at: Utc::now(),
            sha256,
            byte_size: capture.body.len(),
            blob_path,
            blob_reused,
        };

        let record_path = self.root.join(Self::capture_relative_path(
            capture.run_id,
            capture.source_id,
            capture.page,
        ));
        ensure_parent(&record_path).await?;
        let json = serde_json::to_vec_pretty(&record).context("serializing capture record")?;
        fs::write(&record_path, json)
            .await
            .with_context(|| format!("writing {}", record_path.display()))?;
        Ok(record)
    }

    pub async fn read_capture(
        &self,
        run_id: Uuid,
        source_id: &str,
        page: Option<u32>,
    ) -> anyhow::Result<(CaptureRecord, Vec<u8>)> {
        let record_path = self
            .root
            .join(Self::capture_relative_path(run_id, source_id, page));
        let data = fs::read(&record_path)
            .await
            .with_context(|| format!("reading {}", record_path.display()))?;
        let record: CaptureRecord = serde_json::from_slice(&data)
            .with_context(|| format!("parsing {}", record_path.display()))?;
        let body = fs::read(self.root.join(&record.blob_path))
            .await
            .with_context(|| format!("reading blob {}", record.blob_path.display()))?;
        Ok((record, body))
    }

    /// Returns `true` when the blob was already present. New blobs are written to a
    /// temp file and renamed into place so readers never see a partial body.
    async fn write_blob_once(&self, relative: &Path, bytes: &[u8]) -> anyhow::Result<bool> {
        let path = self.root.join(relative);
        if fs::try_exists(&path)
            .await
            .with_context(|| format!("checking {}", path.display()))?
        {
            return Ok(true);
        }
        let parent = ensure_parent(&path).await?;

        let temp_path = parent.join(format!(".{}.partial", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing {}", temp_path.display()))?;
        file.flush().await?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            if fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(true);
            }
            return Err(err).with_context(|| format!("moving blob into {}", path.display()));
        }
        Ok(false)
    }
}

async fn ensure_parent(path: &Path) -> anyhow::Result<PathBuf> {
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating {}", parent.display()))?;
    Ok(parent)
}
