/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! # backplane-filesystem
//!
//! File-based [`DataBackplane`] adapter intended for co-located instances
//! sharing a directory (local development, single-host deployments, tests).
//!
//! Each `(owner, type)` pair maps to one file named by the lowercase hex
//! SHA-256 of `owner + type`, holding a length-prefixed record of the three
//! strings. Liveness is a freshness window on the file's last-modified time:
//! files older than the window (default 10 s) are treated as absent by
//! `query` but never deleted, so the next heartbeat simply overwrites them.
//!
//! The caller's own entries are excluded from `query`, consistent with the
//! Consul adapter: self-state belongs to local application state, not to the
//! registry.

mod record;

use async_trait::async_trait;
use data_backplane::{BackplaneError, DataBackplane, Entry};
use record::{decode_record, encode_record};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

const FILESYSTEM_BACKPLANE_TAG: &str = "FileSystemBackplane:";
const FILESYSTEM_BACKPLANE_FN_QUERY_TAG: &str = "query():";

pub struct FileSystemBackplane {
    owner: String,
    folder: PathBuf,
    freshness_window: Duration,
}

impl FileSystemBackplane {
    pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(10);

    pub fn new(owner: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self::with_freshness_window(owner, folder, Self::DEFAULT_FRESHNESS_WINDOW)
    }

    /// The freshness window must comfortably exceed the producers' heartbeat
    /// period or live entries will flicker in and out of query results.
    pub fn with_freshness_window(
        owner: impl Into<String>,
        folder: impl Into<PathBuf>,
        freshness_window: Duration,
    ) -> Self {
        Self {
            owner: owner.into(),
            folder: folder.into(),
            freshness_window,
        }
    }

    fn entry_path(&self, entry_type: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(self.owner.as_bytes());
        hasher.update(entry_type.as_bytes());
        self.folder.join(hex::encode(hasher.finalize()))
    }

    async fn is_fresh(&self, path: &Path) -> bool {
        let Ok(metadata) = tokio::fs::metadata(path).await else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age <= self.freshness_window,
            // A timestamp in the future means a just-written file plus clock
            // jitter; treat it as fresh.
            Err(_) => true,
        }
    }
}

#[async_trait]
impl DataBackplane for FileSystemBackplane {
    async fn publish(&self, entry_type: &str, data: &str) -> Result<(), BackplaneError> {
        tokio::fs::create_dir_all(&self.folder)
            .await
            .map_err(|err| BackplaneError::BackendUnavailable(err.to_string()))?;
        let content = encode_record(&self.owner, entry_type, data);
        tokio::fs::write(self.entry_path(entry_type), content)
            .await
            .map_err(|err| BackplaneError::BackendUnavailable(err.to_string()))
    }

    async fn revoke(&self, entry_type: &str) -> Result<(), BackplaneError> {
        match tokio::fs::remove_file(self.entry_path(entry_type)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BackplaneError::BackendUnavailable(err.to_string())),
        }
    }

    async fn query(&self) -> Result<Vec<Entry>, BackplaneError> {
        let mut dir = match tokio::fs::read_dir(&self.folder).await {
            Ok(dir) => dir,
            // A folder nobody has published into yet is an empty registry,
            // not an unavailable one.
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(BackplaneError::BackendUnavailable(err.to_string())),
        };

        let mut entries = Vec::new();
        loop {
            let dir_entry = match dir.next_entry().await {
                Ok(Some(dir_entry)) => dir_entry,
                Ok(None) => break,
                Err(err) => return Err(BackplaneError::BackendUnavailable(err.to_string())),
            };
            let path = dir_entry.path();

            if !self.is_fresh(&path).await {
                continue;
            }

            // Records racing with a concurrent write or left behind corrupt
            // are skipped, never fatal to the whole query.
            let content = match tokio::fs::read(&path).await {
                Ok(content) => content,
                Err(err) => {
                    debug!(
                        "{}:{} skipping unreadable record {}: {err}",
                        FILESYSTEM_BACKPLANE_TAG,
                        FILESYSTEM_BACKPLANE_FN_QUERY_TAG,
                        path.display()
                    );
                    continue;
                }
            };
            let entry = match decode_record(&content) {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(
                        "{}:{} skipping malformed record {}: {err}",
                        FILESYSTEM_BACKPLANE_TAG,
                        FILESYSTEM_BACKPLANE_FN_QUERY_TAG,
                        path.display()
                    );
                    continue;
                }
            };

            if entry.owner == self.owner {
                continue;
            }
            entries.push(entry);
        }

        Ok(entries)
    }
}
