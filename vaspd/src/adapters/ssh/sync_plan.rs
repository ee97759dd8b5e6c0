// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Transfer planning for mirroring a local job directory onto the cluster.
//!
//! The plan enumerates every local file and directory and maps it to its remote path. Whether a
//! file is actually sent is decided per file by [`needs_upload`] once the remote side has been
//! inspected. Nothing here touches the network.

use anyhow::{Result, bail};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// A single local file and where it lands remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    pub local_path: PathBuf,
    pub rel_path: PathBuf,
    pub remote_path: String,
    /// Seconds since the epoch; 0 when the platform cannot report it.
    pub local_mtime: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub remote_root: String,
    pub items: Vec<SyncItem>,
    /// Every remote directory of the mirror, including the root, parents before children.
    pub remote_dirs: Vec<String>,
}

/// What the remote side holds at a file's destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEntry {
    Missing,
    File { mtime: Option<u64> },
    Directory,
}

pub fn build_sync_plan(local_dir: &Path, remote_dir: &str) -> Result<SyncPlan> {
    if !local_dir.is_dir() {
        bail!("{} is not a directory", local_dir.display());
    }
    let remote_root = remote_dir.trim_end_matches('/').to_string();
    let mut items = Vec::new();
    let mut remote_dirs = BTreeSet::from([remote_root.clone()]);

    for entry in WalkDir::new(local_dir).follow_links(false).sort_by_file_name() {
        let direntry = match entry {
            Ok(v) => v,
            Err(e) => {
                log::warn!("encountered error when enumerating local files: {e}");
                continue;
            }
        };
        let Ok(rel_path) = direntry.path().strip_prefix(local_dir) else {
            continue;
        };
        if rel_path.as_os_str().is_empty() {
            continue;
        }
        let remote_path = join_remote(&remote_root, rel_path);
        if direntry.file_type().is_dir() {
            remote_dirs.insert(remote_path);
            continue;
        }
        if !direntry.file_type().is_file() {
            log::debug!("skipping non-regular file {}", direntry.path().display());
            continue;
        }
        let local_mtime = direntry
            .metadata()
            .ok()
            .and_then(|meta| meta.modified().ok())
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        items.push(SyncItem {
            local_path: direntry.path().to_path_buf(),
            rel_path: rel_path.to_path_buf(),
            remote_path,
            local_mtime,
        });
    }

    Ok(SyncPlan {
        remote_root,
        items,
        remote_dirs: remote_dirs.into_iter().collect(),
    })
}

/// Missing files are sent, as are files whose remote copy is older than the local one.
/// A remote copy at least as new is kept, which preserves INCAR edits made on the cluster.
pub fn needs_upload(local_mtime: u64, remote: RemoteEntry, remote_path: &str) -> Result<bool> {
    match remote {
        RemoteEntry::Missing => Ok(true),
        RemoteEntry::File { mtime: Some(rmtime) } => Ok(rmtime < local_mtime),
        RemoteEntry::File { mtime: None } => Ok(true),
        RemoteEntry::Directory => bail!("{remote_path} is a directory"),
    }
}

/// `/a/b/c` -> `["/a", "/a/b", "/a/b/c"]`, dropping `.` and `..` segments.
pub fn remote_dir_chain(remote_dir: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut cur = String::new();
    for seg in remote_dir.split('/') {
        if seg.is_empty() || seg == "." || seg == ".." {
            continue;
        }
        cur.push('/');
        cur.push_str(seg);
        paths.push(cur.clone());
    }
    paths
}

/// Join a remote base directory and a relative path using '/' separators.
fn join_remote(base: &str, rel: &Path) -> String {
    let mut s = base.trim_end_matches('/').to_string();
    for comp in rel.components() {
        if let std::path::Component::Normal(os) = comp {
            s.push('/');
            s.push_str(&os.to_string_lossy());
        }
    }
    s
}
