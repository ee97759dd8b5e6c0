// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};

/// Very small, safe-ish shell escaper for paths.
pub fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// Joins remote POSIX path segments without touching the local filesystem.
pub fn remote_join(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        format!("/{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Path of `relative` inside the remote copy of a queued job.
/// Rejects anything that could leave the job directory.
pub fn job_file_path(base: &str, job: &str, relative: &str) -> AppResult<String> {
    let invalid = |message: String| {
        AppError::with_message(AppErrorKind::InvalidArgument, codes::INVALID_ARGUMENT, message)
    };
    if job.is_empty() || job.contains('/') || job == "." || job == ".." {
        return Err(invalid(format!("invalid job name '{job}'")));
    }
    if relative.is_empty() || relative.starts_with('/') {
        return Err(invalid(format!("'{relative}' must be a path relative to the job directory")));
    }
    if relative.split('/').any(|segment| segment == "..") {
        return Err(invalid(format!("'{relative}' must not contain '..'")));
    }
    Ok(remote_join(&remote_join(base, job), relative))
}
