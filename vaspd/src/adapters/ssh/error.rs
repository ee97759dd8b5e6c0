// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use thiserror::Error as ThisError;

/// Raised when a hop rejects the configured identity.
#[derive(Debug, ThisError)]
#[error("authentication failed for {user}@{host}")]
pub struct AuthenticationFailure {
    pub user: String,
    pub host: String,
}
