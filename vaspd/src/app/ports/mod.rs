// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod advisor;
pub mod file_sync;
pub mod local_fs;
pub mod mesh;
pub mod remote_session;
pub mod retry_ledger;

pub use advisor::RemediationAdvisorPort;
pub use file_sync::FileSyncPort;
pub use local_fs::LocalFilesystemPort;
pub use mesh::MeshGeneratorPort;
pub use remote_session::RemoteSessionPort;
pub use retry_ledger::RetryLedgerPort;
