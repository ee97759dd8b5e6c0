// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod advisor;
pub mod cli;
pub mod fs;
pub mod ledger;
pub mod mesh;
pub mod ssh;
