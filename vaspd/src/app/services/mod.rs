// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod incar;
pub mod log_analyzer;
pub mod shell;
pub mod slurm;
