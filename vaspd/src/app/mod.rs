// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod daemon;
pub mod errors;
pub mod orchestrator;
pub mod ports;
pub mod services;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;
