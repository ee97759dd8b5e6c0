// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use russh::client::AuthResult;
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg};
use std::sync::Arc;

use crate::adapters::ssh::AuthenticationFailure;

use super::ClientHandler;

#[derive(Debug)]
enum AuthDecision {
    Success,
    /// The key was accepted but the server wants a second factor, which an unattended daemon
    /// cannot answer.
    NeedsSecondFactor,
    Failure,
}

fn auth_decision(result: AuthResult) -> AuthDecision {
    match result {
        AuthResult::Success => AuthDecision::Success,
        AuthResult::Failure {
            partial_success: true,
            ..
        } => AuthDecision::NeedsSecondFactor,
        AuthResult::Failure { .. } => AuthDecision::Failure,
    }
}

/// Public-key authentication for one hop.
pub(super) async fn authenticate(
    handle: &mut russh::client::Handle<ClientHandler>,
    username: &str,
    host: &str,
    key: Arc<PrivateKey>,
) -> Result<()> {
    // Prefer SHA-256 for RSA if applicable (ignored for non-RSA keys)
    let hash = handle
        .best_supported_rsa_hash()
        .await
        .with_context(|| format!("failed to negotiate key hash with {host}"))?
        .flatten();
    let result = handle
        .authenticate_publickey(username.to_string(), PrivateKeyWithHashAlg::new(key, hash))
        .await
        .with_context(|| format!("public key authentication with {host} failed"))?;
    let failure = || AuthenticationFailure {
        user: username.to_string(),
        host: host.to_string(),
    };
    match auth_decision(result) {
        AuthDecision::Success => {
            log::debug!("authenticated {username}@{host}");
            Ok(())
        }
        AuthDecision::NeedsSecondFactor => {
            log::warn!("{host} requires a second authentication factor for {username}");
            Err(failure().into())
        }
        AuthDecision::Failure => Err(failure().into()),
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthDecision, auth_decision};
    use russh::client::AuthResult;
    use russh::{MethodKind, MethodSet};

    #[test]
    fn auth_decision_success() {
        let decision = auth_decision(AuthResult::Success);
        assert!(matches!(decision, AuthDecision::Success));
    }

    #[test]
    fn partial_success_is_reported_as_second_factor() {
        let methods = [MethodKind::KeyboardInteractive];
        let decision = auth_decision(AuthResult::Failure {
            remaining_methods: MethodSet::from(methods.as_slice()),
            partial_success: true,
        });
        assert!(matches!(decision, AuthDecision::NeedsSecondFactor));
    }

    #[test]
    fn rejected_key_is_a_failure() {
        let methods = [MethodKind::PublicKey];
        let decision = auth_decision(AuthResult::Failure {
            remaining_methods: MethodSet::from(methods.as_slice()),
            partial_success: false,
        });
        let AuthDecision::Failure = decision else {
            panic!("expected auth failure");
        };
    }
}
