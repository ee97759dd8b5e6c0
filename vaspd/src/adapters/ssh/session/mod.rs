// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh::client::Config;
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::app::types::SshConfig;

mod auth;
mod exec;
mod sftp;

/// russh client handler that checks each hop's host key against known_hosts.
#[derive(Clone, Debug)]
struct ClientHandler {
    host: String,
    port: u16,
    /// Address the TCP connection actually went to, when resolved locally.
    ip: Option<IpAddr>,
    known_hosts_path: Option<PathBuf>,
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(
            &self.host,
            self.port,
            self.ip,
            server_public_key,
            self.known_hosts_path.as_deref(),
        )
    }
}

fn check_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, russh::keys::Error> {
    match known_hosts_path {
        Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
        None => russh::keys::check_known_hosts(host, port, key),
    }
}

fn learn_known_hosts_for(
    host: &str,
    port: u16,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<(), russh::keys::Error> {
    match known_hosts_path {
        Some(path) => learn_known_hosts_path(host, port, key, path),
        None => learn_known_hosts(host, port, key),
    }
}

/// Accepts a known key, rejects a changed one, and learns a key never seen before.
fn verify_server_key(
    host: &str,
    port: u16,
    ip: Option<IpAddr>,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> std::result::Result<bool, anyhow::Error> {
    let mut candidates = vec![host.to_string()];
    if let Some(ip) = ip.map(|ip| ip.to_string()).filter(|ip| ip != host) {
        candidates.push(ip);
    }
    for candidate in &candidates {
        match check_known_hosts_for(candidate, port, key, known_hosts_path) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => {
                log::warn!("server key validation failed for {host}:{port}: {err}");
                return Err(anyhow!(
                    "server key validation failed for {host}:{port}: {err}"
                ));
            }
        }
    }

    log::info!(
        "server key for {host}:{port} is not present in known_hosts (tried {}); learning",
        candidates.join(", ")
    );
    learn_known_hosts_for(host, port, key, known_hosts_path).map_err(|err| {
        log::warn!("failed to learn server key for {host}:{port}: {err}");
        anyhow!("failed to learn server key for {host}:{port}: {err}")
    })?;
    Ok(true)
}

/// Owns the bastion connection and the target connection tunnelled through it.
///
/// Both hops are established once by [`SessionManager::connect`]; a dropped connection is not
/// re-established, every later operation on it simply fails.
pub struct SessionManager {
    config: SshConfig,
    // Held so the tunnel stays open for the lifetime of the target handle.
    bastion: russh::client::Handle<ClientHandler>,
    // Serializes remote operations over the single target connection.
    target: Mutex<russh::client::Handle<ClientHandler>>,
}

impl SessionManager {
    pub async fn connect(config: SshConfig) -> Result<Self> {
        let client_config = Arc::new(Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(config.keepalive_secs.max(1))),
            keepalive_max: 3,
            channel_buffer_size: 64,
            window_size: 1024 * 1024,
            ..Default::default()
        });
        let identity = Arc::new(
            russh::keys::load_secret_key(&config.identity_path, None).with_context(|| {
                format!(
                    "failed to load secret key at {}",
                    config.identity_path.display()
                )
            })?,
        );

        let bastion_addr = tokio::net::lookup_host((config.bastion.as_str(), config.bastion_port))
            .await
            .with_context(|| format!("failed to resolve bastion {}", config.bastion))?
            .next()
            .ok_or_else(|| anyhow!("bastion {} resolved to no address", config.bastion))?;
        log::info!(
            "connecting to bastion {}@{} ({bastion_addr})",
            config.username,
            config.bastion
        );
        let handler = ClientHandler {
            host: config.bastion.clone(),
            port: config.bastion_port,
            ip: Some(bastion_addr.ip()),
            known_hosts_path: config.known_hosts_path.clone(),
        };
        let mut bastion = russh::client::connect(client_config.clone(), bastion_addr, handler)
            .await
            .with_context(|| format!("SSH connect to bastion {} failed", config.bastion))?;
        auth::authenticate(&mut bastion, &config.username, &config.bastion, identity.clone())
            .await?;

        log::info!(
            "opening tunnel from {} to {}:{}",
            config.bastion,
            config.host,
            config.port
        );
        let tunnel = bastion
            .channel_open_direct_tcpip(config.host.clone(), u32::from(config.port), "127.0.0.1", 0)
            .await
            .with_context(|| {
                format!(
                    "bastion {} refused a tunnel to {}:{}",
                    config.bastion, config.host, config.port
                )
            })?;
        let handler = ClientHandler {
            host: config.host.clone(),
            port: config.port,
            ip: None,
            known_hosts_path: config.known_hosts_path.clone(),
        };
        let mut target = russh::client::connect_stream(client_config, tunnel.into_stream(), handler)
            .await
            .with_context(|| format!("SSH connect to {} through bastion failed", config.host))?;
        auth::authenticate(&mut target, &config.username, &config.host, identity).await?;
        log::info!("connected to {}@{}", config.username, config.host);

        Ok(Self {
            config,
            bastion,
            target: Mutex::new(target),
        })
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    pub async fn is_closed(&self) -> bool {
        self.bastion.is_closed() || self.target.lock().await.is_closed()
    }

    /// Politely closes both hops, target first.
    pub async fn shutdown(&self) {
        let target = self.target.lock().await;
        for (name, handle) in [(&self.config.host, &*target), (&self.config.bastion, &self.bastion)]
        {
            if let Err(err) = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
            {
                log::debug!("disconnect from {name} failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::verify_server_key;
    use russh::keys::ssh_key::PublicKey;

    const KEY_A: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIBERERERERERERERERERERERERERERERERERERERERER";
    const KEY_B: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAICIiIiIiIiIiIiIiIiIiIiIiIiIiIiIiIiIiIiIiIiIi";

    fn public_key(encoded: &str) -> PublicKey {
        PublicKey::from_openssh(encoded).expect("parse public key")
    }

    #[test]
    fn unknown_host_key_is_learned_then_accepted() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let known_hosts = tmp.path().join("known_hosts");
        let key = public_key(KEY_A);

        assert!(verify_server_key("huk", 22, None, &key, Some(&known_hosts)).expect("learn"));
        let contents = std::fs::read_to_string(&known_hosts).expect("known_hosts written");
        assert!(contents.contains("huk"));
        assert!(verify_server_key("huk", 22, None, &key, Some(&known_hosts)).expect("accept"));
    }

    #[test]
    fn changed_host_key_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let known_hosts = tmp.path().join("known_hosts");

        verify_server_key("bastiao", 22, None, &public_key(KEY_A), Some(&known_hosts))
            .expect("learn");
        let err = verify_server_key("bastiao", 22, None, &public_key(KEY_B), Some(&known_hosts))
            .expect_err("mismatched key");
        assert!(err.to_string().contains("bastiao:22"));
    }
}
