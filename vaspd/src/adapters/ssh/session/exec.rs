// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use russh::ChannelMsg;

use super::SessionManager;

/// Folds one channel message into the captured output. Returns true once the channel closed.
fn handle_capture_message(
    msg: &ChannelMsg,
    out: &mut Vec<u8>,
    err: &mut Vec<u8>,
    code: &mut Option<i32>,
) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            out.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            err.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            *code = Some(*exit_status as i32);
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

impl SessionManager {
    /// Runs `cmd` on the target and collects stdout, stderr and the exit status.
    /// The exit status is `None` when the channel closed without reporting one.
    pub async fn exec_capture(&self, cmd: &str) -> Result<(Vec<u8>, Vec<u8>, Option<i32>)> {
        let handle = self.target.lock().await;
        let mut chan = handle
            .channel_open_session()
            .await
            .context("open session")?;
        log::debug!("executing '{cmd}'");
        chan.exec(true, cmd).await.context("exec request")?;

        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code = None;
        while let Some(msg) = chan.wait().await {
            if handle_capture_message(&msg, &mut out, &mut err, &mut code) {
                break;
            }
        }

        let _ = chan.close().await;
        Ok((out, err, code))
    }
}

#[cfg(test)]
mod tests {
    use super::handle_capture_message;
    use russh::{ChannelMsg, CryptoVec};

    #[test]
    fn handle_capture_message_accumulates_output() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code = None;

        let msg = ChannelMsg::Data {
            data: CryptoVec::from_slice(b"Submitted batch job "),
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        let msg = ChannelMsg::Data {
            data: CryptoVec::from_slice(b"42\n"),
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(out, b"Submitted batch job 42\n");

        let msg = ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(b"warning"),
            ext: 1,
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(err, b"warning");

        let msg = ChannelMsg::ExitStatus { exit_status: 0 };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(code, Some(0));

        assert!(handle_capture_message(
            &ChannelMsg::Close,
            &mut out,
            &mut err,
            &mut code
        ));
    }

    #[test]
    fn other_extended_streams_are_ignored() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code = None;

        let msg = ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(b"skip"),
            ext: 2,
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert!(out.is_empty());
        assert!(err.is_empty());
        assert_eq!(code, None);
    }
}
