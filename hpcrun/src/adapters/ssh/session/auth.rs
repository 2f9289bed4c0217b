// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use russh::client::{AuthResult, KeyboardInteractiveAuthResponse};
use russh::keys::PrivateKeyWithHashAlg;
use std::sync::Arc;

use crate::adapters::ssh::AuthenticationFailure;

use super::{ClientHandler, SessionManager, needs_connect};

/// Servers that keep asking are treated as a rejection.
const MAX_KEYBOARD_INTERACTIVE_ROUNDS: usize = 5;

#[derive(Debug)]
enum AuthDecision {
    Success,
    KeyboardInteractive,
    Failure,
}

fn auth_decision(result: AuthResult) -> AuthDecision {
    match result {
        AuthResult::Success => AuthDecision::Success,
        AuthResult::Failure {
            remaining_methods, ..
        } if remaining_methods.contains(&russh::MethodKind::KeyboardInteractive) => {
            AuthDecision::KeyboardInteractive
        }
        AuthResult::Failure { .. } => AuthDecision::Failure,
    }
}

/// Every prompt is answered with the configured password.
fn keyboard_interactive_answers(password: Option<&str>, prompt_count: usize) -> Option<Vec<String>> {
    if prompt_count == 0 {
        return Some(Vec::new());
    }
    let password = password?;
    Some(vec![password.to_string(); prompt_count])
}

impl SessionManager {
    /// Connect and authenticate unless a live handle already exists.
    pub async fn ensure_connected(&self) -> Result<()> {
        let mut handle_field = self.handle.lock().await;

        // A closed handle is dropped so the next call reconnects.
        if !needs_connect(handle_field.as_ref()) {
            return Ok(());
        }

        let addr = tokio::net::lookup_host((self.params.host.as_str(), self.params.port))
            .await
            .with_context(|| format!("failed to resolve {}", self.params.host))?
            .next()
            .with_context(|| format!("no address found for {}", self.params.host))?;
        tracing::info!(
            user = %self.params.username,
            %addr,
            "establishing ssh connection"
        );
        let handler = ClientHandler::new(
            self.params.host.clone(),
            addr,
            self.params.known_hosts_path.clone(),
        );
        let mut handle = russh::client::connect(self.config.clone(), addr, handler)
            .await
            .context("SSH connect failed")?;
        tracing::debug!(%addr, "connection established, proceeding with auth");

        let decision = if let Some(path) = &self.params.identity_path {
            let key = russh::keys::load_secret_key(path, None)
                .with_context(|| format!("failed to load secret key at {}", path))?;
            // SHA-256 for RSA keys where supported; ignored for other key types
            let pk = PrivateKeyWithHashAlg::new(
                Arc::new(key),
                handle.best_supported_rsa_hash().await?.flatten(),
            );
            let result = handle
                .authenticate_publickey(self.params.username.clone(), pk)
                .await?;
            match auth_decision(result) {
                AuthDecision::Failure if self.params.password.is_some() => {
                    tracing::debug!("public key rejected, trying password");
                    self.authenticate_with_password(&mut handle).await?
                }
                decision => decision,
            }
        } else if self.params.password.is_some() {
            self.authenticate_with_password(&mut handle).await?
        } else {
            AuthDecision::KeyboardInteractive
        };

        match decision {
            AuthDecision::Success => {}
            AuthDecision::KeyboardInteractive => self.do_keyboard_interactive(&mut handle).await?,
            AuthDecision::Failure => return Err(AuthenticationFailure.into()),
        }

        *handle_field = Some(handle);
        drop(handle_field);
        tracing::info!(user = %self.params.username, %addr, "ssh session ready");

        if let Some(interval) = self.config.keepalive_interval {
            let handle_clone = self.handle.clone();
            let want_reply = true;
            let jh = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval / 2);
                loop {
                    ticker.tick().await;
                    let guard = handle_clone.lock().await;
                    let Some(handle) = guard.as_ref() else {
                        continue;
                    };
                    if handle.is_closed() {
                        tracing::debug!("keepalive handle is closed");
                        break;
                    }
                    if let Err(e) = handle.send_keepalive(want_reply).await {
                        tracing::debug!("error when sending a keepalive: {e}");
                    }
                }
            });
            if let Some(previous) = self.keepalive_task_handle.lock().await.replace(jh) {
                previous.abort();
            }
        }
        Ok(())
    }

    async fn authenticate_with_password(
        &self,
        handle: &mut russh::client::Handle<ClientHandler>,
    ) -> Result<AuthDecision> {
        let password = self.params.password.clone().unwrap_or_default();
        let result = handle
            .authenticate_password(self.params.username.clone(), password)
            .await
            .context("password auth failed")?;
        Ok(auth_decision(result))
    }

    /// Keyboard-interactive auth loop answering each prompt with the password.
    async fn do_keyboard_interactive(
        &self,
        handle: &mut russh::client::Handle<ClientHandler>,
    ) -> Result<()> {
        let mut ki = handle
            .authenticate_keyboard_interactive_start(self.params.username.clone(), None)
            .await
            .context("KI start failed")?;

        for _ in 0..MAX_KEYBOARD_INTERACTIVE_ROUNDS {
            match ki {
                KeyboardInteractiveAuthResponse::Success => return Ok(()),
                KeyboardInteractiveAuthResponse::Failure {
                    remaining_methods,
                    partial_success,
                } => {
                    tracing::debug!(
                        partial_success,
                        ?remaining_methods,
                        "keyboard-interactive auth failed"
                    );
                    return Err(AuthenticationFailure.into());
                }
                KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                    let Some(answers) =
                        keyboard_interactive_answers(self.params.password.as_deref(), prompts.len())
                    else {
                        tracing::debug!("server prompted for input but no password is configured");
                        return Err(AuthenticationFailure.into());
                    };
                    ki = handle
                        .authenticate_keyboard_interactive_respond(answers)
                        .await
                        .context("KI respond failed")?;
                }
            }
        }
        Err(AuthenticationFailure.into())
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthDecision, auth_decision, keyboard_interactive_answers};
    use russh::client::AuthResult;
    use russh::{MethodKind, MethodSet};

    #[test]
    fn auth_decision_success() {
        let decision = auth_decision(AuthResult::Success);
        assert!(matches!(decision, AuthDecision::Success));
    }

    #[test]
    fn auth_decision_falls_back_to_keyboard_interactive() {
        let methods = [MethodKind::PublicKey, MethodKind::KeyboardInteractive];
        let decision = auth_decision(AuthResult::Failure {
            remaining_methods: MethodSet::from(methods.as_slice()),
            partial_success: false,
        });
        assert!(matches!(decision, AuthDecision::KeyboardInteractive));
    }

    #[test]
    fn auth_decision_failure_without_keyboard_interactive() {
        let methods = [MethodKind::PublicKey];
        let decision = auth_decision(AuthResult::Failure {
            remaining_methods: MethodSet::from(methods.as_slice()),
            partial_success: false,
        });
        let AuthDecision::Failure = decision else {
            panic!("expected auth failure");
        };
    }

    #[test]
    fn prompts_are_answered_with_the_password() {
        assert_eq!(
            keyboard_interactive_answers(Some("pw"), 2),
            Some(vec!["pw".to_string(), "pw".to_string()])
        );
        assert_eq!(keyboard_interactive_answers(None, 0), Some(Vec::new()));
        assert_eq!(keyboard_interactive_answers(None, 1), None);
    }
}
