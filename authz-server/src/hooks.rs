//! Grant lifecycle hooks.
//!
//! A hook is consulted once before a batch of tokens is minted for a grant
//! and may deny issuance or contribute claims to structured access tokens.
//! It is notified after a grant has been revoked. Scripted hooks run an
//! external process speaking JSON over stdin/stdout.

use crate::config::{HookKind, HooksConfig};
use crate::registry::model::{AuthorizationGrant, TokenKind};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("Issuance denied: {0}")]
    Denied(String),
    #[error("Hook is misconfigured: {0}")]
    Config(String),
    #[error("Failed to start hook process: {0}")]
    Spawn(std::io::Error),
    #[error("Hook did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Hook failed: {0}")]
    Protocol(String),
    #[error("Hook I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid hook response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of an allowed issuance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssuanceDecision {
    /// Extra claims for structured access tokens
    pub claims: Map<String, Value>,
}

/// In-process hook implementation
#[async_trait]
pub trait NativeGrantHook: Send + Sync {
    async fn before_issue(
        &self,
        grant: &AuthorizationGrant,
        kinds: &[TokenKind],
    ) -> Result<IssuanceDecision, HookError>;

    async fn after_revoke(&self, _grant: &AuthorizationGrant) -> Result<(), HookError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub enum GrantLifecycleHook {
    #[default]
    NoOp,
    Native(Arc<dyn NativeGrantHook>),
    Scripted(ScriptedHook),
}

impl fmt::Debug for GrantLifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOp => f.write_str("NoOp"),
            Self::Native(_) => f.write_str("Native"),
            Self::Scripted(hook) => f.debug_tuple("Scripted").field(hook).finish(),
        }
    }
}

impl GrantLifecycleHook {
    pub fn from_config(config: &HooksConfig) -> Result<Self, HookError> {
        match config.kind {
            HookKind::None => Ok(Self::NoOp),
            HookKind::Script => {
                let command = config
                    .command
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| HookError::Config("a script hook needs a command".to_string()))?;
                Ok(Self::Scripted(ScriptedHook::new(
                    command,
                    config.args.clone(),
                    config.timeout(),
                )))
            }
        }
    }

    pub async fn before_issue(
        &self,
        grant: &AuthorizationGrant,
        kinds: &[TokenKind],
    ) -> Result<IssuanceDecision, HookError> {
        match self {
            Self::NoOp => Ok(IssuanceDecision::default()),
            Self::Native(hook) => hook.before_issue(grant, kinds).await,
            Self::Scripted(hook) => {
                let response = hook.call(HookEvent::BeforeIssue, grant, kinds).await?;
                if !response.allow {
                    return Err(HookError::Denied(
                        response
                            .reason
                            .unwrap_or_else(|| "rejected by hook".to_string()),
                    ));
                }
                Ok(IssuanceDecision {
                    claims: response.claims,
                })
            }
        }
    }

    pub async fn after_revoke(&self, grant: &AuthorizationGrant) -> Result<(), HookError> {
        match self {
            Self::NoOp => Ok(()),
            Self::Native(hook) => hook.after_revoke(grant).await,
            Self::Scripted(hook) => hook
                .call(HookEvent::AfterRevoke, grant, &[])
                .await
                .map(|_| ()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
enum HookEvent {
    BeforeIssue,
    AfterRevoke,
}

#[derive(Serialize)]
struct HookRequest<'a> {
    event: HookEvent,
    grant: &'a AuthorizationGrant,
    token_kinds: &'a [TokenKind],
}

fn default_allow() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct HookResponse {
    #[serde(default = "default_allow")]
    allow: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    claims: Map<String, Value>,
}

/// Runs `command args...` once per call with a cleared environment. The
/// request is written to stdin as JSON, the response read from stdout. The
/// process is killed when the timeout elapses.
#[derive(Debug, Clone)]
pub struct ScriptedHook {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ScriptedHook {
    pub fn new(command: String, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            args,
            timeout,
        }
    }

    async fn call(
        &self,
        event: HookEvent,
        grant: &AuthorizationGrant,
        kinds: &[TokenKind],
    ) -> Result<HookResponse, HookError> {
        let input = serde_json::to_vec(&HookRequest {
            event,
            grant,
            token_kinds: kinds,
        })?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(HookError::Spawn)?;

        let run = async move {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&input).await?;
            }
            Ok::<_, HookError>(child.wait_with_output().await?)
        };
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| HookError::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HookError::Protocol(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }
        debug!("Hook {} answered {:?} for grant {}", self.command, event, grant.grant_id);
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}
