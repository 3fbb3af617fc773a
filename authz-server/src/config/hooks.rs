use confique::Config;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HookKind {
    #[default]
    None,
    Script,
}

/// Grant lifecycle hook settings
#[derive(Debug, Config, Clone)]
pub struct HooksConfig {
    /// Hook type: "none" (default) or "script"
    #[config(env = "AUTHZ_HOOKS_KIND", default = "none")]
    pub kind: HookKind,

    /// Interpreter or executable run for every hook call
    #[config(env = "AUTHZ_HOOKS_COMMAND")]
    pub command: Option<String>,

    /// Arguments passed to the command, typically the script path
    #[config(default = [])]
    pub args: Vec<String>,

    /// Upper bound for one hook call in milliseconds (default: 2000)
    #[config(env = "AUTHZ_HOOKS_TIMEOUT_MS", default = 2000)]
    pub timeout_ms: u64,
}

impl HooksConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
