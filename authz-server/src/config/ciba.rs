use confique::Config;
use std::time::Duration;

/// Client-initiated backchannel authentication settings
#[derive(Debug, Config, Clone)]
pub struct CibaConfig {
    /// Enable the backchannel endpoints (default: true)
    #[config(env = "AUTHZ_CIBA_ENABLED", default = true)]
    pub enabled: bool,

    /// Lifetime of a request when the client sends no `requested_expiry` (default: 120)
    #[config(env = "AUTHZ_CIBA_DEFAULT_EXPIRES_IN", default = 120)]
    pub default_expires_in: u64,

    /// Largest `requested_expiry` accepted, in seconds (default: 1800)
    #[config(env = "AUTHZ_CIBA_MAX_EXPIRES_IN", default = 1800)]
    pub max_expires_in: u64,

    /// Minimum seconds between two polls of the same request (default: 2)
    #[config(env = "AUTHZ_CIBA_POLL_INTERVAL", default = 2)]
    pub poll_interval: u64,

    /// Seconds between two runs of the expiry sweep (default: 10)
    #[config(env = "AUTHZ_CIBA_SWEEP_INTERVAL", default = 10)]
    pub sweep_interval: u64,

    /// Timeout for ping and push notifications in seconds (default: 5)
    #[config(env = "AUTHZ_CIBA_DELIVERY_TIMEOUT", default = 5)]
    pub delivery_timeout: u64,

    /// How long terminal requests are kept so late polls see the terminal error (default: 600)
    #[config(env = "AUTHZ_CIBA_ARCHIVE_RETENTION", default = 600)]
    pub archive_retention: u64,
}

impl CibaConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Never shorter than a second, a zero setting included
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval.max(1))
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout)
    }

    pub fn archive_retention(&self) -> Duration {
        Duration::from_secs(self.archive_retention)
    }
}
