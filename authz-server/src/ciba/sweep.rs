use super::CibaService;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use sweeper::{Job, JobResult};

/// Periodic job moving overdue pending requests to EXPIRED
pub struct CibaExpirySweep {
    service: Arc<CibaService>,
}

impl CibaExpirySweep {
    pub fn new(service: Arc<CibaService>) -> Self {
        Self { service }
    }
}

impl fmt::Debug for CibaExpirySweep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CibaExpirySweep").finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for CibaExpirySweep {
    fn name(&self) -> &str {
        "ciba-expiry-sweep"
    }

    async fn run(&self) -> JobResult {
        Ok(self.service.expire_due().await?)
    }
}
