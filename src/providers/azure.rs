use async_trait::async_trait;
use tracing::warn;

use super::{CloudProvider, Outcome};
use crate::error::Result;

/// Accepts AKS pools in the configuration but does not act on them yet
#[derive(Debug, Default)]
pub struct AzureProvider;

#[async_trait]
impl CloudProvider for AzureProvider {
    async fn scale_down(&self, pool: &str, count: i32) -> Result<Outcome> {
        warn!(node_pool = pool, count, "Scaling is not implemented for azure, skipping");
        Ok(Outcome::Done)
    }

    async fn restore(&self, pool: &str) -> Result<Outcome> {
        warn!(node_pool = pool, "Restore is not implemented for azure, skipping");
        Ok(Outcome::Done)
    }

    fn kind(&self) -> &'static str {
        "azure"
    }
}
