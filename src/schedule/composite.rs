use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::WorkTimeProvider;
use crate::error::Result;

/// Logical AND over a list of providers.
///
/// Evaluation stops at the first provider that says off-time or fails.
/// An empty composite reports work time.
#[derive(Default)]
pub struct CompositeProvider {
    providers: Vec<Box<dyn WorkTimeProvider>>,
}

impl CompositeProvider {
    pub fn new(providers: Vec<Box<dyn WorkTimeProvider>>) -> Self {
        Self { providers }
    }

    pub fn push(&mut self, provider: Box<dyn WorkTimeProvider>) {
        self.providers.push(provider);
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl WorkTimeProvider for CompositeProvider {
    async fn is_work_time(&self, now: DateTime<Utc>) -> Result<bool> {
        for provider in &self.providers {
            if !provider.is_work_time(now).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn describe(&self) -> String {
        let inner: Vec<String> = self.providers.iter().map(|p| p.describe()).collect();
        format!("CompositeProvider[{}]", inner.join("; "))
    }
}
