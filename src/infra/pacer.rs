use crate::app::ports::Pacer;
use async_trait::async_trait;
use std::time::Duration;

/// Pacer that really sleeps on the tokio timer
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
