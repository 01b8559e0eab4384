//! 推送分发领域服务

use std::sync::Arc;

use futures::future::join_all;
use pilgrim_core::metrics::PushMetrics;
use tracing::{debug, info, instrument, warn};

use super::model::{PushNotification, PushPayload, PushReport};
use super::repository::PushSender;

/// 推送分发器
///
/// 对每个 token 独立投递，单个 token 失败只记录日志，不影响其余 token。
#[derive(Clone)]
pub struct PushDispatcher {
    sender: Arc<dyn PushSender>,
    metrics: Arc<PushMetrics>,
}

impl PushDispatcher {
    pub fn new(sender: Arc<dyn PushSender>, metrics: Arc<PushMetrics>) -> Self {
        Self { sender, metrics }
    }

    #[instrument(skip(self, tokens, notification), fields(tokens = tokens.len(), title = %notification.title))]
    pub async fn send(&self, tokens: &[String], notification: &PushNotification) -> PushReport {
        let tokens: Vec<&String> = tokens.iter().filter(|t| !t.trim().is_empty()).collect();
        if tokens.is_empty() {
            debug!("no push tokens supplied, skipping dispatch");
            return PushReport::default();
        }

        let payload = PushPayload::from_notification(notification);
        self.metrics
            .notifications_total
            .with_label_values(&[payload.kind().as_str()])
            .inc();

        let results = join_all(
            tokens
                .iter()
                .map(|token| self.sender.send_one(token.as_str(), &payload)),
        )
        .await;

        let mut report = PushReport::default();
        for (token, result) in tokens.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    report.success_count += 1;
                    self.metrics
                        .token_results_total
                        .with_label_values(&["success"])
                        .inc();
                }
                Err(err) => {
                    warn!(token = %token, error = %err, "push delivery failed for token");
                    self.metrics
                        .token_results_total
                        .with_label_values(&["failure"])
                        .inc();
                    report.failed_tokens.push(token.clone());
                }
            }
        }

        info!(
            kind = payload.kind().as_str(),
            success = report.success_count,
            failed = report.failed_tokens.len(),
            "push notification dispatched"
        );
        report
    }
}
