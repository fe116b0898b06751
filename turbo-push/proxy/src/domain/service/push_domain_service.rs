//! 推送提交领域服务 - 校验、展开与分流

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use turbo_push_core::metrics::PushApiMetrics;
use turbo_push_core::model::NotificationJob;
use turbo_push_core::queue::TubeStats;

use crate::domain::errors::SubmissionError;
use crate::domain::model::{PushRequestItem, Submission, TubeDirectory};
use crate::domain::repositories::PushJobPublisher;
use crate::infrastructure::validator::RequestValidator;

pub struct PushDomainService {
    publisher: Arc<dyn PushJobPublisher>,
    validator: Arc<dyn RequestValidator>,
    directory: Arc<TubeDirectory>,
    fanout_threshold: usize,
    metrics: PushApiMetrics,
}

impl PushDomainService {
    pub fn new(
        publisher: Arc<dyn PushJobPublisher>,
        validator: Arc<dyn RequestValidator>,
        directory: Arc<TubeDirectory>,
        fanout_threshold: usize,
        metrics: PushApiMetrics,
    ) -> Self {
        Self {
            publisher,
            validator,
            directory,
            fanout_threshold,
            metrics,
        }
    }

    /// 校验整批请求，展开为任务后入队
    ///
    /// 展开后的任务数小于 `fanout_threshold` 时逐个写入应用 tube，
    /// 否则整批作为一个任务写入批量 tube，由批量 worker 再展开。
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn submit(&self, items: Vec<PushRequestItem>) -> Result<Submission, SubmissionError> {
        // 1. 入参校验，任何一项不合法整批拒绝
        self.validator.validate_push_request(&items)?;

        // 2. 展开 token 并写入提交时间
        let now = Utc::now();
        let jobs: Vec<NotificationJob> = items
            .into_iter()
            .flat_map(|item| item.into_jobs(now))
            .collect();
        if jobs.is_empty() {
            debug!("empty push request, nothing to enqueue");
            return Ok(Submission::Individual(0));
        }

        // 3. 分流
        if jobs.len() < self.fanout_threshold {
            self.publisher.publish_jobs(&jobs).await.map_err(|err| {
                warn!(error = %err, jobs = jobs.len(), "failed to enqueue push jobs");
                SubmissionError::Publish(err)
            })?;
            for job in &jobs {
                self.metrics
                    .jobs_enqueued_total
                    .with_label_values(&[job.app_name.as_str()])
                    .inc();
            }
            info!(jobs = jobs.len(), "push jobs enqueued");
            Ok(Submission::Individual(jobs.len()))
        } else {
            self.publisher.publish_batch(&jobs).await.map_err(|err| {
                warn!(error = %err, jobs = jobs.len(), "failed to enqueue push batch");
                SubmissionError::Publish(err)
            })?;
            self.metrics.batches_enqueued_total.inc();
            info!(
                jobs = jobs.len(),
                tube = self.directory.batch_tube(),
                "push batch enqueued"
            );
            Ok(Submission::Batched(jobs.len()))
        }
    }

    /// 指定应用的 tube 统计；未指定时返回批量 tube 与全部应用 tube
    #[instrument(skip(self))]
    pub async fn tube_stats(
        &self,
        app_name: Option<&str>,
    ) -> Result<Vec<TubeStats>, SubmissionError> {
        let tubes: Vec<String> = match app_name {
            Some(app) => {
                if !self.directory.is_registered(app) {
                    return Err(SubmissionError::UnknownApp(app.to_string()));
                }
                vec![self.directory.app_tube(app)]
            }
            None => std::iter::once(self.directory.batch_tube().to_string())
                .chain(
                    self.directory
                        .app_names()
                        .map(|app| self.directory.app_tube(app)),
                )
                .collect(),
        };

        self.publisher
            .tube_stats(&tubes)
            .await
            .map_err(SubmissionError::Publish)
    }
}
