//! 批量 tube 消费者
//!
//! 从批量 tube reserve 聚合任务，把其中的每个任务按自身优先级和延迟写入对应的
//! 应用 tube，全部写入后删除聚合任务。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use turbo_push_core::metrics::PushApiMetrics;
use turbo_push_core::model::NotificationJob;
use turbo_push_core::queue::{
    JobQueue, PutOptions, QueueConnector, QueueError, ReservedJob, connect_with_retry,
};
use turbo_push_core::{PriorityConfig, RetryableError};

use crate::domain::model::TubeDirectory;

#[derive(Debug, Clone, Copy)]
pub struct BatchConsumerSettings {
    pub reserve_timeout: Duration,
    pub reconnect_delay: Duration,
    pub ttr: Duration,
}

pub struct BatchPushConsumer {
    connector: Arc<dyn QueueConnector>,
    directory: Arc<TubeDirectory>,
    priorities: PriorityConfig,
    settings: BatchConsumerSettings,
    metrics: PushApiMetrics,
    conn: Option<Box<dyn JobQueue>>,
}

impl BatchPushConsumer {
    pub fn new(
        connector: Arc<dyn QueueConnector>,
        directory: Arc<TubeDirectory>,
        priorities: PriorityConfig,
        settings: BatchConsumerSettings,
        metrics: PushApiMetrics,
    ) -> Self {
        Self {
            connector,
            directory,
            priorities,
            settings,
            metrics,
            conn: None,
        }
    }

    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let tube = self.directory.batch_tube().to_string();
        info!(tube = %tube, "batch consumer started");
        loop {
            if *stop.borrow() || stop.has_changed().is_err() {
                break;
            }

            if self.conn.is_none() {
                let Some(mut conn) = connect_with_retry(
                    self.connector.as_ref(),
                    self.settings.reconnect_delay,
                    &mut stop,
                )
                .await
                else {
                    break;
                };
                if let Err(err) = conn.watch_only(&tube).await {
                    warn!(error = %err, tube = %tube, "failed to watch batch tube");
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                        _ = stop.changed() => {}
                    }
                    continue;
                }
                self.conn = Some(conn);
            }

            let Some(conn) = self.conn.as_mut() else {
                continue;
            };
            match conn.reserve(self.settings.reserve_timeout).await {
                Ok(Some(job)) => {
                    if let Err(err) = self.expand(job).await {
                        self.on_broker_error(err);
                    }
                }
                Ok(None) => {}
                Err(err) => self.on_broker_error(err),
            }
        }
        info!(tube = %tube, "batch consumer stopped");
    }

    /// 展开一个聚合任务；连接出错时聚合任务不删除，TTR 到期后由 broker 重新投递
    async fn expand(&mut self, batch: ReservedJob) -> Result<(), QueueError> {
        let low = self.priorities.low;
        let Some(conn) = self.conn.as_mut() else {
            return Err(QueueError::Closed);
        };

        let jobs: Vec<NotificationJob> = match serde_json::from_slice(&batch.body) {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(job_id = batch.id, error = %err, "unparseable batch body, burying");
                self.metrics
                    .requests_rejected_total
                    .with_label_values(&["batch_parse"])
                    .inc();
                return conn.bury(batch.id, low).await;
            }
        };

        for job in &jobs {
            let body = match job.to_vec() {
                Ok(body) => body,
                Err(err) => {
                    warn!(job_id = batch.id, error = %err, "failed to encode batched job, skipping");
                    continue;
                }
            };
            let options = PutOptions {
                priority: self.priorities.value_of(job.priority),
                delay: Duration::from_secs(job.delay),
                ttr: self.settings.ttr,
            };
            conn.use_tube(&self.directory.app_tube(&job.app_name)).await?;
            conn.put(&body, options).await?;
            self.metrics
                .jobs_enqueued_total
                .with_label_values(&[job.app_name.as_str()])
                .inc();
        }

        conn.ack(batch.id).await?;
        debug!(job_id = batch.id, jobs = jobs.len(), "batch expanded");
        Ok(())
    }

    fn on_broker_error(&mut self, err: QueueError) {
        if err.is_retryable() {
            warn!(error = %err, "broker connection lost, reconnecting");
            self.conn = None;
        } else {
            warn!(error = %err, "broker rejected batch operation");
        }
    }
}
