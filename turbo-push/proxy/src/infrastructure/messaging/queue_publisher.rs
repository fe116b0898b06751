use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use turbo_push_core::model::NotificationJob;
use turbo_push_core::queue::{JobQueue, PutOptions, QueueConnector, QueueError, TubeStats};
use turbo_push_core::{PriorityConfig, RetryableError};

use crate::domain::model::TubeDirectory;
use crate::domain::repositories::PushJobPublisher;

/// 待写入 broker 的一个任务体
struct Envelope {
    tube: String,
    body: Vec<u8>,
    options: PutOptions,
}

/// 基于 beanstalkd 的任务发布器
///
/// 复用一条 broker 连接；连接失效时重连一次再继续，已写入的任务不会重复写入。
pub struct QueueJobPublisher {
    connector: Arc<dyn QueueConnector>,
    directory: Arc<TubeDirectory>,
    priorities: PriorityConfig,
    ttr: Duration,
    conn: Mutex<Option<Box<dyn JobQueue>>>,
}

impl QueueJobPublisher {
    pub fn new(
        connector: Arc<dyn QueueConnector>,
        directory: Arc<TubeDirectory>,
        priorities: PriorityConfig,
        ttr: Duration,
    ) -> Self {
        Self {
            connector,
            directory,
            priorities,
            ttr,
            conn: Mutex::new(None),
        }
    }

    fn options_for(&self, job: &NotificationJob) -> PutOptions {
        PutOptions {
            priority: self.priorities.value_of(job.priority),
            delay: Duration::from_secs(job.delay),
            ttr: self.ttr,
        }
    }

    async fn connection<'a>(
        &self,
        slot: &'a mut Option<Box<dyn JobQueue>>,
    ) -> Result<&'a mut Box<dyn JobQueue>, QueueError> {
        if slot.is_none() {
            debug!("connecting publisher to broker");
            *slot = Some(self.connector.connect().await?);
        }
        slot.as_mut().ok_or(QueueError::Closed)
    }

    /// 从 `next` 开始依次写入，成功一个前进一个
    async fn put_from(
        &self,
        slot: &mut Option<Box<dyn JobQueue>>,
        envelopes: &[Envelope],
        next: &mut usize,
    ) -> Result<(), QueueError> {
        let conn = self.connection(slot).await?;
        let mut current_tube: Option<&str> = None;
        while let Some(envelope) = envelopes.get(*next) {
            if current_tube != Some(envelope.tube.as_str()) {
                conn.use_tube(&envelope.tube).await?;
                current_tube = Some(envelope.tube.as_str());
            }
            conn.put(&envelope.body, envelope.options).await?;
            *next += 1;
        }
        Ok(())
    }

    async fn put_all(&self, envelopes: &[Envelope]) -> Result<(), QueueError> {
        let mut slot = self.conn.lock().await;
        let mut next = 0;
        let mut retried = false;
        loop {
            match self.put_from(&mut slot, envelopes, &mut next).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    *slot = None;
                    if retried || !err.is_retryable() {
                        return Err(err);
                    }
                    warn!(error = %err, written = next, "broker connection lost, reconnecting once");
                    retried = true;
                }
            }
        }
    }

    async fn stats_from(
        &self,
        slot: &mut Option<Box<dyn JobQueue>>,
        tubes: &[String],
    ) -> Result<Vec<TubeStats>, QueueError> {
        let conn = self.connection(slot).await?;
        let mut stats = Vec::with_capacity(tubes.len());
        for tube in tubes {
            stats.push(conn.stats_tube(tube).await?);
        }
        Ok(stats)
    }
}

#[async_trait]
impl PushJobPublisher for QueueJobPublisher {
    async fn publish_jobs(&self, jobs: &[NotificationJob]) -> Result<()> {
        let envelopes = jobs
            .iter()
            .map(|job| -> Result<Envelope> {
                Ok(Envelope {
                    tube: self.directory.app_tube(&job.app_name),
                    body: job.to_vec()?,
                    options: self.options_for(job),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.put_all(&envelopes)
            .await
            .context("failed to put jobs into app tubes")
    }

    async fn publish_batch(&self, jobs: &[NotificationJob]) -> Result<()> {
        let body = serde_json::to_vec(jobs).context("failed to encode push batch")?;
        // 批量任务按其中最高的优先级处理
        let priority = jobs
            .iter()
            .map(|job| self.priorities.value_of(job.priority))
            .min()
            .unwrap_or(self.priorities.low);
        let envelope = Envelope {
            tube: self.directory.batch_tube().to_string(),
            body,
            options: PutOptions {
                priority,
                delay: Duration::ZERO,
                ttr: self.ttr,
            },
        };

        self.put_all(std::slice::from_ref(&envelope))
            .await
            .context("failed to put batch job")
    }

    async fn tube_stats(&self, tubes: &[String]) -> Result<Vec<TubeStats>> {
        let mut slot = self.conn.lock().await;
        let result = match self.stats_from(&mut slot, tubes).await {
            Ok(stats) => Ok(stats),
            Err(err) if err.is_retryable() => {
                *slot = None;
                warn!(error = %err, "broker connection lost, reconnecting once");
                self.stats_from(&mut slot, tubes).await
            }
            Err(err) => Err(err),
        };
        if result.is_err() {
            *slot = None;
        }
        result.context("failed to read tube stats")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turbo_push_core::model::{Payload, Priority};
    use turbo_push_core::queue::MemoryBroker;

    const TOKEN: &str = "cdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcdcd";

    fn publisher(broker: &MemoryBroker) -> QueueJobPublisher {
        QueueJobPublisher::new(
            Arc::new(broker.clone()),
            Arc::new(TubeDirectory::new(
                "push.{app}",
                "batch_push",
                ["demo".to_string(), "other".to_string()],
            )),
            PriorityConfig::default(),
            Duration::from_secs(60),
        )
    }

    fn job(app: &str, priority: Priority) -> NotificationJob {
        NotificationJob::new(app, TOKEN, Payload::with_alert("hi").unwrap()).with_priority(priority)
    }

    #[tokio::test]
    async fn test_jobs_land_in_their_app_tubes() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker);

        publisher
            .publish_jobs(&[job("demo", Priority::Low), job("other", Priority::High)])
            .await
            .unwrap();

        let demo = broker.ready_jobs("push.demo");
        assert_eq!(demo.len(), 1);
        assert_eq!(demo[0].priority, u32::MAX);
        let other = broker.ready_jobs("push.other");
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].priority, 0);
    }

    #[tokio::test]
    async fn test_batch_uses_highest_priority() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker);

        publisher
            .publish_batch(&[job("demo", Priority::Low), job("demo", Priority::Normal)])
            .await
            .unwrap();

        let batch = broker.ready_jobs("batch_push");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].priority, PriorityConfig::default().normal);
        let decoded: Vec<NotificationJob> = serde_json::from_slice(&batch[0].body).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[tokio::test]
    async fn test_reconnects_after_broker_restart() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker);
        publisher.publish_jobs(&[job("demo", Priority::Low)]).await.unwrap();

        // 缓存的连接失效后第一次操作失败，重连后成功
        broker.set_available(false);
        assert!(publisher.publish_jobs(&[job("demo", Priority::Low)]).await.is_err());
        broker.set_available(true);
        publisher.publish_jobs(&[job("demo", Priority::Low)]).await.unwrap();

        assert_eq!(broker.ready_jobs("push.demo").len(), 2);
    }
}
