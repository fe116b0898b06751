use anyhow::Result;
use async_trait::async_trait;
use turbo_push_core::model::NotificationJob;
use turbo_push_core::queue::TubeStats;

/// 任务发布器（需要作为 trait 对象使用，保留 async-trait）
#[async_trait]
pub trait PushJobPublisher: Send + Sync {
    /// 逐个写入各自的应用 tube
    async fn publish_jobs(&self, jobs: &[NotificationJob]) -> Result<()>;

    /// 整批作为一个任务写入批量 tube
    async fn publish_batch(&self, jobs: &[NotificationJob]) -> Result<()>;

    async fn tube_stats(&self, tubes: &[String]) -> Result<Vec<TubeStats>>;
}
