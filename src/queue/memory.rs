//! 内存 broker
//!
//! 与 beanstalkd 语义一致的进程内实现：按 (priority, id) 出队、支持延迟任务、
//! bury / release，连接断开时其 reserve 的任务自动回到 ready。用于测试与本地调试。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{JobQueue, PutOptions, QueueConnector, QueueError, ReservedJob, TubeStats};

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredJobState {
    Ready,
    Delayed(Instant),
    Reserved(u64),
    Buried,
}

/// broker 中保存的任务
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub id: u64,
    pub tube: String,
    pub priority: u32,
    pub delay: Duration,
    pub body: Vec<u8>,
    pub state: StoredJobState,
}

impl StoredJob {
    fn is_ready(&self, now: Instant) -> bool {
        match self.state {
            StoredJobState::Ready => true,
            StoredJobState::Delayed(until) => until <= now,
            _ => false,
        }
    }
}

#[derive(Default)]
struct BrokerState {
    next_job_id: u64,
    next_conn_id: u64,
    unavailable: bool,
    jobs: BTreeMap<u64, StoredJob>,
    total_jobs: BTreeMap<String, u64>,
}

impl BrokerState {
    fn insert(&mut self, tube: &str, body: &[u8], options: PutOptions, now: Instant) -> u64 {
        self.next_job_id += 1;
        let id = self.next_job_id;
        let state = if options.delay.is_zero() {
            StoredJobState::Ready
        } else {
            StoredJobState::Delayed(now + options.delay)
        };
        self.jobs.insert(
            id,
            StoredJob {
                id,
                tube: tube.to_string(),
                priority: options.priority,
                delay: options.delay,
                body: body.to_vec(),
                state,
            },
        );
        *self.total_jobs.entry(tube.to_string()).or_default() += 1;
        id
    }

    fn take_ready(&mut self, watching: &[String], conn_id: u64, now: Instant) -> Option<ReservedJob> {
        let id = self
            .jobs
            .values()
            .filter(|job| watching.contains(&job.tube) && job.is_ready(now))
            .min_by_key(|job| (job.priority, job.id))
            .map(|job| job.id)?;
        let job = self.jobs.get_mut(&id)?;
        job.state = StoredJobState::Reserved(conn_id);
        Some(ReservedJob {
            id,
            body: job.body.clone(),
        })
    }

    fn next_delayed(&self, watching: &[String]) -> Option<Instant> {
        self.jobs
            .values()
            .filter(|job| watching.contains(&job.tube))
            .filter_map(|job| match job.state {
                StoredJobState::Delayed(until) => Some(until),
                _ => None,
            })
            .min()
    }

    fn reserved_by(&mut self, id: u64, conn_id: u64) -> Result<&mut StoredJob, QueueError> {
        match self.jobs.get_mut(&id) {
            Some(job) if job.state == StoredJobState::Reserved(conn_id) => Ok(job),
            _ => Err(QueueError::NotFound(id)),
        }
    }
}

/// 内存 broker，克隆后共享同一份状态
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 模拟 broker 宕机 / 恢复；宕机期间新建连接与已有连接上的操作都会失败
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
        self.notify.notify_waiters();
    }

    /// 直接写入任务（测试准备数据用）
    pub fn put_job(&self, tube: &str, body: &[u8], options: PutOptions) -> u64 {
        let id = self.lock().insert(tube, body, options, Instant::now());
        self.notify.notify_waiters();
        id
    }

    pub fn job(&self, id: u64) -> Option<StoredJob> {
        self.lock().jobs.get(&id).cloned()
    }

    /// 某 tube 中尚未完成的全部任务（ready / delayed / reserved / buried）
    pub fn jobs_in(&self, tube: &str) -> Vec<StoredJob> {
        self.lock()
            .jobs
            .values()
            .filter(|job| job.tube == tube)
            .cloned()
            .collect()
    }

    /// 可被 reserve 的任务，按出队顺序
    pub fn ready_jobs(&self, tube: &str) -> Vec<StoredJob> {
        let now = Instant::now();
        let mut jobs: Vec<StoredJob> = self
            .lock()
            .jobs
            .values()
            .filter(|job| job.tube == tube && job.is_ready(now))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.priority, job.id));
        jobs
    }

    pub fn buried_jobs(&self, tube: &str) -> Vec<StoredJob> {
        self.jobs_in(tube)
            .into_iter()
            .filter(|job| job.state == StoredJobState::Buried)
            .collect()
    }

    /// 已 delete 的任务数 = 写入总数 - 剩余数
    pub fn deleted_count(&self, tube: &str) -> u64 {
        let state = self.lock();
        let total = state.total_jobs.get(tube).copied().unwrap_or(0);
        let remaining = state.jobs.values().filter(|job| job.tube == tube).count() as u64;
        total - remaining
    }

    pub fn stats(&self, tube: &str) -> TubeStats {
        let now = Instant::now();
        let state = self.lock();
        let mut stats = TubeStats {
            name: tube.to_string(),
            total_jobs: state.total_jobs.get(tube).copied().unwrap_or(0),
            ..Default::default()
        };
        for job in state.jobs.values().filter(|job| job.tube == tube) {
            match job.state {
                _ if job.is_ready(now) => {
                    stats.current_jobs_ready += 1;
                    if job.priority < 1024 {
                        stats.current_jobs_urgent += 1;
                    }
                }
                StoredJobState::Delayed(_) => stats.current_jobs_delayed += 1,
                StoredJobState::Reserved(_) => stats.current_jobs_reserved += 1,
                StoredJobState::Buried => stats.current_jobs_buried += 1,
                StoredJobState::Ready => {}
            }
        }
        stats
    }
}

#[async_trait]
impl QueueConnector for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn JobQueue>, QueueError> {
        let conn_id = {
            let mut state = self.lock();
            if state.unavailable {
                return Err(QueueError::Closed);
            }
            state.next_conn_id += 1;
            state.next_conn_id
        };
        Ok(Box::new(MemoryConnection {
            conn_id,
            broker: self.clone(),
            using: "default".to_string(),
            watching: vec!["default".to_string()],
        }))
    }
}

/// 内存 broker 上的一条连接
pub struct MemoryConnection {
    conn_id: u64,
    broker: MemoryBroker,
    using: String,
    watching: Vec<String>,
}

impl MemoryConnection {
    fn state(&self) -> Result<MutexGuard<'_, BrokerState>, QueueError> {
        let state = self.broker.lock();
        if state.unavailable {
            return Err(QueueError::Closed);
        }
        Ok(state)
    }

    fn ensure_available(&self) -> Result<(), QueueError> {
        if self.broker.lock().unavailable {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let mut state = self.broker.lock();
        for job in state.jobs.values_mut() {
            if job.state == StoredJobState::Reserved(self.conn_id) {
                job.state = StoredJobState::Ready;
            }
        }
        drop(state);
        self.broker.notify.notify_waiters();
    }
}

#[async_trait]
impl JobQueue for MemoryConnection {
    async fn use_tube(&mut self, tube: &str) -> Result<(), QueueError> {
        self.ensure_available()?;
        self.using = tube.to_string();
        Ok(())
    }

    async fn watch_only(&mut self, tube: &str) -> Result<(), QueueError> {
        self.ensure_available()?;
        self.watching = vec![tube.to_string()];
        Ok(())
    }

    async fn put(&mut self, body: &[u8], options: PutOptions) -> Result<u64, QueueError> {
        let id = {
            let mut state = self.state()?;
            state.insert(&self.using, body, options, Instant::now())
        };
        self.broker.notify.notify_waiters();
        Ok(id)
    }

    async fn reserve(&mut self, timeout: Duration) -> Result<Option<ReservedJob>, QueueError> {
        let deadline = Instant::now() + timeout;
        let notify = self.broker.notify.clone();
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state()?;
                let now = Instant::now();
                if let Some(job) = state.take_ready(&self.watching, self.conn_id, now) {
                    return Ok(Some(job));
                }
                if now >= deadline {
                    return Ok(None);
                }
                state
                    .next_delayed(&self.watching)
                    .map_or(deadline, |at| at.min(deadline))
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&mut self, id: u64) -> Result<(), QueueError> {
        let mut state = self.state()?;
        state.reserved_by(id, self.conn_id)?;
        state.jobs.remove(&id);
        Ok(())
    }

    async fn release(
        &mut self,
        id: u64,
        priority: u32,
        delay: Duration,
    ) -> Result<(), QueueError> {
        {
            let mut state = self.state()?;
            let job = state.reserved_by(id, self.conn_id)?;
            job.priority = priority;
            job.delay = delay;
            job.state = if delay.is_zero() {
                StoredJobState::Ready
            } else {
                StoredJobState::Delayed(Instant::now() + delay)
            };
        }
        self.broker.notify.notify_waiters();
        Ok(())
    }

    async fn bury(&mut self, id: u64, priority: u32) -> Result<(), QueueError> {
        let mut state = self.state()?;
        let job = state.reserved_by(id, self.conn_id)?;
        job.priority = priority;
        job.state = StoredJobState::Buried;
        Ok(())
    }

    async fn stats_tube(&mut self, tube: &str) -> Result<TubeStats, QueueError> {
        self.ensure_available()?;
        Ok(self.broker.stats(tube))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(priority: u32) -> PutOptions {
        PutOptions {
            priority,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_priority_then_fifo_order() {
        let broker = MemoryBroker::new();
        let a = broker.put_job("t", b"a", opts(10));
        let b = broker.put_job("t", b"b", opts(0));
        let c = broker.put_job("t", b"c", opts(10));

        let mut conn = broker.connect().await.unwrap();
        conn.watch_only("t").await.unwrap();
        let mut order = Vec::new();
        while let Some(job) = conn.reserve(Duration::ZERO).await.unwrap() {
            order.push(job.id);
        }
        assert_eq!(order, vec![b, a, c]);
    }

    #[tokio::test]
    async fn test_watch_isolates_tubes() {
        let broker = MemoryBroker::new();
        broker.put_job("other", b"x", opts(0));
        let mut conn = broker.connect().await.unwrap();
        conn.watch_only("mine").await.unwrap();
        assert!(conn.reserve(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_wakes_on_put() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.connect().await.unwrap();
        consumer.watch_only("t").await.unwrap();
        let producer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let mut conn = producer.connect().await.unwrap();
            conn.use_tube("t").await.unwrap();
            conn.put(b"late", opts(5)).await.unwrap();
        });
        let job = consumer
            .reserve(Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.body, b"late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_job_becomes_ready() {
        let broker = MemoryBroker::new();
        broker.put_job(
            "t",
            b"later",
            PutOptions {
                priority: 1,
                delay: Duration::from_secs(5),
                ..Default::default()
            },
        );
        assert_eq!(broker.stats("t").current_jobs_delayed, 1);

        let mut conn = broker.connect().await.unwrap();
        conn.watch_only("t").await.unwrap();
        assert!(conn.reserve(Duration::from_secs(2)).await.unwrap().is_none());
        let job = conn.reserve(Duration::from_secs(10)).await.unwrap();
        assert!(job.is_some());
    }

    #[tokio::test]
    async fn test_ack_release_bury() {
        let broker = MemoryBroker::new();
        for body in [b"1", b"2", b"3"] {
            broker.put_job("t", body, opts(100));
        }
        let mut conn = broker.connect().await.unwrap();
        conn.watch_only("t").await.unwrap();

        let first = conn.reserve(Duration::ZERO).await.unwrap().unwrap();
        conn.ack(first.id).await.unwrap();
        assert!(matches!(
            conn.ack(first.id).await,
            Err(QueueError::NotFound(_))
        ));

        let second = conn.reserve(Duration::ZERO).await.unwrap().unwrap();
        conn.bury(second.id, 100).await.unwrap();

        let third = conn.reserve(Duration::ZERO).await.unwrap().unwrap();
        conn.release(third.id, 7, Duration::ZERO).await.unwrap();

        let stats = broker.stats("t");
        assert_eq!(stats.current_jobs_ready, 1);
        assert_eq!(stats.current_jobs_buried, 1);
        assert_eq!(stats.total_jobs, 3);
        assert_eq!(broker.deleted_count("t"), 1);
        assert_eq!(broker.ready_jobs("t")[0].priority, 7);
    }

    #[tokio::test]
    async fn test_reserved_jobs_return_on_disconnect() {
        let broker = MemoryBroker::new();
        broker.put_job("t", b"x", opts(1));
        {
            let mut conn = broker.connect().await.unwrap();
            conn.watch_only("t").await.unwrap();
            conn.reserve(Duration::ZERO).await.unwrap().unwrap();
            assert_eq!(broker.stats("t").current_jobs_reserved, 1);
        }
        assert_eq!(broker.stats("t").current_jobs_ready, 1);
    }

    #[tokio::test]
    async fn test_unavailable_broker() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect().await.unwrap();
        broker.set_available(false);
        assert!(broker.connect().await.is_err());
        assert!(matches!(
            conn.reserve(Duration::ZERO).await,
            Err(QueueError::Closed)
        ));
        assert!(matches!(conn.use_tube("t").await, Err(QueueError::Closed)));
        assert!(matches!(conn.watch_only("t").await, Err(QueueError::Closed)));
        assert!(matches!(conn.stats_tube("t").await, Err(QueueError::Closed)));

        broker.set_available(true);
        conn.use_tube("t").await.unwrap();
        assert_eq!(conn.stats_tube("t").await.unwrap().current_jobs_ready, 0);
    }
}
