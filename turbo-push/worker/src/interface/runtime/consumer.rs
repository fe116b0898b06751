//! broker 队列消费者
//!
//! 每个推送管道配一个消费者：从应用 tube reserve 任务交给管道，
//! 再根据管道回报的 [`DispatchOutcome`] 对任务执行 delete / bury / release。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use turbo_push_core::metrics::PushPipeMetrics;
use turbo_push_core::model::{NotificationJob, Priority};
use turbo_push_core::queue::{
    JobQueue, QueueConnector, QueueError, ReservedJob, connect_with_retry,
};
use turbo_push_core::{BeanstalkConfig, PriorityConfig, RetryableError};

use crate::domain::{Dispatch, DispatchOutcome, Verdict};

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub reserve_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl ConsumerSettings {
    pub fn from_config(config: &BeanstalkConfig) -> Self {
        Self {
            reserve_timeout: Duration::from_secs(config.reserve_timeout_secs),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self::from_config(&BeanstalkConfig::default())
    }
}

pub struct QueueConsumer {
    app_name: String,
    tube: String,
    connector: Arc<dyn QueueConnector>,
    settings: ConsumerSettings,
    priorities: PriorityConfig,
    sender: mpsc::Sender<Dispatch>,
    outcomes: mpsc::UnboundedReceiver<DispatchOutcome>,
    accepting: watch::Receiver<bool>,
    stop: watch::Receiver<bool>,
    metrics: PushPipeMetrics,
    conn: Option<Box<dyn JobQueue>>,
    /// 已交给管道、尚未回报结果的任务
    in_flight: HashMap<u64, Priority>,
}

impl QueueConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        app_name: impl Into<String>,
        tube: impl Into<String>,
        connector: Arc<dyn QueueConnector>,
        settings: ConsumerSettings,
        priorities: PriorityConfig,
        sender: mpsc::Sender<Dispatch>,
        outcomes: mpsc::UnboundedReceiver<DispatchOutcome>,
        accepting: watch::Receiver<bool>,
        stop: watch::Receiver<bool>,
        metrics: PushPipeMetrics,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            tube: tube.into(),
            connector,
            settings,
            priorities,
            sender,
            outcomes,
            accepting,
            stop,
            metrics,
            conn: None,
            in_flight: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        info!(tube = %self.tube, "queue consumer started");
        loop {
            self.apply_ready_outcomes().await;
            if self.stopping() {
                break;
            }

            if self.conn.is_none() && !self.reconnect().await {
                break;
            }

            if !*self.accepting.borrow() {
                self.wait_until_accepting().await;
                continue;
            }

            let Some(conn) = self.conn.as_mut() else {
                continue;
            };
            match conn.reserve(self.settings.reserve_timeout).await {
                Ok(Some(job)) => self.submit(job).await,
                // 超时：回到循环顶部处理结果和停止信号
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "reserve failed, reconnecting to broker");
                    self.drop_connection();
                }
            }
        }

        // 管道停止后结果通道关闭，剩余结果在此之前全部回到 broker
        while let Some(outcome) = self.outcomes.recv().await {
            self.apply(outcome).await;
        }
        info!(tube = %self.tube, "queue consumer stopped");
    }

    /// 停止信号已发出，或发送方已不存在
    fn stopping(&self) -> bool {
        *self.stop.borrow() || self.stop.has_changed().is_err()
    }

    /// 连接 broker 并只 watch 应用 tube；收到停止信号时返回 `false`
    async fn reconnect(&mut self) -> bool {
        loop {
            let Some(mut conn) = connect_with_retry(
                self.connector.as_ref(),
                self.settings.reconnect_delay,
                &mut self.stop,
            )
            .await
            else {
                return false;
            };

            match conn.watch_only(&self.tube).await {
                Ok(()) => {
                    debug!(tube = %self.tube, "watching tube");
                    self.conn = Some(conn);
                    return true;
                }
                Err(err) => {
                    warn!(error = %err, tube = %self.tube, "failed to watch tube");
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                        changed = self.stop.changed() => {
                            if changed.is_err() || *self.stop.borrow() {
                                return false;
                            }
                        }
                    }
                }
            }
        }
    }

    /// 连接失效时其上的 reserve 随之作废，broker 会重新投递
    fn drop_connection(&mut self) {
        self.conn = None;
        if !self.in_flight.is_empty() {
            debug!(
                abandoned = self.in_flight.len(),
                "reservations abandoned with broker connection"
            );
            self.in_flight.clear();
        }
    }

    /// 管道未连接网关期间不 reserve，只处理回报结果
    async fn wait_until_accepting(&mut self) {
        info!("pipe not accepting, consumer paused");
        loop {
            if *self.accepting.borrow() {
                info!("pipe accepting again, consumer resumed");
                return;
            }
            tokio::select! {
                changed = self.accepting.changed() => {
                    if changed.is_err() {
                        // 管道已退出，等待停止信号
                        if !self.stopping() {
                            let _ = self.stop.changed().await;
                        }
                        return;
                    }
                }
                Some(outcome) = self.outcomes.recv() => self.apply(outcome).await,
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn submit(&mut self, reserved: ReservedJob) {
        let job = match NotificationJob::from_slice(&reserved.body) {
            Ok(job) => job,
            Err(err) => {
                warn!(job_id = reserved.id, error = %err, "unparseable job body, burying");
                self.metrics
                    .permanent_failures_total
                    .with_label_values(&[self.app_name.as_str(), "job_parse"])
                    .inc();
                self.bury(reserved.id, Priority::default()).await;
                return;
            }
        };

        let priority = job.priority;
        let mut dispatch = Some(Dispatch::new(job, reserved.id));
        self.in_flight.insert(reserved.id, priority);

        // 发送队列满时在此等待，同时继续处理回报结果以免阻塞 ack
        let sender = self.sender.clone();
        while dispatch.is_some() {
            tokio::select! {
                permit = sender.reserve() => {
                    match permit {
                        Ok(permit) => {
                            if let Some(dispatch) = dispatch.take() {
                                permit.send(dispatch);
                            }
                        }
                        Err(_) => {
                            warn!(job_id = reserved.id, "pipe closed, releasing job");
                            dispatch = None;
                            self.release_unsent(reserved.id).await;
                        }
                    }
                }
                Some(outcome) = self.outcomes.recv() => self.apply(outcome).await,
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        dispatch = None;
                        self.release_unsent(reserved.id).await;
                    }
                }
            }
        }
    }

    async fn release_unsent(&mut self, id: u64) {
        if let Some(priority) = self.in_flight.remove(&id) {
            self.release(id, priority).await;
        }
    }

    async fn apply_ready_outcomes(&mut self) {
        while let Ok(outcome) = self.outcomes.try_recv() {
            self.apply(outcome).await;
        }
    }

    async fn apply(&mut self, outcome: DispatchOutcome) {
        let DispatchOutcome { receipt, verdict } = outcome;
        let Some(priority) = self.in_flight.remove(&receipt) else {
            debug!(job_id = receipt, "outcome for a job no longer reserved");
            return;
        };

        match verdict {
            Verdict::Delivered | Verdict::Stale => self.ack(receipt).await,
            Verdict::Rejected(err) => {
                warn!(job_id = receipt, error = %err, "burying undeliverable job");
                self.bury(receipt, priority).await;
            }
            Verdict::Retry(reason) => {
                debug!(job_id = receipt, reason = %reason, "releasing job");
                self.release(receipt, priority).await;
            }
        }
    }

    async fn ack(&mut self, id: u64) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        if let Err(err) = conn.ack(id).await {
            self.on_broker_error(id, "delete", err);
        }
    }

    async fn bury(&mut self, id: u64, priority: Priority) {
        let value = self.priorities.value_of(priority);
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        if let Err(err) = conn.bury(id, value).await {
            self.on_broker_error(id, "bury", err);
        }
    }

    async fn release(&mut self, id: u64, priority: Priority) {
        let value = self.priorities.value_of(priority);
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        if let Err(err) = conn.release(id, value, Duration::ZERO).await {
            self.on_broker_error(id, "release", err);
        }
    }

    fn on_broker_error(&mut self, id: u64, op: &str, err: QueueError) {
        if err.is_retryable() {
            warn!(job_id = id, op, error = %err, "broker connection lost");
            self.drop_connection();
        } else {
            warn!(job_id = id, op, error = %err, "broker rejected job operation");
        }
    }
}
