//! 推送管道
//!
//! 一个 [`PushPipe`] 独占一条网关连接、一个重放缓冲和一个有界发送队列，
//! 运行在独立的 tokio 任务中。事件循环在以下几件事之间切换：
//!
//! 1. 网关可读：读取错误帧，丢弃被拒绝的通知，重放其后发送的通知，然后重连；
//! 2. 有待发送的通知（重放优先）：过期检查、分配 identifier、编码、写入、记录；
//! 3. 超时：什么也不做，回到循环顶部。
//!
//! 每条带 broker 回执的通知都会通过 [`DispatchOutcome`] 回报给队列消费者。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};
use turbo_push_core::metrics::PushPipeMetrics;
use turbo_push_core::model::NotificationJob;
use turbo_push_core::queue::{JobQueue, PutOptions, QueueConnector, QueueError};
use turbo_push_core::{FailureClass, PriorityConfig, PushTuningConfig, RetryableError};

use crate::domain::{Dispatch, DispatchOutcome, ReplayBuffer, Verdict};
use crate::infrastructure::apns::{
    ErrorFrame, GatewayConnector, GatewayInput, GatewayTransport, encode_notification,
};
use crate::infrastructure::retry::BackoffPolicy;

/// 管道运行参数
#[derive(Debug, Clone)]
pub struct PipeSettings {
    pub outbound_capacity: usize,
    pub replay_capacity: usize,
    pub wait_timeout: Duration,
    pub stale_after: Duration,
    pub write_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl PipeSettings {
    pub fn from_tuning(tuning: &PushTuningConfig, write_timeout: Duration) -> Self {
        Self {
            outbound_capacity: tuning.outbound_capacity.max(1),
            replay_capacity: tuning.replay_capacity.max(1),
            wait_timeout: Duration::from_secs(tuning.wait_timeout_secs.max(1)),
            stale_after: Duration::from_secs(tuning.stale_after_secs),
            write_timeout,
            backoff: BackoffPolicy::from_config(tuning),
        }
    }
}

impl Default for PipeSettings {
    fn default() -> Self {
        Self::from_tuning(&PushTuningConfig::default(), Duration::from_secs(10))
    }
}

/// 管道对外可见的运行状态，由控制器和消费者读取
#[derive(Debug)]
pub struct PipeMonitor {
    started: Instant,
    /// 最近一次成功写入距 `started` 的毫秒数
    last_push_ms: AtomicU64,
    sent: AtomicU64,
    accepting: watch::Sender<bool>,
}

impl PipeMonitor {
    fn new() -> Self {
        let (accepting, _) = watch::channel(true);
        Self {
            started: Instant::now(),
            last_push_ms: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            accepting,
        }
    }

    fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_push_ms.store(elapsed, Ordering::Relaxed);
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn set_accepting(&self, accepting: bool) {
        self.accepting.send_if_modified(|current| {
            let changed = *current != accepting;
            *current = accepting;
            changed
        });
    }

    /// 距最近一次成功写入（或管道启动）的时长
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_push_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    /// 已写入网关的通知数（含重放）
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// 未连接网关期间为 `false`，消费者据此暂停 reserve
    pub fn is_accepting(&self) -> bool {
        *self.accepting.borrow()
    }

    pub fn subscribe_accepting(&self) -> watch::Receiver<bool> {
        self.accepting.subscribe()
    }
}

/// broker 重放模式下，把需要重放的通知放回应用 tube
pub struct ReplaySink {
    connector: Arc<dyn QueueConnector>,
    tube: String,
    priorities: PriorityConfig,
    ttr: Duration,
    conn: Option<Box<dyn JobQueue>>,
}

impl ReplaySink {
    pub fn new(
        connector: Arc<dyn QueueConnector>,
        tube: impl Into<String>,
        priorities: PriorityConfig,
        ttr: Duration,
    ) -> Self {
        Self {
            connector,
            tube: tube.into(),
            priorities,
            ttr,
            conn: None,
        }
    }

    async fn requeue(&mut self, job: &NotificationJob) -> Result<u64, QueueError> {
        let body = job
            .to_vec()
            .map_err(|err| QueueError::Protocol(err.to_string()))?;

        if self.conn.is_none() {
            let mut conn = self.connector.connect().await?;
            conn.use_tube(&self.tube).await?;
            self.conn = Some(conn);
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(QueueError::Closed);
        };

        let options = PutOptions {
            priority: self.priorities.value_of(job.priority),
            delay: Duration::ZERO,
            ttr: self.ttr,
        };
        let result = conn.put(&body, options).await;
        if result.is_err() {
            self.conn = None;
        }
        result
    }
}

/// 管道任务的句柄
pub struct PipeHandle {
    app_name: String,
    sender: mpsc::Sender<Dispatch>,
    monitor: Arc<PipeMonitor>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PipeHandle {
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// 发送队列已满时等待，不丢弃
    pub async fn send(&self, dispatch: Dispatch) -> Result<(), mpsc::error::SendError<Dispatch>> {
        self.sender.send(dispatch).await
    }

    pub fn sender(&self) -> mpsc::Sender<Dispatch> {
        self.sender.clone()
    }

    pub fn monitor(&self) -> Arc<PipeMonitor> {
        Arc::clone(&self.monitor)
    }

    /// 发送队列中尚未取出的通知数
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// 停止管道；最多等待 `drain` 让发送队列排空
    pub async fn stop(self, drain: Duration) {
        let deadline = Instant::now() + drain;
        while self.queued() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let remaining = self.queued();
        if remaining > 0 {
            warn!(app = %self.app_name, remaining, "drain timeout reached, stopping pipe");
        }

        let _ = self.shutdown.send(true);
        drop(self.sender);
        if let Err(err) = self.task.await {
            error!(app = %self.app_name, error = %err, "push pipe task failed");
        }
    }
}

pub struct PushPipe {
    app_name: String,
    transport: GatewayTransport,
    replay: ReplayBuffer<NotificationJob>,
    /// 等待重发的通知，优先于发送队列
    pending: VecDeque<Dispatch>,
    outbound: mpsc::Receiver<Dispatch>,
    outcomes: mpsc::UnboundedSender<DispatchOutcome>,
    next_id: u32,
    settings: PipeSettings,
    monitor: Arc<PipeMonitor>,
    metrics: PushPipeMetrics,
    sink: Option<ReplaySink>,
    shutdown: watch::Receiver<bool>,
}

impl PushPipe {
    /// 启动管道任务
    ///
    /// `sink` 为 `Some` 时重放的通知放回 broker，否则重新进入本管道。
    /// 返回的接收端按 broker 回执回报每条通知的处理结果。
    pub fn spawn(
        app_name: impl Into<String>,
        role: &str,
        connector: Arc<dyn GatewayConnector>,
        settings: PipeSettings,
        sink: Option<ReplaySink>,
        metrics: PushPipeMetrics,
    ) -> (PipeHandle, mpsc::UnboundedReceiver<DispatchOutcome>) {
        let app_name = app_name.into();
        let (sender, outbound) = mpsc::channel(settings.outbound_capacity);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = Arc::new(PipeMonitor::new());

        let pipe = PushPipe {
            app_name: app_name.clone(),
            transport: GatewayTransport::new(connector, settings.write_timeout),
            replay: ReplayBuffer::new(settings.replay_capacity),
            pending: VecDeque::new(),
            outbound,
            outcomes: outcome_tx,
            next_id: 1,
            settings,
            monitor: Arc::clone(&monitor),
            metrics,
            sink,
            shutdown: shutdown_rx,
        };

        let span = info_span!("push_pipe", app = %app_name, role = %role);
        let task = tokio::spawn(pipe.run().instrument(span));

        let handle = PipeHandle {
            app_name,
            sender,
            monitor,
            shutdown: shutdown_tx,
            task,
        };
        (handle, outcome_rx)
    }

    async fn run(mut self) {
        info!(endpoint = %self.transport.endpoint(), "push pipe started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            if !self.transport.is_connected() {
                if !self.establish().await {
                    break;
                }
                continue;
            }

            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                input = self.transport.read_error_frame() => {
                    self.handle_input(input).await;
                }
                dispatch = next_dispatch(&mut self.pending, &mut self.outbound) => {
                    match dispatch {
                        Some(dispatch) => self.deliver(dispatch).await,
                        None => {
                            debug!("outbound queue closed");
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep(self.settings.wait_timeout) => {}
            }
        }
        self.finish().await;
    }

    /// 建立连接；失败时按失败分类退避。收到停止信号时返回 `false`
    ///
    /// 未连接期间不接收新任务，发送队列中的任务交还 broker。
    async fn establish(&mut self) -> bool {
        match self.transport.connect().await {
            Ok(()) => {
                info!(endpoint = %self.transport.endpoint(), "connected to gateway");
                self.monitor.set_accepting(true);
                true
            }
            Err(err) => {
                let class = err.failure_class();
                let delay = self.settings.backoff.delay_for(class);
                let reason = if class == FailureClass::Auth {
                    error!(
                        error = %err,
                        retry_in_secs = delay.as_secs(),
                        "gateway rejected client credentials, pipe suspended"
                    );
                    "gateway credentials invalid"
                } else {
                    warn!(
                        error = %err,
                        retry_in_secs = delay.as_secs(),
                        "failed to connect to gateway, pipe paused"
                    );
                    "gateway unavailable"
                };
                self.monitor.set_accepting(false);
                self.release_queued(reason);
                self.backoff(delay, reason).await
            }
        }
    }

    /// 退避等待；期间到达发送队列的任务立即交还 broker
    async fn backoff(&mut self, delay: Duration, reason: &str) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return false;
                    }
                }
                _ = &mut sleep => return true,
                Some(dispatch) = self.outbound.recv() => {
                    self.hand_back(dispatch, reason);
                }
            }
        }
    }

    async fn handle_input(&mut self, input: GatewayInput) {
        match input {
            GatewayInput::Frame(frame) => self.handle_error_frame(frame).await,
            GatewayInput::Closed => {
                info!("gateway closed the connection");
                self.reset_connection("closed").await;
            }
            GatewayInput::Malformed(err) => {
                warn!(error = %err, "malformed error frame from gateway");
                self.reset_connection("protocol_violation").await;
            }
            GatewayInput::Failed(err) => {
                warn!(error = %err, "gateway read failed");
                self.reset_connection("read_failed").await;
            }
        }
    }

    /// 丢弃被拒绝的通知，重放其后发送的通知，然后强制重连
    async fn handle_error_frame(&mut self, frame: ErrorFrame) {
        let status_code = frame.status.code().to_string();
        self.metrics
            .gateway_rejections_total
            .with_label_values(&[self.app_name.as_str(), status_code.as_str()])
            .inc();

        let outcome = self.replay.handle_error(frame.identifier);
        match &outcome.rejected {
            Some(job) => {
                warn!(
                    identifier = frame.identifier,
                    status = %frame.status,
                    device_token = %job.device_token,
                    replay = outcome.replay.len(),
                    "gateway rejected notification"
                );
                self.metrics
                    .permanent_failures_total
                    .with_label_values(&[
                        self.app_name.as_str(),
                        FailureClass::GatewayRejection.as_str(),
                    ])
                    .inc();
            }
            None => warn!(
                identifier = frame.identifier,
                status = %frame.status,
                "error frame matched no recorded notification, nothing replayed"
            ),
        }

        if !outcome.replay.is_empty() {
            self.metrics
                .notifications_replayed_total
                .with_label_values(&[self.app_name.as_str()])
                .inc_by(outcome.replay.len() as u64);
            self.schedule_replays(outcome.replay).await;
        }

        self.metrics
            .gateway_reconnects_total
            .with_label_values(&[self.app_name.as_str(), "error_frame"])
            .inc();
        self.transport.disconnect().await;
    }

    async fn schedule_replays(&mut self, jobs: Vec<NotificationJob>) {
        let Some(sink) = self.sink.as_mut() else {
            self.pending.extend(jobs.into_iter().map(Dispatch::replay));
            return;
        };

        for job in jobs {
            match sink.requeue(&job).await {
                Ok(id) => debug!(job_id = id, "replayed notification returned to broker"),
                Err(err) => {
                    warn!(error = %err, "failed to return replay to broker, resending locally");
                    self.pending.push_back(Dispatch::replay(job));
                }
            }
        }
    }

    async fn deliver(&mut self, dispatch: Dispatch) {
        let Dispatch { job, receipt } = dispatch;

        if job.is_stale(Utc::now(), self.settings.stale_after) {
            debug!(device_token = %job.device_token, "discarding stale notification");
            self.metrics
                .stale_jobs_discarded_total
                .with_label_values(&[self.app_name.as_str()])
                .inc();
            self.report(receipt, Verdict::Stale);
            return;
        }

        let identifier = self.next_id;
        let frame = match encode_notification(identifier, job.expiry, &job.device_token, &job.payload)
        {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, device_token = %job.device_token, "notification cannot be encoded");
                self.metrics
                    .permanent_failures_total
                    .with_label_values(&[self.app_name.as_str(), err.reason()])
                    .inc();
                self.report(receipt, Verdict::Rejected(err));
                return;
            }
        };
        self.next_id = identifier.wrapping_add(1);

        match self.transport.write_frame(&frame).await {
            Ok(()) => {
                debug!(identifier, bytes = frame.len(), "notification written");
                if let Some((evicted, _)) = self.replay.record(identifier, job) {
                    debug!(identifier = evicted, "replay buffer full, evicted oldest entry");
                }
                self.monitor.touch();
                self.metrics
                    .notifications_sent_total
                    .with_label_values(&[self.app_name.as_str()])
                    .inc();
                self.report(receipt, Verdict::Delivered);
            }
            Err(err) => {
                warn!(error = %err, identifier, "gateway write failed");
                self.reset_connection("write_failed").await;
                match receipt {
                    Some(_) => self.report(receipt, Verdict::Retry(err.to_string())),
                    None => self.pending.push_front(Dispatch::replay(job)),
                }
            }
        }
    }

    /// 连接在没有错误帧的情况下失效：已发送记录无从判断，全部丢弃
    async fn reset_connection(&mut self, reason: &str) {
        let dropped = self.replay.clear();
        if dropped > 0 {
            debug!(dropped, reason, "cleared replay buffer");
        }
        self.metrics
            .gateway_reconnects_total
            .with_label_values(&[self.app_name.as_str(), reason])
            .inc();
        self.transport.disconnect().await;
    }

    /// 把发送队列中所有带回执的任务交还 broker
    fn release_queued(&mut self, reason: &str) {
        let mut released = 0usize;
        while let Ok(dispatch) = self.outbound.try_recv() {
            if self.hand_back(dispatch, reason) {
                released += 1;
            }
        }
        if released > 0 {
            info!(released, reason, "returned queued jobs to broker");
        }
    }

    /// 不发送，交还 broker；重放产生的通知留在本地等待重连
    fn hand_back(&mut self, dispatch: Dispatch, reason: &str) -> bool {
        match dispatch.receipt {
            Some(_) => {
                self.report(dispatch.receipt, Verdict::Retry(reason.to_string()));
                true
            }
            None => {
                self.pending.push_back(dispatch);
                false
            }
        }
    }

    fn report(&self, receipt: Option<u64>, verdict: Verdict) {
        if let Some(receipt) = receipt {
            // 消费者已退出时结果无人接收，broker 会在 TTR 到期后重新投递
            let _ = self.outcomes.send(DispatchOutcome { receipt, verdict });
        }
    }

    async fn finish(&mut self) {
        self.outbound.close();
        self.release_queued("pipe stopping");
        if !self.pending.is_empty() {
            warn!(
                dropped = self.pending.len(),
                "pipe stopped with notifications awaiting replay"
            );
        }
        self.transport.disconnect().await;
        self.monitor.set_accepting(false);
        info!(sent = self.monitor.sent(), "push pipe stopped");
    }
}

/// 重放优先，其次发送队列；可安全地在 `select!` 中取消
async fn next_dispatch(
    pending: &mut VecDeque<Dispatch>,
    outbound: &mut mpsc::Receiver<Dispatch>,
) -> Option<Dispatch> {
    if let Some(dispatch) = pending.pop_front() {
        return Some(dispatch);
    }
    outbound.recv().await
}
