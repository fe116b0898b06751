//! 推送通道：一个推送管道加上为它供货的队列消费者

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info_span};
use turbo_push_core::metrics::PushPipeMetrics;
use turbo_push_core::queue::QueueConnector;
use turbo_push_core::{PriorityConfig, ReplayMode};

use super::pipe::{PipeHandle, PipeMonitor, PipeSettings, PushPipe, ReplaySink};
use crate::infrastructure::apns::GatewayConnector;
use crate::interface::runtime::{ConsumerSettings, QueueConsumer};

/// 单个应用启动通道所需的全部依赖
#[derive(Clone)]
pub struct AppRuntime {
    pub app_name: String,
    pub tube: String,
    pub gateway: Arc<dyn GatewayConnector>,
    pub queue: Arc<dyn QueueConnector>,
    pub pipe_settings: PipeSettings,
    pub consumer_settings: ConsumerSettings,
    pub replay_mode: ReplayMode,
    pub priorities: PriorityConfig,
    pub ttr: Duration,
    pub metrics: PushPipeMetrics,
}

impl AppRuntime {
    pub fn spawn_lane(&self, role: &str) -> Lane {
        let sink = match self.replay_mode {
            ReplayMode::Broker => Some(ReplaySink::new(
                Arc::clone(&self.queue),
                self.tube.clone(),
                self.priorities,
                self.ttr,
            )),
            ReplayMode::Outbound => None,
        };

        let (pipe, outcomes) = PushPipe::spawn(
            self.app_name.clone(),
            role,
            Arc::clone(&self.gateway),
            self.pipe_settings.clone(),
            sink,
            self.metrics.clone(),
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let consumer = QueueConsumer::new(
            self.app_name.clone(),
            self.tube.clone(),
            Arc::clone(&self.queue),
            self.consumer_settings,
            self.priorities,
            pipe.sender(),
            outcomes,
            pipe.monitor().subscribe_accepting(),
            stop_rx,
            self.metrics.clone(),
        );
        let span = info_span!("queue_consumer", app = %self.app_name, role = %role);
        let consumer = tokio::spawn(consumer.run().instrument(span));

        Lane {
            role: role.to_string(),
            pipe,
            consumer_stop: stop_tx,
            consumer,
        }
    }
}

pub struct Lane {
    role: String,
    pipe: PipeHandle,
    consumer_stop: watch::Sender<bool>,
    consumer: JoinHandle<()>,
}

impl Lane {
    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn monitor(&self) -> Arc<PipeMonitor> {
        self.pipe.monitor()
    }

    /// 先停止 reserve，再排空管道，最后等消费者把剩余结果写回 broker
    pub async fn stop(self, drain: Duration) {
        let _ = self.consumer_stop.send(true);
        self.pipe.stop(drain).await;
        if let Err(err) = self.consumer.await {
            error!(role = %self.role, error = %err, "queue consumer task failed");
        }
    }
}
