//! 自适应 worker 控制器
//!
//! 每个应用一个控制器任务，拥有该应用的 [`PipeRegistry`]：
//! primary 通道常驻，helper 槽位按 [`ScalingPolicy`] 启停。

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use turbo_push_core::PushTuningConfig;
use turbo_push_core::queue::JobQueue;

use super::lane::{AppRuntime, Lane};
use crate::domain::{ScalingAction, ScalingPolicy, SlotView};

pub enum HelperSlot {
    Idle,
    Active(Lane),
}

/// 单个应用当前运行的通道
pub struct PipeRegistry {
    primary: Lane,
    helpers: Vec<HelperSlot>,
}

impl PipeRegistry {
    /// 启动 primary 通道，并预留 `worker_count - 1` 个 helper 槽位
    pub fn start(runtime: &AppRuntime, worker_count: usize) -> Self {
        let primary = runtime.spawn_lane("primary");
        let helpers = (1..worker_count.max(1)).map(|_| HelperSlot::Idle).collect();
        Self { primary, helpers }
    }

    pub fn primary(&self) -> &Lane {
        &self.primary
    }

    pub fn helper_slots(&self) -> usize {
        self.helpers.len()
    }

    /// 包括 primary 在内的活跃通道数
    pub fn active_count(&self) -> usize {
        1 + self
            .helpers
            .iter()
            .filter(|slot| matches!(slot, HelperSlot::Active(_)))
            .count()
    }

    pub fn views(&self) -> Vec<SlotView> {
        self.helpers
            .iter()
            .map(|slot| match slot {
                HelperSlot::Idle => SlotView::Idle,
                HelperSlot::Active(lane) => SlotView::Active {
                    idle_for: lane.monitor().idle_for(),
                },
            })
            .collect()
    }

    async fn apply(&mut self, runtime: &AppRuntime, action: ScalingAction) {
        match action {
            ScalingAction::Activate(index) => {
                let Some(slot) = self.helpers.get_mut(index) else {
                    return;
                };
                if matches!(slot, HelperSlot::Idle) {
                    let role = format!("helper-{}", index + 1);
                    info!(app = %runtime.app_name, role = %role, "activating helper pipe");
                    *slot = HelperSlot::Active(runtime.spawn_lane(&role));
                }
            }
            ScalingAction::Deactivate(index) => {
                let Some(slot) = self.helpers.get_mut(index) else {
                    return;
                };
                // 空闲的 helper 不排空，队列中的任务直接交还 broker
                if let HelperSlot::Active(lane) = std::mem::replace(slot, HelperSlot::Idle) {
                    info!(app = %runtime.app_name, role = %lane.role(), "deactivating idle helper pipe");
                    lane.stop(Duration::ZERO).await;
                }
            }
        }
    }

    /// 停止全部通道（helper 先于 primary）
    pub async fn shutdown(self, drain: Duration) {
        let lanes = self.helpers.into_iter().filter_map(|slot| match slot {
            HelperSlot::Active(lane) => Some(lane),
            HelperSlot::Idle => None,
        });
        futures::future::join_all(lanes.map(|lane| lane.stop(drain))).await;
        self.primary.stop(drain).await;
    }
}

pub struct AdaptiveWorkerController {
    runtime: AppRuntime,
    registry: PipeRegistry,
    policy: ScalingPolicy,
    interval: Duration,
    drain: Duration,
    stats: Option<Box<dyn JobQueue>>,
}

impl AdaptiveWorkerController {
    pub fn new(
        runtime: AppRuntime,
        registry: PipeRegistry,
        policy: ScalingPolicy,
        interval: Duration,
        drain: Duration,
    ) -> Self {
        Self {
            runtime,
            registry,
            policy,
            interval,
            drain,
            stats: None,
        }
    }

    /// 按调优配置启动 primary 并构建控制器
    pub fn start(runtime: AppRuntime, worker_count: usize, tuning: &PushTuningConfig) -> Self {
        let registry = PipeRegistry::start(&runtime, worker_count);
        let policy = ScalingPolicy {
            backlog_threshold: tuning.backlog_threshold,
            idle_timeout: Duration::from_secs(tuning.idle_timeout_secs),
        };
        let controller = Self::new(
            runtime,
            registry,
            policy,
            Duration::from_secs(tuning.scale_check_interval_secs.max(1)),
            Duration::from_secs(tuning.drain_timeout_secs),
        );
        controller.update_gauge();
        controller
    }

    pub fn app_name(&self) -> &str {
        &self.runtime.app_name
    }

    pub fn registry(&self) -> &PipeRegistry {
        &self.registry
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            app = %self.runtime.app_name,
            helper_slots = self.registry.helper_slots(),
            "worker controller started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(app = %self.runtime.app_name, "stopping pipes");
        self.registry.shutdown(self.drain).await;
        self.runtime
            .metrics
            .active_pipes
            .with_label_values(&[self.runtime.app_name.as_str()])
            .set(0);
        info!(app = %self.runtime.app_name, "worker controller stopped");
    }

    /// 执行一次扩缩容评估，返回实际采取的动作
    pub async fn tick(&mut self) -> Vec<ScalingAction> {
        let backlog = self.backlog().await;
        let actions = self.policy.evaluate(backlog, &self.registry.views());
        if !actions.is_empty() {
            debug!(app = %self.runtime.app_name, ?backlog, ?actions, "scaling decision");
        }
        for action in &actions {
            self.registry.apply(&self.runtime, *action).await;
        }
        self.update_gauge();
        actions
    }

    fn update_gauge(&self) {
        self.runtime
            .metrics
            .active_pipes
            .with_label_values(&[self.runtime.app_name.as_str()])
            .set(self.registry.active_count() as i64);
    }

    /// 应用 tube 的 ready 任务数；broker 不可用时为 `None`
    async fn backlog(&mut self) -> Option<u64> {
        if self.stats.is_none() {
            match self.runtime.queue.connect().await {
                Ok(conn) => self.stats = Some(conn),
                Err(err) => {
                    debug!(app = %self.runtime.app_name, error = %err, "stats connection unavailable");
                    return None;
                }
            }
        }
        let conn = self.stats.as_mut()?;
        match conn.stats_tube(&self.runtime.tube).await {
            Ok(stats) => Some(stats.current_jobs_ready),
            Err(err) => {
                warn!(app = %self.runtime.app_name, error = %err, "failed to read tube stats");
                self.stats = None;
                None
            }
        }
    }
}
