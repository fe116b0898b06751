//! # Prometheus 指标收集模块
//!
//! 为 worker 与 proxy 提供统一的 Prometheus 指标收集能力。

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 推送管道指标
#[derive(Clone)]
pub struct PushPipeMetrics {
    /// 写入网关的通知数（含重放）
    pub notifications_sent_total: IntCounterVec,
    /// 因网关错误帧而重放的通知数
    pub notifications_replayed_total: IntCounterVec,
    /// 网关错误帧（按状态码）
    pub gateway_rejections_total: IntCounterVec,
    /// 过期丢弃的任务数
    pub stale_jobs_discarded_total: IntCounterVec,
    /// 永久失败（bury）的任务数
    pub permanent_failures_total: IntCounterVec,
    /// 网关重连次数（按原因）
    pub gateway_reconnects_total: IntCounterVec,
    /// 当前活跃管道数
    pub active_pipes: IntGaugeVec,
}

impl PushPipeMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let notifications_sent_total = IntCounterVec::new(
            Opts::new(
                "turbo_push_notifications_sent_total",
                "Total number of notification frames written to the gateway",
            ),
            &["app"],
        )?;

        let notifications_replayed_total = IntCounterVec::new(
            Opts::new(
                "turbo_push_notifications_replayed_total",
                "Total number of notifications replayed after a gateway error frame",
            ),
            &["app"],
        )?;

        let gateway_rejections_total = IntCounterVec::new(
            Opts::new(
                "turbo_push_gateway_rejections_total",
                "Total number of error frames received from the gateway",
            ),
            &["app", "status"],
        )?;

        let stale_jobs_discarded_total = IntCounterVec::new(
            Opts::new(
                "turbo_push_stale_jobs_discarded_total",
                "Total number of jobs discarded because they exceeded the age ceiling",
            ),
            &["app"],
        )?;

        let permanent_failures_total = IntCounterVec::new(
            Opts::new(
                "turbo_push_permanent_failures_total",
                "Total number of jobs buried as permanently undeliverable",
            ),
            &["app", "reason"],
        )?;

        let gateway_reconnects_total = IntCounterVec::new(
            Opts::new(
                "turbo_push_gateway_reconnects_total",
                "Total number of gateway reconnects",
            ),
            &["app", "reason"],
        )?;

        let active_pipes = IntGaugeVec::new(
            Opts::new("turbo_push_active_pipes", "Number of active push pipes"),
            &["app"],
        )?;

        // 注册指标，忽略重复注册错误（测试中可能会重复创建）
        let _ = REGISTRY.register(Box::new(notifications_sent_total.clone()));
        let _ = REGISTRY.register(Box::new(notifications_replayed_total.clone()));
        let _ = REGISTRY.register(Box::new(gateway_rejections_total.clone()));
        let _ = REGISTRY.register(Box::new(stale_jobs_discarded_total.clone()));
        let _ = REGISTRY.register(Box::new(permanent_failures_total.clone()));
        let _ = REGISTRY.register(Box::new(gateway_reconnects_total.clone()));
        let _ = REGISTRY.register(Box::new(active_pipes.clone()));

        Ok(Self {
            notifications_sent_total,
            notifications_replayed_total,
            gateway_rejections_total,
            stale_jobs_discarded_total,
            permanent_failures_total,
            gateway_reconnects_total,
            active_pipes,
        })
    }
}

/// HTTP 提交接口指标
#[derive(Clone)]
pub struct PushApiMetrics {
    /// 写入应用 tube 的任务数
    pub jobs_enqueued_total: IntCounterVec,
    /// 写入批量 tube 的聚合任务数
    pub batches_enqueued_total: IntCounter,
    /// 被拒绝的请求（按错误码）
    pub requests_rejected_total: IntCounterVec,
}

impl PushApiMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let jobs_enqueued_total = IntCounterVec::new(
            Opts::new(
                "turbo_push_api_jobs_enqueued_total",
                "Total number of notification jobs put into app tubes",
            ),
            &["app"],
        )?;

        let batches_enqueued_total = IntCounter::new(
            "turbo_push_api_batches_enqueued_total",
            "Total number of aggregated jobs put into the batch tube",
        )?;

        let requests_rejected_total = IntCounterVec::new(
            Opts::new(
                "turbo_push_api_requests_rejected_total",
                "Total number of rejected submission requests",
            ),
            &["code"],
        )?;

        let _ = REGISTRY.register(Box::new(jobs_enqueued_total.clone()));
        let _ = REGISTRY.register(Box::new(batches_enqueued_total.clone()));
        let _ = REGISTRY.register(Box::new(requests_rejected_total.clone()));

        Ok(Self {
            jobs_enqueued_total,
            batches_enqueued_total,
            requests_rejected_total,
        })
    }
}

/// 获取 Prometheus 文本格式的指标导出
pub fn gather_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
