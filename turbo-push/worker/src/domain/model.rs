use turbo_push_core::model::NotificationJob;

use crate::infrastructure::apns::CodecError;

/// 交给推送管道的一条通知
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub job: NotificationJob,
    /// broker 任务 id；重放产生的通知没有对应的 broker 任务
    pub receipt: Option<u64>,
}

impl Dispatch {
    pub fn new(job: NotificationJob, receipt: u64) -> Self {
        Self {
            job,
            receipt: Some(receipt),
        }
    }

    pub fn replay(job: NotificationJob) -> Self {
        Self { job, receipt: None }
    }
}

/// 管道对一条通知的处理结论
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// 已写入网关
    Delivered,
    /// 超过时效被丢弃，不写入
    Stale,
    /// 永久失败（token 非法 / payload 过大），bury
    Rejected(CodecError),
    /// 暂时无法发送，放回 broker
    Retry(String),
}

/// 回报给队列消费者的处理结果
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub receipt: u64,
    pub verdict: Verdict,
}
