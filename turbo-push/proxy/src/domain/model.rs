//! 提交接口的领域模型

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use turbo_push_core::model::{NotificationJob, Payload, Priority};

/// `POST /push` 请求数组中的一项
#[derive(Debug, Clone, Deserialize)]
pub struct PushRequestItem {
    pub app_name: String,
    #[serde(default)]
    pub device_token: Option<String>,
    #[serde(default)]
    pub device_tokens: Vec<String>,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub priority: Option<Priority>,
    /// 投递延迟（秒）
    #[serde(default)]
    pub delay: Option<u64>,
    #[serde(default)]
    pub expiry: Option<u32>,
}

impl PushRequestItem {
    /// `device_token` 与 `device_tokens` 合并后的全部 token
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.device_token
            .iter()
            .chain(self.device_tokens.iter())
            .map(String::as_str)
    }

    /// 每个 token 展开为一个任务
    pub fn into_jobs(self, enqueued_at: DateTime<Utc>) -> Vec<NotificationJob> {
        let priority = self.priority.unwrap_or_default();
        let delay = self.delay.unwrap_or(0);
        let expiry = self.expiry.unwrap_or(0);
        self.tokens()
            .map(|token| {
                NotificationJob::new(self.app_name.clone(), token, self.payload.clone())
                    .with_priority(priority)
                    .with_delay(delay)
                    .with_expiry(expiry)
                    .enqueued_at(enqueued_at)
            })
            .collect()
    }
}

/// 任务的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// 逐个写入应用 tube 的任务数
    Individual(usize),
    /// 聚合为一个批量任务的任务数
    Batched(usize),
}

impl Submission {
    pub fn job_count(&self) -> usize {
        match self {
            Submission::Individual(count) | Submission::Batched(count) => *count,
        }
    }
}

/// 已注册应用与 tube 命名
#[derive(Debug, Clone)]
pub struct TubeDirectory {
    tube_pattern: String,
    batch_tube: String,
    apps: BTreeSet<String>,
}

impl TubeDirectory {
    pub fn new(
        tube_pattern: impl Into<String>,
        batch_tube: impl Into<String>,
        apps: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            tube_pattern: tube_pattern.into(),
            batch_tube: batch_tube.into(),
            apps: apps.into_iter().collect(),
        }
    }

    pub fn is_registered(&self, app_name: &str) -> bool {
        self.apps.contains(app_name)
    }

    pub fn app_tube(&self, app_name: &str) -> String {
        self.tube_pattern.replace("{app}", app_name)
    }

    pub fn batch_tube(&self) -> &str {
        &self.batch_tube
    }

    pub fn app_names(&self) -> impl Iterator<Item = &str> {
        self.apps.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: &str = "1111111111111111111111111111111111111111111111111111111111111111";
    const T2: &str = "2222222222222222222222222222222222222222222222222222222222222222";

    #[test]
    fn test_item_expands_every_token() {
        let item: PushRequestItem = serde_json::from_value(serde_json::json!({
            "app_name": "demo",
            "device_token": T1,
            "device_tokens": [T2],
            "payload": {"alert": "hi"},
            "priority": "high",
            "delay": 5
        }))
        .unwrap();

        let now = Utc::now();
        let jobs = item.into_jobs(now);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].device_token, T1);
        assert_eq!(jobs[1].device_token, T2);
        assert!(jobs.iter().all(|job| job.priority == Priority::High));
        assert!(jobs.iter().all(|job| job.delay == 5));
        assert!(jobs.iter().all(|job| job.enqueue_time == Some(now)));
    }

    #[test]
    fn test_item_defaults() {
        let item: PushRequestItem =
            serde_json::from_value(serde_json::json!({"app_name": "demo", "device_tokens": [T1]}))
                .unwrap();
        let job = item.into_jobs(Utc::now()).remove(0);
        assert_eq!(job.priority, Priority::Low);
        assert_eq!(job.delay, 0);
        assert_eq!(job.expiry, 0);
    }

    #[test]
    fn test_directory_tubes() {
        let directory = TubeDirectory::new("push.{app}", "batch_push", ["demo".to_string()]);
        assert!(directory.is_registered("demo"));
        assert!(!directory.is_registered("other"));
        assert_eq!(directory.app_tube("demo"), "push.demo");
        assert_eq!(directory.batch_tube(), "batch_push");
    }
}
