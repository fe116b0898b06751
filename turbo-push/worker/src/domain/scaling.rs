//! helper 管道扩缩容规则
//!
//! 每个应用有一个常驻的 primary 管道和若干 helper 槽位。
//! - 空闲（最近一次成功发送距今）超过 `idle_timeout` 的 helper 被停用
//! - 积压超过 `backlog_threshold` 时，每次评估最多启用一个空闲槽位

use std::time::Duration;

/// helper 槽位的当前状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotView {
    Idle,
    Active { idle_for: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingAction {
    Activate(usize),
    Deactivate(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct ScalingPolicy {
    pub backlog_threshold: u64,
    pub idle_timeout: Duration,
}

impl ScalingPolicy {
    /// `backlog` 为 `None` 表示本轮无法获取队列统计，此时不启用新 helper
    pub fn evaluate(&self, backlog: Option<u64>, helpers: &[SlotView]) -> Vec<ScalingAction> {
        let mut actions: Vec<ScalingAction> = helpers
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                SlotView::Active { idle_for } if *idle_for > self.idle_timeout => {
                    Some(ScalingAction::Deactivate(index))
                }
                _ => None,
            })
            .collect();

        if backlog.is_some_and(|ready| ready > self.backlog_threshold) {
            let idle = helpers
                .iter()
                .position(|slot| matches!(slot, SlotView::Idle));
            if let Some(index) = idle {
                actions.push(ScalingAction::Activate(index));
            }
        }

        actions
    }
}
