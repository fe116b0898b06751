//! 重放缓冲
//!
//! 网关只在出错时返回错误帧，并在发出错误帧后关闭连接，之后到达的通知被静默丢弃。
//! 缓冲按发送顺序记录最近发送的 (identifier, job)，收到错误帧时据此决定哪些通知需要重发。

use std::collections::VecDeque;

/// 处理错误帧的结果
#[derive(Debug, PartialEq)]
pub struct ReplayOutcome<T> {
    /// 被网关拒绝的那一条（永不重发）
    pub rejected: Option<T>,
    /// 在被拒绝条目之后发送、需要按原顺序重发的通知
    pub replay: Vec<T>,
    /// 被拒绝条目之前的条目数，视为已送达
    pub delivered: usize,
}

#[derive(Debug)]
pub struct ReplayBuffer<T> {
    entries: VecDeque<(u32, T)>,
    capacity: usize,
}

impl<T> ReplayBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 追加一条记录；已满时先淘汰最旧的一条并返回它
    pub fn record(&mut self, identifier: u32, item: T) -> Option<(u32, T)> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back((identifier, item));
        evicted
    }

    /// 按错误帧中的 identifier 拆分缓冲，之后缓冲总是为空
    pub fn handle_error(&mut self, identifier: u32) -> ReplayOutcome<T> {
        let entries = std::mem::take(&mut self.entries);
        let Some(position) = entries.iter().position(|(id, _)| *id == identifier) else {
            return ReplayOutcome {
                rejected: None,
                replay: Vec::new(),
                delivered: entries.len(),
            };
        };

        let mut iter = entries.into_iter().skip(position);
        let rejected = iter.next().map(|(_, item)| item);
        let replay = iter.map(|(_, item)| item).collect();
        ReplayOutcome {
            rejected,
            replay,
            delivered: position,
        }
    }

    /// 连接在没有错误帧的情况下断开时，丢弃全部记录
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }
}
