//! Turbo Push Worker
//!
//! 从 beanstalkd 的应用 tube 取出通知任务，经推送管道写入 legacy 二进制推送网关。
//! 每个应用一个常驻 primary 管道，积压时按需启动 helper 管道。

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interface;
pub mod service;

pub use service::ApplicationBootstrap;
