//! Turbo Push Proxy
//!
//! HTTP 提交入口：校验推送请求、按 token 展开后写入 beanstalkd；
//! 大批量请求先写入批量 tube，由批量消费者再展开到各应用 tube。

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod service;

pub use service::ApplicationBootstrap;
