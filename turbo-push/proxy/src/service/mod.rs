//! 服务模块 - 依赖装配与进程启动

pub mod bootstrap;
pub mod wire;

pub use bootstrap::ApplicationBootstrap;
