//! 命令结构体定义（Command DTO）

use crate::domain::model::PushRequestItem;

/// 提交推送命令
#[derive(Debug, Clone)]
pub struct SubmitPushCommand {
    pub items: Vec<PushRequestItem>,
}

/// 查询 tube 统计
#[derive(Debug, Clone, Default)]
pub struct QueryTubeStatsCommand {
    /// 为空时查询批量 tube 与全部应用 tube
    pub app_name: Option<String>,
}
