//! 命令处理器（编排层）- 轻量级，只负责编排领域服务

use std::sync::Arc;

use tracing::instrument;
use turbo_push_core::queue::TubeStats;

use crate::application::commands::{QueryTubeStatsCommand, SubmitPushCommand};
use crate::domain::errors::SubmissionError;
use crate::domain::model::Submission;
use crate::domain::service::PushDomainService;

pub struct PushCommandHandler {
    domain_service: Arc<PushDomainService>,
}

impl PushCommandHandler {
    pub fn new(domain_service: Arc<PushDomainService>) -> Self {
        Self { domain_service }
    }

    #[instrument(skip(self, command), fields(items = command.items.len()))]
    pub async fn handle_submit(
        &self,
        command: SubmitPushCommand,
    ) -> Result<Submission, SubmissionError> {
        self.domain_service.submit(command.items).await
    }

    #[instrument(skip(self))]
    pub async fn handle_query_stats(
        &self,
        command: QueryTubeStatsCommand,
    ) -> Result<Vec<TubeStats>, SubmissionError> {
        self.domain_service
            .tube_stats(command.app_name.as_deref())
            .await
    }
}
