use std::time::Duration;

use serde_json::json;
use storyforge_sdk::{async_trait, AgentGateway, AgentKind, GatewayError};

/// In-process gateway that reports every story as passing
#[derive(Debug, Clone, Default)]
pub struct SimulatedGateway {
    latency: Duration,
}

impl SimulatedGateway {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl AgentGateway for SimulatedGateway {
    async fn invoke(
        &self,
        kind: AgentKind,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        tracing::debug!(agent = %kind, action, "simulated agent call");

        Ok(match kind {
            AgentKind::Coder => json!({
                "status": "implemented",
                "story": payload["story"]["id"],
            }),
            AgentKind::Tester => json!({ "passed": 1, "failed": 0, "total": 1 }),
            AgentKind::Security => json!({ "findings": [] }),
        })
    }
}
