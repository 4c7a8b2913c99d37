//! Interactor that narrates effects on stdout

use async_trait::async_trait;
use saorsa_call_core::prelude::*;
use std::time::Duration;

/// Prints every request and answers roster queries from a fixed roster
pub struct ConsoleInteractor {
    identity: String,
    roster: Vec<ParticipantUpdate>,
    latency: Duration,
}

impl ConsoleInteractor {
    /// Create an interactor for the local `identity`
    pub fn new(identity: impl Into<String>, roster: Vec<ParticipantUpdate>) -> Self {
        Self {
            identity: identity.into(),
            roster,
            latency: Duration::from_millis(20),
        }
    }
}

#[async_trait]
impl Interactor for ConsoleInteractor {
    async fn send_signal(
        &self,
        call_id: CallId,
        signal: OutboundSignal,
    ) -> Result<(), InteractorError> {
        tokio::time::sleep(self.latency).await;
        let body = serde_json::to_string(&signal)
            .map_err(|e| InteractorError::Signaling(e.to_string()))?;
        println!("📡 {} -> signal {}: {}", self.identity, short(call_id), body);
        Ok(())
    }

    async fn teardown_media(&self, call_id: CallId) -> Result<(), InteractorError> {
        println!("🧹 Media released for {}", short(call_id));
        Ok(())
    }

    async fn query_membership(
        &self,
        call_id: CallId,
    ) -> Result<Vec<ParticipantUpdate>, InteractorError> {
        tokio::time::sleep(self.latency).await;
        println!(
            "👥 Roster for {}: {} participant(s)",
            short(call_id),
            self.roster.len()
        );
        Ok(self.roster.clone())
    }
}

/// First block of a call id, enough to tell calls apart on screen
pub fn short(call_id: CallId) -> String {
    call_id.to_string().chars().take(8).collect()
}
