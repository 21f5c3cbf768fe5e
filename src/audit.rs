// =============================================================================
// audit.rs - structured audit events
// =============================================================================
//
// Audit events ride a dedicated tracing target so operators can route them to
// their own sink. The contract is strict: an event never contains the user's
// message, only its length, plus the trace id, event type, locale, mode, and
// (for provider failures) the provider and error code.
// =============================================================================

use serde::Serialize;

use crate::models::{ChatLocale, ChatMode};

/// Tracing target carrying audit events. Filter with
/// RUST_LOG=immcad_api::audit=info to isolate the channel.
pub const AUDIT_TARGET: &str = "immcad_api::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    PolicyBlock,
    ProviderError,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditEventType::PolicyBlock => write!(f, "policy_block"),
            AuditEventType::ProviderError => write!(f, "provider_error"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAuditEvent {
    pub trace_id: String,
    pub event_type: AuditEventType,
    pub locale: ChatLocale,
    pub mode: ChatMode,
    pub message_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_error_code: Option<String>,
}

impl ChatAuditEvent {
    pub fn new(
        trace_id: &str,
        event_type: AuditEventType,
        locale: ChatLocale,
        mode: ChatMode,
        message_length: usize,
    ) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            event_type,
            locale,
            mode,
            message_length,
            provider: None,
            provider_error_code: None,
        }
    }

    pub fn with_provider(mut self, provider: &str, error_code: &str) -> Self {
        self.provider = Some(provider.to_string());
        self.provider_error_code = Some(error_code.to_string());
        self
    }

    /// Emit on the audit channel.
    pub fn emit(&self) {
        tracing::info!(
            target: "immcad_api::audit",
            trace_id = self.trace_id.as_str(),
            event_type = %self.event_type,
            locale = %self.locale,
            mode = %self.mode,
            message_length = self.message_length,
            provider = self.provider.as_deref().unwrap_or(""),
            provider_error_code = self.provider_error_code.as_deref().unwrap_or(""),
            "chat_audit_event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_never_includes_a_message_field() {
        let event = ChatAuditEvent::new(
            "trace-policy-001",
            AuditEventType::PolicyBlock,
            ChatLocale::EnCa,
            ChatMode::Standard,
            42,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "policy_block");
        assert_eq!(json["message_length"], 42);
        assert!(json.get("message").is_none());
        assert!(json.get("provider").is_none());
    }

    #[test]
    fn provider_error_event_carries_provider_and_code() {
        let event = ChatAuditEvent::new(
            "trace-provider-001",
            AuditEventType::ProviderError,
            ChatLocale::EnCa,
            ChatMode::Standard,
            24,
        )
        .with_provider("openai", "timeout");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["provider"], "openai");
        assert_eq!(json["provider_error_code"], "timeout");
    }
}
