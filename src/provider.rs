//! Rule provider client for the Pangolin resource-rule API.

use crate::config::ProviderConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

/// Error from the rule provider.
#[derive(Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    Http(reqwest::Error),
    /// Timeout.
    Timeout,
    /// Provider rejected the call or returned something unusable.
    InvalidResponse(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Http(e) => write!(f, "HTTP error: {}", e),
            ProviderError::Timeout => write!(f, "Request timed out"),
            ProviderError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(e)
        }
    }
}

/// Interface to the external API managing ACCEPT rules for IPs.
///
/// Both calls are fallible and must be treated as non-idempotent: the engine
/// never creates a rule for an IP it already tracks, and never deletes an id
/// it no longer tracks.
#[async_trait]
pub trait RuleProvider: Send + Sync {
    /// Create an ACCEPT rule for the IP, returning the remote rule id.
    async fn create_rule(&self, ip: IpAddr) -> Result<String, ProviderError>;

    /// Delete a previously created rule.
    async fn delete_rule(&self, rule_id: &str) -> Result<(), ProviderError>;
}

/// Rule creation request body.
#[derive(Debug, Serialize)]
struct CreateRuleBody {
    action: &'static str,
    #[serde(rename = "match")]
    match_type: &'static str,
    value: String,
    priority: u32,
    enabled: bool,
}

/// Rule creation response. The rule id lives under `data.ruleId` on current
/// servers, or at top-level `id` on older ones; either may be a number or a
/// string.
#[derive(Debug, Deserialize)]
struct CreateRuleResponse {
    #[serde(default)]
    data: Option<CreateRuleData>,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CreateRuleData {
    #[serde(rename = "ruleId", default)]
    rule_id: Option<Value>,
}

impl CreateRuleResponse {
    fn rule_id(&self) -> Option<String> {
        self.data
            .as_ref()
            .and_then(|d| d.rule_id.as_ref())
            .or(self.id.as_ref())
            .and_then(id_to_string)
    }
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// HTTP client for the Pangolin rule API, scoped to one resource.
pub struct PangolinClient {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl PangolinClient {
    /// Create a new client with a bounded request timeout.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self { config, client })
    }

    fn rules_url(&self) -> String {
        format!(
            "{}/resource/{}/rule",
            self.config.endpoint, self.config.resource_id
        )
    }
}

#[async_trait]
impl RuleProvider for PangolinClient {
    async fn create_rule(&self, ip: IpAddr) -> Result<String, ProviderError> {
        let url = self.rules_url();
        let body = CreateRuleBody {
            action: "ACCEPT",
            match_type: "IP",
            value: ip.to_string(),
            priority: 0,
            enabled: true,
        };

        debug!(ip = %ip, url = %url, "creating rule");

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !matches!(status.as_u16(), 200 | 201) {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidResponse(format!(
                "create returned HTTP {}: {}",
                status, text
            )));
        }

        let parsed: CreateRuleResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("failed to parse create response: {}", e))
        })?;

        let rule_id = parsed.rule_id().ok_or_else(|| {
            ProviderError::InvalidResponse("rule created but no id in response".to_string())
        })?;

        info!(ip = %ip, rule_id = %rule_id, "rule created");
        Ok(rule_id)
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/{}", self.rules_url(), rule_id);

        debug!(rule_id = %rule_id, url = %url, "deleting rule");

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        let status = response.status();
        if !matches!(status.as_u16(), 200 | 204) {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidResponse(format!(
                "delete returned HTTP {}: {}",
                status, text
            )));
        }

        info!(rule_id = %rule_id, "rule deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            endpoint: "https://pangolin.example.com/v1".to_string(),
            api_key: "test-key".to_string(),
            resource_id: "1".to_string(),
            timeout_ms: 5000,
        }
    }

    #[test]
    fn test_rules_url() {
        let client = PangolinClient::new(test_config()).unwrap();
        assert_eq!(
            client.rules_url(),
            "https://pangolin.example.com/v1/resource/1/rule"
        );
    }

    #[test]
    fn test_create_body_serialization() {
        let body = CreateRuleBody {
            action: "ACCEPT",
            match_type: "IP",
            value: "10.0.0.5".to_string(),
            priority: 0,
            enabled: true,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "action": "ACCEPT",
                "match": "IP",
                "value": "10.0.0.5",
                "priority": 0,
                "enabled": true
            })
        );
    }

    #[test]
    fn test_rule_id_from_data_field() {
        let parsed: CreateRuleResponse =
            serde_json::from_str(r#"{"data": {"ruleId": 42}}"#).unwrap();
        assert_eq!(parsed.rule_id(), Some("42".to_string()));

        let parsed: CreateRuleResponse =
            serde_json::from_str(r#"{"data": {"ruleId": "rule-42"}}"#).unwrap();
        assert_eq!(parsed.rule_id(), Some("rule-42".to_string()));
    }

    #[test]
    fn test_rule_id_from_legacy_top_level_id() {
        let parsed: CreateRuleResponse = serde_json::from_str(r#"{"id": 7}"#).unwrap();
        assert_eq!(parsed.rule_id(), Some("7".to_string()));
    }

    #[test]
    fn test_rule_id_missing() {
        let parsed: CreateRuleResponse = serde_json::from_str(r#"{"data": {}}"#).unwrap();
        assert_eq!(parsed.rule_id(), None);

        let parsed: CreateRuleResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(parsed.rule_id(), None);
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::InvalidResponse("boom".to_string());
        assert_eq!(err.to_string(), "Invalid response: boom");
        assert_eq!(ProviderError::Timeout.to_string(), "Request timed out");
    }
}
