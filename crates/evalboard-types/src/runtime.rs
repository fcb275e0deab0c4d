use evalboard_error::{EvalError, Result};
use serde::{Deserialize, Serialize};

use crate::endpoint::BaseUrl;

/// Path of the live subscription on the backend.
pub const SUBSCRIPTION_PATH: &str = "/ws";

/// Response of `GET /config`.
///
/// Older backends only report `backendPort`; newer ones may hand out an
/// explicit subscription URL. Both camelCase and snake_case spellings are
/// accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default, alias = "wsUrl", skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    #[serde(default, alias = "backendPort", skip_serializing_if = "Option::is_none")]
    pub backend_port: Option<u16>,
    #[serde(default, alias = "model", alias = "modelName")]
    pub evaluation_model: String,
    #[serde(default, alias = "scoringModel")]
    pub scoring_model: String,
}

impl RuntimeConfig {
    /// Origin for HTTP calls after `/config`: the bootstrap origin, moved to
    /// `backend_port` when one is reported.
    pub fn api_base(&self, bootstrap: &BaseUrl) -> BaseUrl {
        match self.backend_port {
            Some(port) => bootstrap.with_port(port),
            None => bootstrap.clone(),
        }
    }

    /// Live subscription endpoint.
    pub fn subscription_endpoint(&self, bootstrap: &BaseUrl) -> Result<String> {
        match self.ws_url.as_deref().map(str::trim) {
            Some(url) if url.starts_with("ws://") || url.starts_with("wss://") => {
                Ok(url.to_owned())
            }
            Some(url) if !url.is_empty() => Err(EvalError::config(format!(
                "subscription url `{url}` must start with ws:// or wss://"
            ))),
            _ => Ok(self.api_base(bootstrap).to_ws(SUBSCRIPTION_PATH)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_port_only_config() {
        let config: RuntimeConfig = serde_json::from_str(
            r#"{"backendPort": 8001, "model": "gpt-4o-mini", "scoringModel": "gpt-4o"}"#,
        )
        .unwrap();
        let bootstrap = BaseUrl::parse("http://localhost:8000").unwrap();
        assert_eq!(config.evaluation_model, "gpt-4o-mini");
        assert_eq!(config.scoring_model, "gpt-4o");
        assert_eq!(
            config.api_base(&bootstrap).to_http("/evaluate"),
            "http://localhost:8001/evaluate"
        );
        assert_eq!(
            config.subscription_endpoint(&bootstrap).unwrap(),
            "ws://localhost:8001/ws"
        );
    }

    #[test]
    fn explicit_ws_url_wins() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"wsUrl": "wss://live.example.com/ws", "modelName": "m"}"#)
                .unwrap();
        let bootstrap = BaseUrl::default();
        assert_eq!(
            config.subscription_endpoint(&bootstrap).unwrap(),
            "wss://live.example.com/ws"
        );
        assert_eq!(config.evaluation_model, "m");
    }

    #[test]
    fn missing_fields_fall_back_to_bootstrap() {
        let config: RuntimeConfig = serde_json::from_str("{}").unwrap();
        let bootstrap = BaseUrl::default();
        assert_eq!(config.api_base(&bootstrap), bootstrap);
        assert_eq!(
            config.subscription_endpoint(&bootstrap).unwrap(),
            "ws://localhost:8000/ws"
        );
    }

    #[test]
    fn non_ws_url_is_a_configuration_error() {
        let config = RuntimeConfig {
            ws_url: Some("http://x/ws".to_owned()),
            ..RuntimeConfig::default()
        };
        assert!(config.subscription_endpoint(&BaseUrl::default()).is_err());
    }
}
