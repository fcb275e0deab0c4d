//! Backend location and endpoint derivation.

use std::fmt;

use evalboard_error::{EvalError, Result};
use serde::{Deserialize, Serialize};

/// HTTP(S) origin of the backend, e.g. `http://localhost:8000`.
///
/// Stored without a trailing slash or path so endpoint paths can be appended
/// directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BaseUrl {
    secure: bool,
    host: String,
    port: Option<u16>,
}

impl BaseUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (secure, rest) = if let Some(rest) = raw.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = raw.strip_prefix("http://") {
            (false, rest)
        } else {
            return Err(EvalError::config(format!(
                "backend url `{raw}` must start with http:// or https://"
            )));
        };

        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(EvalError::config(format!("backend url `{raw}` has no host")));
        }
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    EvalError::config(format!("backend url `{raw}` has an invalid port"))
                })?;
                (host, Some(port))
            }
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(EvalError::config(format!("backend url `{raw}` has no host")));
        }
        Ok(Self {
            secure,
            host: host.to_owned(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Same host and scheme on a different port.
    #[must_use]
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port: Some(port),
            ..self.clone()
        }
    }

    /// HTTP URL for `path` (which should start with `/`).
    pub fn to_http(&self, path: &str) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}{path}", self.authority())
    }

    /// WebSocket URL for `path` on the same origin.
    pub fn to_ws(&self, path: &str) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}{path}", self.authority())
    }

    fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }
}

impl Default for BaseUrl {
    fn default() -> Self {
        Self {
            secure: false,
            host: "localhost".to_owned(),
            port: Some(8000),
        }
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_http(""))
    }
}

impl TryFrom<String> for BaseUrl {
    type Error = EvalError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<BaseUrl> for String {
    fn from(value: BaseUrl) -> Self {
        value.to_string()
    }
}
