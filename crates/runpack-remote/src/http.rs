use crate::{sanitize_uri, Transport, TransportError, USER_AGENT};
use std::io::Read;
use std::time::Duration;

/// HTTP(S) transport over a shared `ureq` agent.
///
/// Any non-success status is reported as [`TransportError::Status`]; the
/// caller's retry policy decides whether to try again.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Transport for HttpTransport {
    fn open(&self, uri: &str) -> Result<Box<dyn Read>, TransportError> {
        let shown = sanitize_uri(uri);
        tracing::debug!("GET {shown}");

        let resp = match self.agent.get(uri).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(TransportError::Status { uri: shown, code });
            }
            Err(e) => {
                return Err(TransportError::Network {
                    uri: shown,
                    reason: e.to_string(),
                });
            }
        };

        let code = resp.status().as_u16();
        if !(200..300).contains(&code) {
            return Err(TransportError::Status { uri: shown, code });
        }

        Ok(Box::new(resp.into_body().into_reader()))
    }
}
