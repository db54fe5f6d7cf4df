use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::utils::{SecurityError, SecurityResult};

/// Fixed set of security response headers, parsed once at startup
#[derive(Debug, Clone, Default)]
pub struct SecurityHeadersService {
    headers: HeaderMap,
}

impl SecurityHeadersService {
    pub fn from_config(values: &BTreeMap<String, String>) -> SecurityResult<Self> {
        let mut headers = HeaderMap::with_capacity(values.len());
        for (name, value) in values {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SecurityError::InvalidRequest(format!("header name {:?}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SecurityError::InvalidRequest(format!("header value for {}: {}", name, e)))?;
            headers.insert(name, value);
        }
        Ok(Self { headers })
    }

    pub fn get_security_headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Write every header onto `target`, replacing existing values
    pub fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            target.insert(name.clone(), value.clone());
        }
    }
}
