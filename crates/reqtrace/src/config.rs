//! Tracing and interceptor configuration types.

use std::collections::BTreeMap;

use opentelemetry::KeyValue;
use serde::Deserialize;

/// Configuration for the OpenTelemetry tracing subsystem.
#[derive(Debug, Clone, Deserialize)]
pub struct TracingConfig {
    /// The service name reported to the OTLP collector.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// OTLP collector endpoint (e.g. "http://localhost:4317").
    /// When `None`, OTLP export is disabled and only fmt logging is used.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Transport protocol for OTLP export.
    #[serde(default)]
    pub protocol: OtlpProtocol,

    /// Log level filter (e.g. "info", "debug", "reqtrace=debug,info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// OTLP transport protocol.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

/// Configuration for the request tracing interceptor.
#[derive(Debug, Clone, Deserialize)]
pub struct InterceptorConfig {
    /// Maximum number of body bytes recorded in `http.request.body` and
    /// `http.response.body`. Longer bodies are cut and suffixed with `...`.
    #[serde(default = "default_max_content_log_size")]
    pub max_content_log_size: usize,

    /// Upper bound on the request body buffered for capture. A longer body
    /// is not logged and its downstream read fails.
    #[serde(default = "default_max_request_body_size")]
    pub max_request_body_size: usize,

    /// Header carrying a bare upstream trace ID.
    #[serde(default = "default_trace_id_header")]
    pub trace_id_header: String,

    /// Labels attached to every server span.
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
}

fn default_service_name() -> String {
    "reqtrace-server".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_content_log_size() -> usize {
    256 * 1024
}

fn default_max_request_body_size() -> usize {
    10 * 1024 * 1024
}

fn default_trace_id_header() -> String {
    "MF-X-TRACE-ID".to_string()
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            otlp_endpoint: None,
            protocol: OtlpProtocol::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            max_content_log_size: default_max_content_log_size(),
            max_request_body_size: default_max_request_body_size(),
            trace_id_header: default_trace_id_header(),
            common_labels: BTreeMap::new(),
        }
    }
}

impl InterceptorConfig {
    /// Span attributes shared by every request served by this process.
    ///
    /// Configured labels come first; `host.name` (when the OS reports one)
    /// and `process.pid` are always appended.
    pub fn common_attributes(&self) -> Vec<KeyValue> {
        let mut attributes: Vec<KeyValue> = self
            .common_labels
            .iter()
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone()))
            .collect();
        if let Some(host) = os_hostname() {
            attributes.push(KeyValue::new("host.name", host));
        }
        attributes.push(KeyValue::new("process.pid", i64::from(std::process::id())));
        attributes
    }
}

fn os_hostname() -> Option<String> {
    match hostname::get() {
        Ok(host) => Some(host.to_string_lossy().into_owned()),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to query hostname");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interceptor_defaults() {
        let config = InterceptorConfig::default();
        assert_eq!(config.max_content_log_size, 262_144);
        assert_eq!(config.max_request_body_size, 10 * 1024 * 1024);
        assert_eq!(config.trace_id_header, "MF-X-TRACE-ID");
        assert!(config.common_labels.is_empty());
    }

    #[test]
    fn test_partial_interceptor_config_fills_defaults() {
        let config: InterceptorConfig =
            serde_json::from_str(r#"{"max_content_log_size": 16}"#).unwrap();
        assert_eq!(config.max_content_log_size, 16);
        assert_eq!(config.max_request_body_size, 10 * 1024 * 1024);
        assert_eq!(config.trace_id_header, "MF-X-TRACE-ID");
    }

    #[test]
    fn test_common_attributes_include_labels_host_and_pid() {
        let mut config = InterceptorConfig::default();
        config
            .common_labels
            .insert("deployment.environment".to_string(), "staging".to_string());

        let attributes = config.common_attributes();
        assert_eq!(attributes[0].key.as_str(), "deployment.environment");
        assert_eq!(attributes[0].value.as_str(), "staging");

        let host = attributes
            .iter()
            .find(|kv| kv.key.as_str() == "host.name")
            .expect("host.name should be a common attribute");
        assert_eq!(
            host.value.as_str(),
            hostname::get().unwrap().to_string_lossy()
        );
        assert_eq!(attributes.last().unwrap().key.as_str(), "process.pid");
    }

    #[test]
    fn test_protocol_lowercase() {
        let config: TracingConfig = serde_json::from_str(r#"{"protocol": "http"}"#).unwrap();
        assert_eq!(config.protocol, OtlpProtocol::Http);
        assert!(config.otlp_endpoint.is_none());
    }
}
