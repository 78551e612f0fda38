//! Configuration types and loading logic.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use reqtrace::{InterceptorConfig, TracingConfig};
use serde::Deserialize;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
    #[serde(default)]
    pub interceptor: InterceptorConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

fn default_listen_address() -> String {
    "0.0.0.0:3090".to_string()
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (REQTRACE_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let config: ServerConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("REQTRACE_").split("__"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = ServerConfig::load("does-not-exist.toml").unwrap();
        assert_eq!(config.server.listen_address, "0.0.0.0:3090");
        assert_eq!(config.interceptor.trace_id_header, "MF-X-TRACE-ID");
        assert!(config.tracing.otlp_endpoint.is_none());
    }

    #[test]
    fn test_toml_sections() {
        let config: ServerConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [server]
                listen_address = "127.0.0.1:8080"

                [interceptor]
                max_content_log_size = 1024
                trace_id_header = "X-Trace-Id"

                [interceptor.common_labels]
                "deployment.environment" = "staging"
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.server.listen_address, "127.0.0.1:8080");
        assert_eq!(config.interceptor.max_content_log_size, 1024);
        assert_eq!(config.interceptor.trace_id_header, "X-Trace-Id");
        assert_eq!(
            config.interceptor.common_labels.get("deployment.environment"),
            Some(&"staging".to_string())
        );
        assert_eq!(config.tracing.service_name, "reqtrace-server");
    }
}
