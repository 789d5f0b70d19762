//! Spec files and server settings.
//!
//! A spec file lists the mocks to register at startup together with the
//! listener settings. YAML and JSON are both accepted.

use crate::matcher::Route;
use crate::mock::{HttpMock, Mock, RestMock};
use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

/// Top-level spec file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecFile {
    /// Listener and logging settings
    #[serde(default)]
    pub config: ServerSettings,

    /// Plain HTTP mocks
    #[serde(default)]
    pub http: Vec<HttpMock>,

    /// RESTful collection mocks
    #[serde(default)]
    pub rest: Vec<RestMock>,
}

impl Default for SpecFile {
    /// Default settings and a single `GET /` mock answering 200.
    fn default() -> Self {
        Self {
            config: ServerSettings::default(),
            http: vec![HttpMock::default()],
            rest: Vec::new(),
        }
    }
}

impl SpecFile {
    /// Load a spec from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read spec file {}", path.display()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let spec: Self = match extension.as_deref() {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON spec {}", path.display()))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML spec {}", path.display()))?,
            _ => bail!(
                "Unsupported spec file extension for {} (expected .json, .yaml or .yml)",
                path.display()
            ),
        };

        spec.validate()?;
        Ok(spec)
    }

    /// Load a spec, or fall back to [`SpecFile::default`] when the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            info!(path = %path.display(), "Loading spec file");
            Self::from_file(path)
        } else {
            info!(path = %path.display(), "Spec file not found, using default spec");
            Ok(Self::default())
        }
    }

    /// Check settings and compile every mock's patterns.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.config.validate()?;

        for (i, mock) in self.http.iter().enumerate() {
            let mock = Mock::Http(mock.clone().resolve());
            Route::compile(mock.hash(), &mock)
                .map_err(|e| anyhow!("http mock {} ({}): {}", i, mock, e))?;
        }
        for (i, mock) in self.rest.iter().enumerate() {
            let mock = Mock::Rest(mock.clone().resolve());
            Route::compile(mock.hash(), &mock)
                .map_err(|e| anyhow!("rest mock {} ({}): {}", i, mock, e))?;
        }
        Ok(())
    }

    /// Every mock in the file, HTTP mocks first.
    pub fn mocks(&self) -> Vec<Mock> {
        self.http
            .iter()
            .cloned()
            .map(Mock::Http)
            .chain(self.rest.iter().cloned().map(Mock::Rest))
            .collect()
    }
}

/// Listener and logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Interface both listeners bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port serving mocks
    #[serde(default = "default_http_port", alias = "httpPort")]
    pub http_port: u16,

    /// Port serving the control plane
    #[serde(default = "default_control_port", alias = "controlPort")]
    pub control_port: u16,

    /// Log every matched request
    #[serde(default = "default_true", alias = "logMatches")]
    pub log_matches: bool,

    /// Log requests no mock matched
    #[serde(default = "default_true", alias = "logUnmatched")]
    pub log_unmatched: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            control_port: default_control_port(),
            log_matches: true,
            log_unmatched: true,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_control_port() -> u16 {
    9999
}

fn default_true() -> bool {
    true
}

impl ServerSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.http_port != 0 && self.http_port == self.control_port {
            bail!(
                "http_port and control_port must differ (both are {})",
                self.http_port
            );
        }
        self.http_addr()?;
        Ok(())
    }

    pub fn http_addr(&self) -> anyhow::Result<SocketAddr> {
        socket_addr(&self.host, self.http_port)
    }

    pub fn control_addr(&self) -> anyhow::Result<SocketAddr> {
        socket_addr(&self.host, self.control_port)
    }
}

fn socket_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let addr = if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    addr.parse()
        .with_context(|| format!("Invalid listen address {:?}", addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::HttpAction;
    use std::io::Write;

    fn write_spec(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_yaml_spec() {
        let yaml = r#"
config:
  http_port: 8081
  log_matches: false
http:
  - methods: [POST]
    path: /echo
    response:
      status_code: 201
      body:
        ok: true
rest:
  - base_path: /api/v1/teams
    response:
      list_key: data
    store:
      objects:
        - _id: a
          name: X
"#;
        let spec: SpecFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.config.http_port, 8081);
        assert_eq!(spec.config.control_port, 9999);
        assert!(!spec.config.log_matches);
        assert_eq!(spec.http.len(), 1);
        assert_eq!(spec.rest.len(), 1);
        match &spec.http[0].action {
            HttpAction::Respond(r) => assert_eq!(r.status, 201),
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(spec.mocks().len(), 2);
    }

    #[test]
    fn test_parse_json_spec() {
        let json = r#"{
            "config": {"httpPort": 9000, "controlPort": 9001},
            "http": [{"path": "/a", "queryPatterns": {"id": "[0-9]+"}}],
            "rest": [{"basePath": "/teams", "response": {"listEnvelopeKey": "data"}}]
        }"#;
        let spec: SpecFile = serde_json::from_str(json).unwrap();
        assert_eq!(spec.config.http_port, 9000);
        assert_eq!(spec.http[0].expect.queries["id"], "[0-9]+");
        assert_eq!(spec.rest[0].response.list_key, "data");
    }

    #[test]
    fn test_default_spec() {
        let spec = SpecFile::default();
        assert_eq!(spec.config, ServerSettings::default());
        assert_eq!(spec.http, vec![HttpMock::default()]);
        assert!(spec.rest.is_empty());
        assert_eq!(spec.config.http_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_empty_document_has_no_mocks() {
        let spec: SpecFile = serde_yaml::from_str("config: {}").unwrap();
        assert!(spec.mocks().is_empty());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<SpecFile, _> = serde_yaml::from_str("mocks: []");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file_yaml_and_json() {
        let yaml = write_spec(".yml", "http:\n  - path: /a\n");
        let spec = SpecFile::from_file(yaml.path()).unwrap();
        assert_eq!(spec.http.len(), 1);

        let json = write_spec(".json", r#"{"http": [{"path": "/a"}, {"path": "/b"}]}"#);
        let spec = SpecFile::from_file(json.path()).unwrap();
        assert_eq!(spec.http.len(), 2);
    }

    #[test]
    fn test_from_file_rejects_unknown_extension() {
        let file = write_spec(".toml", "http = []");
        let err = SpecFile::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported spec file extension"));
    }

    #[test]
    fn test_from_file_rejects_invalid_pattern() {
        let file = write_spec(".yaml", "http:\n  - path: /a\n    headers:\n      x-id: \"([0-9]\"\n");
        let err = SpecFile::from_file(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("http mock 0"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SpecFile::load_or_default(&dir.path().join("missing.yaml")).unwrap();
        assert_eq!(spec.http, vec![HttpMock::default()]);
    }

    #[test]
    fn test_settings_validation() {
        let settings = ServerSettings {
            control_port: 8080,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = ServerSettings {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = ServerSettings {
            host: "::1".to_string(),
            ..Default::default()
        };
        assert!(settings.control_addr().unwrap().is_ipv6());
    }
}
