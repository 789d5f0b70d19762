//! Mock definitions and default resolution.
//!
//! A mock pairs an expectation (what a request must look like) with an
//! action (what to do when it matches). Definitions arrive partially filled
//! from spec files or the control plane; `resolve()` fills every optional
//! field with its policy default so hashing and matching never special-case
//! missing values.

use crate::delay::Delay;
use crate::hash;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// A JSON document held by a REST store.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Treat an explicit `null` the same as an absent field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Normalize a path: leading slash, no empty, `.` or `..` segments and no
/// trailing slash except for the root.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Fold header names to lowercase. Names that collide after folding keep
/// the entry whose original name sorts first.
fn lowercase_keys(map: HashMap<String, String>) -> HashMap<String, String> {
    let mut entries: Vec<(String, String)> = map.into_iter().collect();
    entries.sort();

    let mut folded = HashMap::with_capacity(entries.len());
    for (name, value) in entries {
        let lower = name.to_ascii_lowercase();
        if let Some(kept) = folded.get(&lower) {
            warn!(
                header = %name,
                kept = %kept,
                dropped = %value,
                "Header names differ only in case, keeping the first"
            );
            continue;
        }
        folded.insert(lower, value);
    }
    folded
}

/// Read a status code as any integer. Values that are not HTTP statuses
/// become 0 so `resolve()` substitutes the default.
fn lenient_status<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?.unwrap_or(0);
    match u16::try_from(raw) {
        Ok(status) if (100..=599).contains(&status) => Ok(status),
        _ => {
            if raw != 0 {
                warn!(status = raw, "Ignoring out-of-range status code, using default");
            }
            Ok(0)
        }
    }
}

fn status_or(status: u16, default: u16) -> u16 {
    if (100..=599).contains(&status) {
        status
    } else {
        default
    }
}

// ---------------------------------------------------------------------------
// HTTP mocks
// ---------------------------------------------------------------------------

/// What an incoming request must look like for an HTTP mock to answer it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpExpect {
    /// Accepted HTTP methods (empty = GET)
    #[serde(default, deserialize_with = "nullable")]
    pub methods: Vec<String>,

    /// Request path
    #[serde(default, deserialize_with = "nullable")]
    pub path: String,

    /// Match the path as a segment-aligned prefix
    #[serde(default)]
    pub prefix: bool,

    /// Query parameter name -> regex the value must fully match
    #[serde(default, alias = "queryPatterns", deserialize_with = "nullable")]
    pub queries: HashMap<String, String>,

    /// Header name -> regex the value must fully match
    #[serde(default, alias = "headerPatterns", deserialize_with = "nullable")]
    pub headers: HashMap<String, String>,
}

impl HttpExpect {
    pub fn resolve(mut self) -> Self {
        let mut methods: Vec<String> = self
            .methods
            .iter()
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        methods.sort();
        methods.dedup();
        if methods.is_empty() {
            methods.push("GET".to_string());
        }
        self.methods = methods;
        self.path = normalize_path(&self.path);
        self.headers = lowercase_keys(self.headers);
        self
    }

    /// Stable identity of this expectation.
    pub fn hash(&self) -> u64 {
        hash::http_expectation(self)
    }
}

/// A canned response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    #[serde(default)]
    pub delay: Delay,

    /// Status code (outside 100-599 resolves to 200)
    #[serde(
        default,
        alias = "statusCode",
        alias = "status_code",
        deserialize_with = "lenient_status"
    )]
    pub status: u16,

    #[serde(default, deserialize_with = "nullable")]
    pub headers: HashMap<String, String>,

    /// Response body, serialized as JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl HttpResponse {
    pub fn resolve(mut self) -> Self {
        self.status = status_or(self.status, 200);
        self
    }
}

/// Delegates a matched request to an upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpForward {
    #[serde(default)]
    pub delay: Delay,

    /// Target URL
    #[serde(default, deserialize_with = "nullable")]
    pub to: String,

    /// Headers merged into the forwarded request
    #[serde(default, deserialize_with = "nullable")]
    pub headers: HashMap<String, String>,
}

/// What an HTTP mock does once it matches.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpAction {
    Respond(HttpResponse),
    Forward(HttpForward),
}

impl Default for HttpAction {
    fn default() -> Self {
        HttpAction::Respond(HttpResponse::default())
    }
}

impl HttpAction {
    pub fn delay(&self) -> Delay {
        match self {
            HttpAction::Respond(r) => r.delay,
            HttpAction::Forward(f) => f.delay,
        }
    }
}

/// An HTTP mock: one expectation and exactly one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHttpMock", into = "RawHttpMock")]
pub struct HttpMock {
    pub expect: HttpExpect,
    pub action: HttpAction,
}

/// Wire shape of an [`HttpMock`]: expectation fields inline, then an
/// optional `response` or `forward` block.
#[derive(Serialize, Deserialize)]
struct RawHttpMock {
    #[serde(flatten)]
    expect: HttpExpect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response: Option<HttpResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    forward: Option<HttpForward>,
}

impl TryFrom<RawHttpMock> for HttpMock {
    type Error = String;

    fn try_from(raw: RawHttpMock) -> Result<Self, Self::Error> {
        let action = match (raw.response, raw.forward) {
            (Some(_), Some(_)) => {
                return Err("a mock cannot define both `response` and `forward`".to_string())
            }
            (Some(response), None) => HttpAction::Respond(response),
            (None, Some(forward)) => HttpAction::Forward(forward),
            (None, None) => HttpAction::default(),
        };
        Ok(HttpMock {
            expect: raw.expect,
            action,
        })
    }
}

impl From<HttpMock> for RawHttpMock {
    fn from(mock: HttpMock) -> Self {
        let (response, forward) = match mock.action {
            HttpAction::Respond(r) => (Some(r), None),
            HttpAction::Forward(f) => (None, Some(f)),
        };
        RawHttpMock {
            expect: mock.expect,
            response,
            forward,
        }
    }
}

impl Default for HttpMock {
    /// `GET /` answering 200 with no body.
    fn default() -> Self {
        HttpMock {
            expect: HttpExpect::default(),
            action: HttpAction::default(),
        }
        .resolve()
    }
}

impl HttpMock {
    pub fn resolve(self) -> Self {
        let action = match self.action {
            HttpAction::Respond(r) => HttpAction::Respond(r.resolve()),
            forward @ HttpAction::Forward(_) => forward,
        };
        HttpMock {
            expect: self.expect.resolve(),
            action,
        }
    }

    pub fn hash(&self) -> u64 {
        self.expect.hash()
    }
}

impl fmt::Display for HttpMock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.expect.methods.join("|"), self.expect.path)?;
        if self.expect.prefix {
            f.write_str("*")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// REST mocks
// ---------------------------------------------------------------------------

/// What an incoming request must look like for a REST mock to answer it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestExpect {
    #[serde(default, alias = "base_path", deserialize_with = "nullable")]
    pub base_path: String,

    #[serde(default, alias = "headerPatterns", deserialize_with = "nullable")]
    pub headers: HashMap<String, String>,
}

impl RestExpect {
    pub fn resolve(mut self) -> Self {
        self.base_path = normalize_path(&self.base_path);
        self.headers = lowercase_keys(self.headers);
        self
    }

    pub fn hash(&self) -> u64 {
        hash::rest_expectation(self)
    }
}

/// Per-verb responses for a REST collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestResponse {
    #[serde(default)]
    pub delay: Delay,

    #[serde(default, alias = "get_status", deserialize_with = "lenient_status")]
    pub get_status: u16,

    #[serde(default, alias = "post_status", deserialize_with = "lenient_status")]
    pub post_status: u16,

    #[serde(default, alias = "put_status", deserialize_with = "lenient_status")]
    pub put_status: u16,

    #[serde(default, alias = "patch_status", deserialize_with = "lenient_status")]
    pub patch_status: u16,

    #[serde(default, alias = "delete_status", deserialize_with = "lenient_status")]
    pub delete_status: u16,

    /// Headers shared by every REST response (empty = JSON content type)
    #[serde(default, deserialize_with = "nullable")]
    pub headers: HashMap<String, String>,

    /// Wrap listings in an object under this key (empty = bare array)
    #[serde(
        default,
        alias = "list_key",
        alias = "listEnvelopeKey",
        deserialize_with = "nullable"
    )]
    pub list_key: String,
}

impl RestResponse {
    pub fn resolve(mut self) -> Self {
        self.get_status = status_or(self.get_status, 200);
        self.post_status = status_or(self.post_status, 201);
        self.put_status = status_or(self.put_status, 200);
        self.patch_status = status_or(self.patch_status, 200);
        self.delete_status = status_or(self.delete_status, 204);
        if self.headers.is_empty() {
            self.headers
                .insert("Content-Type".to_string(), "application/json".to_string());
        }
        self
    }
}

/// Seed documents for a REST collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestStore {
    /// Identifier field (empty = detect per document)
    #[serde(default, deserialize_with = "nullable")]
    pub identifier: String,

    #[serde(default, deserialize_with = "nullable")]
    pub objects: Vec<Document>,
}

/// A RESTful collection mock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestMock {
    #[serde(flatten)]
    pub expect: RestExpect,

    #[serde(default)]
    pub response: RestResponse,

    #[serde(default)]
    pub store: RestStore,
}

impl RestMock {
    pub fn resolve(self) -> Self {
        RestMock {
            expect: self.expect.resolve(),
            response: self.response.resolve(),
            store: RestStore {
                identifier: self.store.identifier.trim().to_string(),
                objects: self.store.objects,
            },
        }
    }

    pub fn hash(&self) -> u64 {
        self.expect.hash()
    }
}

impl fmt::Display for RestMock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "REST {}", self.expect.base_path)
    }
}

// ---------------------------------------------------------------------------

/// Any mock the registry can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Mock {
    Http(HttpMock),
    Rest(RestMock),
}

impl Mock {
    pub fn resolve(self) -> Self {
        match self {
            Mock::Http(m) => Mock::Http(m.resolve()),
            Mock::Rest(m) => Mock::Rest(m.resolve()),
        }
    }

    pub fn hash(&self) -> u64 {
        match self {
            Mock::Http(m) => m.hash(),
            Mock::Rest(m) => m.hash(),
        }
    }
}

impl From<HttpMock> for Mock {
    fn from(m: HttpMock) -> Self {
        Mock::Http(m)
    }
}

impl From<RestMock> for Mock {
    fn from(m: RestMock) -> Self {
        Mock::Rest(m)
    }
}

impl fmt::Display for Mock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mock::Http(m) => fmt::Display::fmt(m, f),
            Mock::Rest(m) => fmt::Display::fmt(m, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("api/v1/"), "/api/v1");
        assert_eq!(normalize_path("//api//v1"), "/api/v1");
        assert_eq!(normalize_path("/api/./v1/../v2"), "/api/v2");
        assert_eq!(normalize_path("/../.."), "/");
    }

    #[test]
    fn test_http_expect_defaults() {
        let e = HttpExpect::default().resolve();
        assert_eq!(e.methods, vec!["GET"]);
        assert_eq!(e.path, "/");
        assert!(!e.prefix);
        assert!(e.queries.is_empty());
        assert!(e.headers.is_empty());
    }

    #[test]
    fn test_http_expect_methods_canonical() {
        let e = HttpExpect {
            methods: vec!["post".into(), "GET".into(), "Post".into()],
            ..Default::default()
        }
        .resolve();
        assert_eq!(e.methods, vec!["GET", "POST"]);
    }

    #[test]
    fn test_status_defaults() {
        let r = HttpResponse {
            status: 42,
            ..Default::default()
        }
        .resolve();
        assert_eq!(r.status, 200);

        let r = HttpResponse {
            status: 418,
            ..Default::default()
        }
        .resolve();
        assert_eq!(r.status, 418);

        let rest = RestResponse::default().resolve();
        assert_eq!(rest.get_status, 200);
        assert_eq!(rest.post_status, 201);
        assert_eq!(rest.put_status, 200);
        assert_eq!(rest.patch_status, 200);
        assert_eq!(rest.delete_status, 204);
        assert_eq!(
            rest.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn test_out_of_range_status_decodes_to_default() {
        let mock: HttpMock =
            serde_json::from_value(json!({"path": "/x", "response": {"status": -1}})).unwrap();
        match mock.resolve().action {
            HttpAction::Respond(r) => assert_eq!(r.status, 200),
            other => panic!("expected response, got {:?}", other),
        }

        let rest: RestMock = serde_json::from_value(json!({
            "basePath": "/t",
            "response": {"postStatus": 70000, "deleteStatus": 42, "getStatus": null, "putStatus": 202}
        }))
        .unwrap();
        let response = rest.resolve().response;
        assert_eq!(response.post_status, 201);
        assert_eq!(response.delete_status, 204);
        assert_eq!(response.get_status, 200);
        assert_eq!(response.put_status, 202);
    }

    #[test]
    fn test_huge_numeric_delay_decodes_to_zero() {
        let mock: HttpMock =
            serde_json::from_value(json!({"path": "/x", "response": {"delay": 1e30}})).unwrap();
        assert!(mock.action.delay().is_zero());
    }

    #[test]
    fn test_case_colliding_headers_resolve_deterministically() {
        let hashes: std::collections::HashSet<u64> = (0..32)
            .map(|_| {
                let e = HttpExpect {
                    path: "/x".into(),
                    headers: [
                        ("X-A".to_string(), "one".to_string()),
                        ("x-a".to_string(), "two".to_string()),
                    ]
                    .into(),
                    ..Default::default()
                }
                .resolve();
                assert_eq!(e.headers.len(), 1);
                assert_eq!(e.headers["x-a"], "one");
                e.hash()
            })
            .collect();
        assert_eq!(hashes.len(), 1);
    }

    #[test]
    fn test_resolve_idempotent() {
        let http: HttpMock = serde_json::from_value(json!({
            "methods": ["put", "get"],
            "path": "users//42/",
            "prefix": true,
            "headers": {"X-Token": "abc.*"},
            "response": {"status": 900, "delay": "nope", "body": {"ok": true}}
        }))
        .unwrap();
        let once = http.resolve();
        assert_eq!(once.clone().resolve(), once);

        let rest: RestMock = serde_json::from_value(json!({
            "basePath": "teams/",
            "response": {"postStatus": 1000},
            "store": {"objects": [{"id": 1}]}
        }))
        .unwrap();
        let once = rest.resolve();
        assert_eq!(once.clone().resolve(), once);
    }

    #[test]
    fn test_decode_http_mock_defaults_response() {
        let mock: HttpMock = serde_json::from_value(json!({"path": "/a"})).unwrap();
        assert_eq!(mock.action, HttpAction::Respond(HttpResponse::default()));
    }

    #[test]
    fn test_decode_http_mock_forward() {
        let mock: HttpMock = serde_yaml::from_str(
            r#"
methods: [GET]
path: /proxy
forward:
  delay: 20ms
  to: http://upstream:8080
  headers:
    X-Forwarded-By: flax
"#,
        )
        .unwrap();
        match mock.action {
            HttpAction::Forward(f) => {
                assert_eq!(f.to, "http://upstream:8080");
                assert_eq!(f.delay.duration(), Duration::from_millis(20));
            }
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_both_actions() {
        let result: Result<HttpMock, _> = serde_json::from_value(json!({
            "path": "/x",
            "response": {"status": 200},
            "forward": {"to": "http://localhost"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_null_maps() {
        let mock: HttpMock =
            serde_json::from_value(json!({"path": "/x", "queries": null, "headers": null}))
                .unwrap();
        assert!(mock.expect.queries.is_empty());
        assert!(mock.expect.headers.is_empty());
    }

    #[test]
    fn test_decode_rest_mock_yaml_names() {
        let mock: RestMock = serde_yaml::from_str(
            r#"
base_path: /api/v1/teams
headers:
  Authorization: Bearer .*
response:
  list_key: data
  delete_status: 200
store:
  identifier: _id
  objects:
    - _id: a
      name: X
"#,
        )
        .unwrap();
        let mock = mock.resolve();
        assert_eq!(mock.expect.base_path, "/api/v1/teams");
        assert!(mock.expect.headers.contains_key("authorization"));
        assert_eq!(mock.response.list_key, "data");
        assert_eq!(mock.response.delete_status, 200);
        assert_eq!(mock.store.identifier, "_id");
        assert_eq!(mock.store.objects.len(), 1);
    }

    #[test]
    fn test_http_mock_serialize_shape() {
        let mock = HttpMock::default();
        let value = serde_json::to_value(&mock).unwrap();
        assert_eq!(value["methods"], json!(["GET"]));
        assert_eq!(value["path"], "/");
        assert_eq!(value["response"]["status"], 200);
        assert!(value.get("forward").is_none());
    }

    #[test]
    fn test_display() {
        let mock = HttpMock {
            expect: HttpExpect {
                methods: vec!["GET".into(), "POST".into()],
                path: "/a".into(),
                prefix: true,
                ..Default::default()
            },
            action: HttpAction::default(),
        };
        assert_eq!(mock.to_string(), "GET|POST /a*");
    }
}
