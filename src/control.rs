//! Control plane: register, list and remove mocks at runtime.
//!
//! | Method   | Path               | Body             |
//! |----------|--------------------|------------------|
//! | `GET`    | `/health`          |                  |
//! | `GET`    | `/v1/mocks`        |                  |
//! | `POST`   | `/v1/mocks/http`   | `[HttpMock, ..]` |
//! | `DELETE` | `/v1/mocks/http`   | `[HttpMock, ..]` |
//! | `POST`   | `/v1/mocks/rest`   | `[RestMock, ..]` |
//! | `DELETE` | `/v1/mocks/rest`   | `[RestMock, ..]` |
//! | `DELETE` | `/v1/mocks/{hash}` |                  |

use crate::dispatch::{Dispatcher, MockRequest, MockResponse, Outcome};
use crate::hash::{from_hex, to_hex};
use crate::mock::{normalize_path, HttpMock, Mock, RestMock};
use crate::registry::MockRegistry;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handles control requests against the registry a [`Dispatcher`] serves.
pub struct ControlPlane {
    dispatcher: Arc<Dispatcher>,
}

impl ControlPlane {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    fn registry(&self) -> &MockRegistry {
        self.dispatcher.registry()
    }

    pub async fn handle(&self, request: &MockRequest) -> MockResponse {
        let path = normalize_path(&request.path);
        let method = request.method.to_ascii_uppercase();
        debug!(method = %method, path = %path, "Control request");

        match (method.as_str(), path.as_str()) {
            ("GET", "/health") => self.health(),
            ("GET", "/v1/mocks") => self.list(),
            ("POST", "/v1/mocks/http") => self.add::<HttpMock>(request),
            ("DELETE", "/v1/mocks/http") => self.remove_all::<HttpMock>(request),
            ("POST", "/v1/mocks/rest") => self.add::<RestMock>(request),
            ("DELETE", "/v1/mocks/rest") => self.remove_all::<RestMock>(request),
            (_, "/health") | (_, "/v1/mocks") => method_not_allowed("GET"),
            (_, "/v1/mocks/http") | (_, "/v1/mocks/rest") => method_not_allowed("POST, DELETE"),
            (method, path) => match path.strip_prefix("/v1/mocks/").and_then(from_hex) {
                Some(hash) if method == "DELETE" => self.remove_one(hash),
                Some(_) => method_not_allowed("DELETE"),
                None => MockResponse::error(
                    404,
                    Outcome::NotFound,
                    "not_found",
                    format!("no control route {}", path),
                ),
            },
        }
    }

    fn health(&self) -> MockResponse {
        let stats = self.dispatcher.stats();
        MockResponse::new(200).with_json(&json!({
            "status": "ok",
            "mocks": self.registry().len(),
            "requests": {
                "total": stats.total(),
                "matched": stats.matched(),
                "unmatched": stats.unmatched(),
            }
        }))
    }

    /// REST entries show the documents currently stored, not the seed.
    fn list(&self) -> MockResponse {
        let mut http = Vec::new();
        let mut rest = Vec::new();
        let table = self.registry().snapshot();

        for (hash, mock) in self.registry().mocks() {
            let encoded = match &mock {
                Mock::Http(m) => serde_json::to_value(m),
                Mock::Rest(m) => {
                    let mut m = m.clone();
                    if let Some(resource) = table.rest_resource(hash) {
                        m.store.objects = resource.store.snapshot().objects().to_vec();
                    }
                    serde_json::to_value(&m)
                }
            };
            let mut entry = match encoded {
                Ok(Value::Object(entry)) => entry,
                Ok(_) => continue,
                Err(e) => {
                    warn!(hash = %to_hex(hash), error = %e, "Failed to encode mock");
                    continue;
                }
            };
            entry.insert("hash".to_string(), Value::String(to_hex(hash)));

            match mock {
                Mock::Http(_) => http.push(Value::Object(entry)),
                Mock::Rest(_) => rest.push(Value::Object(entry)),
            }
        }

        MockResponse::new(200).with_json(&json!({"http": http, "rest": rest}))
    }

    fn add<M>(&self, request: &MockRequest) -> MockResponse
    where
        M: DeserializeOwned + Into<Mock>,
    {
        let mocks = match decode::<M>(request) {
            Ok(mocks) => mocks,
            Err(response) => return response,
        };

        match self.registry().upsert_all(mocks) {
            Ok(hashes) => {
                let hashes: Vec<String> = hashes.into_iter().map(to_hex).collect();
                MockResponse::new(200).with_json(&json!({"hashes": hashes}))
            }
            Err(e) => {
                warn!(error = %e, "Rejected mock registration");
                MockResponse::error(422, Outcome::BadRequest, "invalid_mock", e.to_string())
            }
        }
    }

    fn remove_all<M>(&self, request: &MockRequest) -> MockResponse
    where
        M: DeserializeOwned + Into<Mock>,
    {
        let mocks = match decode::<M>(request) {
            Ok(mocks) => mocks,
            Err(response) => return response,
        };

        let removed = mocks
            .into_iter()
            .filter_map(|m| self.registry().remove_mock(&m.into()))
            .count();
        MockResponse::new(200).with_json(&json!({"removed": removed}))
    }

    fn remove_one(&self, hash: u64) -> MockResponse {
        match self.registry().remove(hash) {
            Some(_) => MockResponse::new(200).with_json(&json!({"removed": 1})),
            None => MockResponse::error(
                404,
                Outcome::NotFound,
                "not_found",
                format!("no mock with hash {}", to_hex(hash)),
            ),
        }
    }
}

fn decode<M: DeserializeOwned>(request: &MockRequest) -> Result<Vec<M>, MockResponse> {
    serde_json::from_slice::<Vec<M>>(&request.body).map_err(|e| {
        debug!(error = %e, "Undecodable control request body");
        MockResponse::error(
            400,
            Outcome::BadRequest,
            "bad_request",
            format!("expected a JSON array of mocks: {}", e),
        )
    })
}

fn method_not_allowed(allow: &str) -> MockResponse {
    MockResponse::error(
        405,
        Outcome::BadRequest,
        "method_not_allowed",
        format!("allowed methods: {}", allow),
    )
    .with_header("Allow", allow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> (ControlPlane, Arc<Dispatcher>) {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(MockRegistry::new())));
        (ControlPlane::new(Arc::clone(&dispatcher)), dispatcher)
    }

    fn post(path: &str, body: &'static str) -> MockRequest {
        MockRequest::new("POST", path).with_body(body)
    }

    #[tokio::test]
    async fn test_health() {
        let (control, _) = control();
        let response = control.handle(&MockRequest::new("GET", "/health")).await;
        assert_eq!(response.status, 200);
        let body = response.json().unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["mocks"], 0);
    }

    #[tokio::test]
    async fn test_add_http_mocks_then_serve() {
        let (control, dispatcher) = control();
        let response = control
            .handle(&post(
                "/v1/mocks/http",
                r#"[{"path": "/a", "response": {"status": 202}}, {"path": "/b"}]"#,
            ))
            .await;
        assert_eq!(response.status, 200);
        let hashes = response.json().unwrap()["hashes"].clone();
        assert_eq!(hashes.as_array().unwrap().len(), 2);

        let served = dispatcher.dispatch(&MockRequest::new("GET", "/a")).await;
        assert_eq!(served.status, 202);
    }

    #[tokio::test]
    async fn test_list_includes_hashes() {
        let (control, _) = control();
        control
            .handle(&post("/v1/mocks/http", r#"[{"path": "/a"}]"#))
            .await;
        control
            .handle(&post("/v1/mocks/rest", r#"[{"basePath": "/teams"}]"#))
            .await;

        let body = control
            .handle(&MockRequest::new("GET", "/v1/mocks"))
            .await
            .json()
            .unwrap();
        assert_eq!(body["http"][0]["path"], "/a");
        assert_eq!(body["http"][0]["hash"].as_str().unwrap().len(), 16);
        assert_eq!(body["rest"][0]["basePath"], "/teams");
    }

    #[tokio::test]
    async fn test_list_shows_current_documents() {
        let (control, dispatcher) = control();
        control
            .handle(&post(
                "/v1/mocks/rest",
                r#"[{"basePath": "/teams", "store": {"objects": [{"id": "a"}, {"id": "b"}]}}]"#,
            ))
            .await;

        dispatcher
            .dispatch(&MockRequest::new("POST", "/teams").with_body(r#"{"id": "c"}"#))
            .await;
        dispatcher
            .dispatch(&MockRequest::new("DELETE", "/teams/a"))
            .await;

        let body = control
            .handle(&MockRequest::new("GET", "/v1/mocks"))
            .await
            .json()
            .unwrap();
        assert_eq!(
            body["rest"][0]["store"]["objects"],
            json!([{"id": "b"}, {"id": "c"}])
        );
    }

    #[tokio::test]
    async fn test_remove_by_definition_and_hash() {
        let (control, dispatcher) = control();
        let response = control
            .handle(&post("/v1/mocks/http", r#"[{"path": "/a"}, {"path": "/b"}]"#))
            .await;
        let body = response.json().unwrap();
        let second = body["hashes"][1].as_str().unwrap().to_string();

        let response = control
            .handle(&MockRequest::new("DELETE", "/v1/mocks/http").with_body(r#"[{"path": "/a/"}]"#))
            .await;
        assert_eq!(response.json().unwrap()["removed"], 1);

        let response = control
            .handle(&MockRequest::new("DELETE", format!("/v1/mocks/{}", second)))
            .await;
        assert_eq!(response.status, 200);
        assert!(dispatcher.registry().is_empty());

        let response = control
            .handle(&MockRequest::new("DELETE", format!("/v1/mocks/{}", second)))
            .await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_bad_bodies() {
        let (control, dispatcher) = control();
        let response = control.handle(&post("/v1/mocks/http", "{not json")).await;
        assert_eq!(response.status, 400);

        let response = control
            .handle(&post("/v1/mocks/http", r#"{"path": "/a"}"#))
            .await;
        assert_eq!(response.status, 400);

        let response = control
            .handle(&post(
                "/v1/mocks/http",
                r#"[{"path": "/ok"}, {"path": "/a", "queries": {"q": "("}}]"#,
            ))
            .await;
        assert_eq!(response.status, 422);
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route_and_wrong_verb() {
        let (control, _) = control();
        let response = control.handle(&MockRequest::new("GET", "/nope")).await;
        assert_eq!(response.status, 404);

        let response = control.handle(&MockRequest::new("PUT", "/v1/mocks/http")).await;
        assert_eq!(response.status, 405);
        assert_eq!(response.header("allow"), Some("POST, DELETE"));

        let response = control
            .handle(&MockRequest::new("GET", "/v1/mocks/00000000000000ff"))
            .await;
        assert_eq!(response.status, 405);
    }
}
