//! REST collection handlers.

use crate::dispatch::{MockRequest, MockResponse, Outcome};
use crate::error::StoreError;
use crate::matcher::{RestOp, RestResource};
use crate::mock::Document;
use crate::store::ResourceStore;
use serde_json::Value;
use tracing::debug;

/// Run one REST operation against a resource. `id` is the identifier
/// segment captured by item routes.
pub fn handle(
    op: RestOp,
    resource: &RestResource,
    id: Option<&str>,
    request: &MockRequest,
) -> MockResponse {
    let settings = &resource.response;
    let store = &resource.store;

    let result: Result<(u16, Option<Value>), Failure> = match (op, id) {
        (RestOp::List, _) => {
            let objects: Vec<Value> = store
                .snapshot()
                .objects()
                .iter()
                .cloned()
                .map(Value::Object)
                .collect();
            let listing = if settings.list_key.is_empty() {
                Value::Array(objects)
            } else {
                let mut envelope = Document::new();
                envelope.insert(settings.list_key.clone(), Value::Array(objects));
                Value::Object(envelope)
            };
            Ok((settings.get_status, Some(listing)))
        }
        (RestOp::Create, _) => parse_object(request).and_then(|document| {
            let created = store.create(document)?;
            Ok((settings.post_status, Some(Value::Object(created))))
        }),
        (_, None) => Err(Failure::Store(StoreError::NotFound(String::new()))),
        (RestOp::Read, Some(id)) => store
            .snapshot()
            .get(id)
            .cloned()
            .map(|document| (settings.get_status, Some(Value::Object(document))))
            .ok_or_else(|| Failure::Store(StoreError::NotFound(id.to_string()))),
        (RestOp::Replace, Some(id)) => existing(store, id)
            .and_then(|()| parse_object(request))
            .and_then(|document| {
                let replaced = store.replace(id, document)?;
                Ok((settings.put_status, Some(Value::Object(replaced))))
            }),
        (RestOp::Update, Some(id)) => existing(store, id)
            .and_then(|()| parse_object(request))
            .and_then(|patch| {
                let updated = store.update(id, patch)?;
                Ok((settings.patch_status, Some(Value::Object(updated))))
            }),
        (RestOp::Delete, Some(id)) => store
            .delete(id)
            .map(|_| (settings.delete_status, None))
            .map_err(Failure::from),
    };

    match result {
        Ok((status, body)) => {
            let response = MockResponse::new(status).with_headers(&settings.headers);
            match body {
                Some(body) => response.with_json(&body),
                None => response,
            }
        }
        Err(failure) => {
            debug!(
                base_path = %resource.base_path,
                op = ?op,
                error = %failure,
                "REST operation rejected"
            );
            failure.into_response()
        }
    }
}

enum Failure {
    Store(StoreError),
    Body(String),
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        Failure::Store(e)
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Store(e) => std::fmt::Display::fmt(e, f),
            Failure::Body(msg) => f.write_str(msg),
        }
    }
}

impl Failure {
    fn into_response(self) -> MockResponse {
        match self {
            Failure::Store(e @ StoreError::NotFound(_)) => {
                MockResponse::error(404, Outcome::NotFound, "not_found", e.to_string())
            }
            Failure::Store(e @ StoreError::Conflict(_)) => {
                MockResponse::error(409, Outcome::Conflict, "conflict", e.to_string())
            }
            Failure::Body(msg) => MockResponse::error(400, Outcome::BadRequest, "bad_request", msg),
        }
    }
}

/// A missing item answers 404 before the body is looked at.
fn existing(store: &ResourceStore, id: &str) -> Result<(), Failure> {
    if store.snapshot().get(id).is_some() {
        Ok(())
    } else {
        Err(Failure::Store(StoreError::NotFound(id.to_string())))
    }
}

fn parse_object(request: &MockRequest) -> Result<Document, Failure> {
    match serde_json::from_slice::<Value>(&request.body) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(_) => Err(Failure::Body("request body must be a JSON object".to_string())),
        Err(e) => Err(Failure::Body(format!("request body is not valid JSON: {}", e))),
    }
}
