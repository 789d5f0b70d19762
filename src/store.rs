//! In-memory document store backing REST mocks.
//!
//! Every REST mock owns one [`ResourceStore`]. Its state is copy-on-write:
//! readers take an `Arc` snapshot without locking, writers are serialized,
//! build a new document list, re-index it wholesale and publish it. A
//! snapshot held by an in-flight request never changes underneath it.

use crate::error::StoreError;
use crate::mock::{Document, RestStore};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identifier fields tried, in order, when a store does not name one.
pub const IDENTIFIER_CANDIDATES: [&str; 4] = ["id", "Id", "ID", "_id"];

/// Identifier value -> position in the document list.
pub type StoreIndex = HashMap<String, usize>;

/// Render an identifier value as the string used in item paths.
///
/// Strings are used as-is; numbers and booleans use their JSON text. Null,
/// arrays and objects cannot identify a document.
pub fn identifier_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Find the identifier field and value of a document.
///
/// With a non-empty `hint` only that field is considered; otherwise the
/// first present candidate from [`IDENTIFIER_CANDIDATES`] wins.
pub fn find_identifier<'a>(hint: &'a str, document: &Document) -> Option<(&'a str, String)> {
    if !hint.is_empty() {
        return document
            .get(hint)
            .and_then(identifier_value)
            .map(|v| (hint, v));
    }

    IDENTIFIER_CANDIDATES.iter().find_map(|key| {
        document
            .get(*key)
            .and_then(identifier_value)
            .map(|v| (*key, v))
    })
}

/// Build the identifier index for a document list.
///
/// Documents without an identifier are left out of the index. When two
/// documents share an identifier value the later one takes the slot.
pub fn build_index(hint: &str, documents: &[Document]) -> StoreIndex {
    let mut index = StoreIndex::with_capacity(documents.len());

    for (position, document) in documents.iter().enumerate() {
        match find_identifier(hint, document) {
            Some((_, id)) => {
                if let Some(previous) = index.insert(id.clone(), position) {
                    warn!(
                        id = %id,
                        previous,
                        position,
                        "Duplicate identifier in store, later document wins"
                    );
                }
            }
            None => {
                debug!(
                    position,
                    identifier = %hint,
                    "Document has no identifier, excluded from index"
                );
            }
        }
    }

    index
}

/// Immutable view of a store.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    identifier: String,
    objects: Vec<Document>,
    index: StoreIndex,
}

impl StoreState {
    pub fn new(identifier: impl Into<String>, objects: Vec<Document>) -> Self {
        let identifier = identifier.into();
        let index = build_index(&identifier, &objects);
        Self {
            identifier,
            objects,
            index,
        }
    }

    /// All documents, including those without an identifier.
    pub fn objects(&self) -> &[Document] {
        &self.objects
    }

    pub fn index(&self) -> &StoreIndex {
        &self.index
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.index.get(id).map(|&pos| &self.objects[pos])
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Concurrency-safe, copy-on-write document store.
pub struct ResourceStore {
    state: ArcSwap<StoreState>,
    writer: Mutex<()>,
}

impl ResourceStore {
    pub fn new(identifier: impl Into<String>, objects: Vec<Document>) -> Self {
        Self {
            state: ArcSwap::from_pointee(StoreState::new(identifier, objects)),
            writer: Mutex::new(()),
        }
    }

    pub fn from_definition(store: &RestStore) -> Self {
        Self::new(store.identifier.clone(), store.objects.clone())
    }

    pub fn snapshot(&self) -> Arc<StoreState> {
        self.state.load_full()
    }

    /// Apply `f` to a private copy of the documents and publish the result.
    fn modify<T>(
        &self,
        f: impl FnOnce(&StoreState, &mut Vec<Document>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.writer.lock();
        let current = self.state.load_full();
        let mut objects = current.objects.clone();
        let out = f(&current, &mut objects)?;
        self.state
            .store(Arc::new(StoreState::new(current.identifier.clone(), objects)));
        Ok(out)
    }

    /// Add a document. One without an identifier gets a generated one.
    pub fn create(&self, mut document: Document) -> Result<Document, StoreError> {
        self.modify(|state, objects| {
            match find_identifier(&state.identifier, &document) {
                Some((_, id)) => {
                    if state.index.contains_key(&id) {
                        return Err(StoreError::Conflict(id));
                    }
                }
                None => {
                    let key = if state.identifier.is_empty() {
                        IDENTIFIER_CANDIDATES[0]
                    } else {
                        state.identifier.as_str()
                    };
                    let id = uuid::Uuid::new_v4().to_string();
                    document.insert(key.to_string(), Value::String(id));
                }
            }
            objects.push(document.clone());
            Ok(document)
        })
    }

    /// Replace a document wholesale, keeping its identifier.
    pub fn replace(&self, id: &str, mut document: Document) -> Result<Document, StoreError> {
        self.modify(|state, objects| {
            let position = *state
                .index
                .get(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let (key, value) = identifier_field(state, &objects[position]);
            for shadowing in shadowing_candidates(state, &key) {
                document.remove(*shadowing);
            }
            document.insert(key, value);
            objects[position] = document.clone();
            Ok(document)
        })
    }

    /// Merge top-level fields into a document. `null` removes a field; the
    /// identifier field is left untouched.
    pub fn update(&self, id: &str, patch: Document) -> Result<Document, StoreError> {
        self.modify(|state, objects| {
            let position = *state
                .index
                .get(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let (key, _) = identifier_field(state, &objects[position]);
            let shadowing = shadowing_candidates(state, &key);
            let document = &mut objects[position];
            for (field, value) in patch {
                if field == key || shadowing.iter().any(|c| *c == field) {
                    continue;
                }
                if value.is_null() {
                    document.remove(&field);
                } else {
                    document.insert(field, value);
                }
            }
            Ok(document.clone())
        })
    }

    pub fn delete(&self, id: &str) -> Result<Document, StoreError> {
        self.modify(|state, objects| {
            let position = *state
                .index
                .get(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            Ok(objects.remove(position))
        })
    }
}

/// The identifier field of an indexed document, with its original value.
fn identifier_field(state: &StoreState, document: &Document) -> (String, Value) {
    let key = match find_identifier(&state.identifier, document) {
        Some((key, _)) => key.to_string(),
        None => state.identifier.clone(),
    };
    let value = document.get(&key).cloned().unwrap_or(Value::Null);
    (key, value)
}

/// Candidate fields that would take precedence over `key` when the store
/// detects identifiers per document. Writes must not introduce them, or the
/// document would be re-indexed under a different value.
fn shadowing_candidates(state: &StoreState, key: &str) -> &'static [&'static str] {
    if !state.identifier.is_empty() {
        return &[];
    }
    match IDENTIFIER_CANDIDATES.iter().position(|c| *c == key) {
        Some(rank) => &IDENTIFIER_CANDIDATES[..rank],
        None => &[],
    }
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("state", &self.snapshot())
            .finish()
    }
}
