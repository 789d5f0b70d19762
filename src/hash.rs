//! Canonical mock identity.
//!
//! Expectations are hashed over a canonical byte sequence: sets and maps are
//! sorted first, every field is terminated by a zero byte, and a kind tag
//! opens the sequence. XXH3 keeps the result stable across runs and
//! platforms, so a hash printed by one process can address the same mock in
//! another.

use crate::mock::{HttpExpect, RestExpect};
use std::collections::HashMap;
use xxhash_rust::xxh3::Xxh3;

const SEPARATOR: [u8; 1] = [0];

struct CanonicalHasher {
    inner: Xxh3,
}

impl CanonicalHasher {
    fn new(kind: &str) -> Self {
        let mut hasher = Self { inner: Xxh3::new() };
        hasher.write_str(kind);
        hasher
    }

    fn write_str(&mut self, s: &str) {
        self.inner.update(s.as_bytes());
        self.inner.update(&SEPARATOR);
    }

    fn write_bool(&mut self, b: bool) {
        self.write_str(if b { "true" } else { "false" });
    }

    /// Order-independent: items are sorted before writing.
    fn write_set<'a>(&mut self, items: impl IntoIterator<Item = &'a String>) {
        let mut sorted: Vec<String> = items
            .into_iter()
            .map(|s| s.to_ascii_uppercase())
            .collect();
        sorted.sort();
        self.write_str(&sorted.len().to_string());
        for item in &sorted {
            self.write_str(item);
        }
    }

    /// Order-independent: entries are sorted by key before writing.
    fn write_map(&mut self, map: &HashMap<String, String>, fold_keys: bool) {
        let mut entries: Vec<(String, &str)> = map
            .iter()
            .map(|(k, v)| {
                let key = if fold_keys {
                    k.to_ascii_lowercase()
                } else {
                    k.clone()
                };
                (key, v.as_str())
            })
            .collect();
        entries.sort();
        self.write_str(&entries.len().to_string());
        for (key, value) in &entries {
            self.write_str(key);
            self.write_str(value);
        }
    }

    fn finish(&self) -> u64 {
        self.inner.digest()
    }
}

/// Identity of an HTTP expectation. Only match criteria participate.
pub fn http_expectation(expect: &HttpExpect) -> u64 {
    let mut h = CanonicalHasher::new("http");
    h.write_set(&expect.methods);
    h.write_str(&expect.path);
    h.write_bool(expect.prefix);
    h.write_map(&expect.queries, false);
    h.write_map(&expect.headers, true);
    h.finish()
}

/// Identity of a REST expectation: base path and header constraints.
pub fn rest_expectation(expect: &RestExpect) -> u64 {
    let mut h = CanonicalHasher::new("rest");
    h.write_str(&expect.base_path);
    h.write_map(&expect.headers, true);
    h.finish()
}

/// Render a hash the way the control plane exposes it.
pub fn to_hex(hash: u64) -> String {
    format!("{:016x}", hash)
}

/// Parse a hash rendered by [`to_hex`].
pub fn from_hex(s: &str) -> Option<u64> {
    if s.len() != 16 {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{HttpAction, HttpMock, HttpResponse};
    use serde_json::json;

    fn expect(methods: &[&str], path: &str, headers: &[(&str, &str)]) -> HttpExpect {
        HttpExpect {
            methods: methods.iter().map(|m| m.to_string()).collect(),
            path: path.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
        .resolve()
    }

    #[test]
    fn test_order_independence() {
        let a = expect(&["GET", "POST"], "/x", &[("A", "x"), ("B", "y")]);
        let b = expect(&["POST", "GET"], "/x", &[("B", "y"), ("A", "x")]);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_order_independence_unresolved() {
        let a = HttpExpect {
            methods: vec!["get".into(), "POST".into()],
            path: "/x".into(),
            ..Default::default()
        };
        let b = HttpExpect {
            methods: vec!["POST".into(), "GET".into()],
            path: "/x".into(),
            ..Default::default()
        };
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_sensitivity() {
        let base = expect(&["GET"], "/x", &[("A", "x")]);
        assert_ne!(base.hash(), expect(&["GET"], "/y", &[("A", "x")]).hash());
        assert_ne!(base.hash(), expect(&["GET"], "/x", &[("A", "z")]).hash());
        assert_ne!(base.hash(), expect(&["PUT"], "/x", &[("A", "x")]).hash());

        let mut prefixed = base.clone();
        prefixed.prefix = true;
        assert_ne!(base.hash(), prefixed.hash());

        let mut with_query = base.clone();
        with_query
            .queries
            .insert("id".to_string(), "[0-9]+".to_string());
        assert_ne!(base.hash(), with_query.hash());

        let mut other_query = with_query.clone();
        other_query
            .queries
            .insert("id".to_string(), "[a-z]+".to_string());
        assert_ne!(with_query.hash(), other_query.hash());
    }

    #[test]
    fn test_action_does_not_participate() {
        let e = expect(&["GET"], "/x", &[]);
        let a = HttpMock {
            expect: e.clone(),
            action: HttpAction::Respond(HttpResponse {
                status: 200,
                ..Default::default()
            }),
        };
        let b = HttpMock {
            expect: e,
            action: HttpAction::Respond(HttpResponse {
                status: 503,
                body: Some(json!({"down": true})),
                delay: crate::delay::Delay::from_millis(500),
                ..Default::default()
            }),
        };
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_fields_do_not_alias() {
        let a = expect(&["GET"], "/x", &[("ab", "c")]);
        let b = expect(&["GET"], "/x", &[("a", "bc")]);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_header_names_case_insensitive() {
        let a = HttpExpect {
            path: "/x".into(),
            headers: [("X-Token".to_string(), "t".to_string())].into(),
            ..Default::default()
        };
        let b = HttpExpect {
            path: "/x".into(),
            headers: [("x-token".to_string(), "t".to_string())].into(),
            ..Default::default()
        };
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_rest_hash() {
        let a = RestExpect {
            base_path: "/teams".into(),
            headers: HashMap::new(),
        };
        let mut b = a.clone();
        b.headers.insert("auth".into(), ".*".into());
        assert_ne!(a.hash(), b.hash());

        let http = expect(&["GET"], "/teams", &[]);
        assert_ne!(a.hash(), http.hash());
    }

    #[test]
    fn test_hex_rendering() {
        let e = expect(&["GET"], "/stable", &[]);
        let hex = to_hex(e.hash());
        assert_eq!(hex.len(), 16);
        assert_eq!(from_hex(&hex), Some(e.hash()));
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert_eq!(from_hex("xyz"), None);
        assert_eq!(from_hex("00000000000000zz"), None);
    }
}
