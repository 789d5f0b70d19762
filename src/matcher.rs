//! Request matching logic.
//!
//! Mocks are compiled into [`Route`]s, and a [`RouteTable`] answers which
//! route (if any) should serve an incoming request.

use crate::dispatch::MockRequest;
use crate::error::{PatternKind, RegistryError};
use crate::mock::{normalize_path, HttpAction, HttpForward, HttpResponse, Mock, RestResponse};
use crate::store::ResourceStore;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// How a route's path is compared with the request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatcher {
    /// The whole path must be equal
    Exact(String),
    /// Segment-aligned prefix: `/a` matches `/a` and `/a/b`, not `/ab`
    Prefix(String),
    /// Base path plus exactly one identifier segment
    Item(String),
}

impl PathMatcher {
    /// Returns `None` when the path does not match, otherwise the captured
    /// identifier segment for item paths.
    fn matches(&self, path: &str) -> Option<Option<String>> {
        match self {
            PathMatcher::Exact(value) => (path == value).then_some(None),
            PathMatcher::Prefix(value) => {
                let aligned = value == "/"
                    || path == value
                    || path
                        .strip_prefix(value.as_str())
                        .is_some_and(|rest| rest.starts_with('/'));
                aligned.then_some(None)
            }
            PathMatcher::Item(base) => {
                let segment = match base.as_str() {
                    "/" => path.strip_prefix('/'),
                    base => path.strip_prefix(base).and_then(|r| r.strip_prefix('/')),
                }?;
                is_identifier_segment(segment).then(|| Some(segment.to_string()))
            }
        }
    }

    fn is_exact(&self) -> bool {
        !matches!(self, PathMatcher::Prefix(_))
    }
}

fn is_identifier_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'))
}

/// The operation a REST route performs on its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestOp {
    List,
    Create,
    Read,
    Replace,
    Update,
    Delete,
}

impl RestOp {
    fn method(&self) -> &'static str {
        match self {
            RestOp::List | RestOp::Read => "GET",
            RestOp::Create => "POST",
            RestOp::Replace => "PUT",
            RestOp::Update => "PATCH",
            RestOp::Delete => "DELETE",
        }
    }
}

/// State shared by the six routes of one REST mock.
#[derive(Debug)]
pub struct RestResource {
    pub base_path: String,
    pub response: RestResponse,
    pub store: ResourceStore,
}

/// What a route does once it matches.
#[derive(Debug, Clone)]
pub enum RouteAction {
    Respond(HttpResponse),
    Forward(HttpForward),
    Rest {
        op: RestOp,
        resource: Arc<RestResource>,
    },
}

/// A compiled, immutable matching rule.
#[derive(Debug)]
pub struct Route {
    /// Identity of the mock this route was compiled from
    pub hash: u64,
    /// Registration order; higher is more recent
    pub sequence: u64,
    /// Human-readable description of the owning mock
    pub label: String,
    methods: Vec<String>,
    path: PathMatcher,
    queries: Vec<(String, Regex)>,
    headers: Vec<(String, Regex)>,
    pub action: RouteAction,
}

fn compile_patterns(
    patterns: &HashMap<String, String>,
    kind: PatternKind,
) -> Result<Vec<(String, Regex)>, RegistryError> {
    let mut compiled = patterns
        .iter()
        .map(|(name, pattern)| {
            let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| {
                RegistryError::InvalidPattern {
                    kind,
                    name: name.clone(),
                    source,
                }
            })?;
            let name = match kind {
                PatternKind::Header => name.to_ascii_lowercase(),
                PatternKind::Query => name.clone(),
            };
            Ok((name, regex))
        })
        .collect::<Result<Vec<_>, RegistryError>>()?;
    compiled.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(compiled)
}

impl Route {
    /// Compile a resolved mock into its routes. Sequence numbers are left at
    /// zero for the registry to assign.
    pub fn compile(hash: u64, mock: &Mock) -> Result<Vec<Route>, RegistryError> {
        let label = mock.to_string();

        match mock {
            Mock::Http(http) => {
                let expect = &http.expect;
                let path = if expect.prefix {
                    PathMatcher::Prefix(expect.path.clone())
                } else {
                    PathMatcher::Exact(expect.path.clone())
                };
                let action = match &http.action {
                    HttpAction::Respond(r) => RouteAction::Respond(r.clone()),
                    HttpAction::Forward(f) => RouteAction::Forward(f.clone()),
                };
                Ok(vec![Route {
                    hash,
                    sequence: 0,
                    label,
                    methods: expect.methods.clone(),
                    path,
                    queries: compile_patterns(&expect.queries, PatternKind::Query)?,
                    headers: compile_patterns(&expect.headers, PatternKind::Header)?,
                    action,
                }])
            }
            Mock::Rest(rest) => {
                let headers = compile_patterns(&rest.expect.headers, PatternKind::Header)?;
                let base = rest.expect.base_path.clone();
                let resource = Arc::new(RestResource {
                    base_path: base.clone(),
                    response: rest.response.clone(),
                    store: ResourceStore::from_definition(&rest.store),
                });

                let routes = [
                    (RestOp::List, PathMatcher::Exact(base.clone())),
                    (RestOp::Create, PathMatcher::Exact(base.clone())),
                    (RestOp::Read, PathMatcher::Item(base.clone())),
                    (RestOp::Replace, PathMatcher::Item(base.clone())),
                    (RestOp::Update, PathMatcher::Item(base.clone())),
                    (RestOp::Delete, PathMatcher::Item(base)),
                ]
                .into_iter()
                .map(|(op, path)| Route {
                    hash,
                    sequence: 0,
                    label: label.clone(),
                    methods: vec![op.method().to_string()],
                    path,
                    queries: Vec::new(),
                    headers: headers.clone(),
                    action: RouteAction::Rest {
                        op,
                        resource: Arc::clone(&resource),
                    },
                })
                .collect();

                Ok(routes)
            }
        }
    }

    pub fn is_exact(&self) -> bool {
        self.path.is_exact()
    }

    fn matches(&self, request: &PreparedRequest<'_>) -> Option<Option<String>> {
        if !self.methods.iter().any(|m| m == request.method.as_str()) {
            return None;
        }

        let id = self.path.matches(&request.path)?;

        for (name, regex) in &self.queries {
            let value = request.query.get(name.as_str())?.first()?;
            if !regex.is_match(value) {
                return None;
            }
        }

        for (name, regex) in &self.headers {
            let value = request.headers.get(name.as_str())?.first()?;
            if !regex.is_match(value) {
                return None;
            }
        }

        Some(id)
    }
}

/// The route that won a match, with the identifier segment for REST items.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Arc<Route>,
    pub id: Option<String>,
}

/// Request fields normalized once per lookup.
struct PreparedRequest<'a> {
    method: String,
    path: String,
    query: HashMap<String, Vec<String>>,
    headers: HashMap<String, Vec<&'a str>>,
}

impl<'a> PreparedRequest<'a> {
    fn new(request: &'a MockRequest) -> Self {
        let mut headers: HashMap<String, Vec<&'a str>> = HashMap::new();
        for (name, value) in &request.headers {
            headers
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(value.as_str());
        }

        Self {
            method: request.method.to_ascii_uppercase(),
            path: normalize_path(&request.path),
            query: parse_query_string(request.query.as_deref().unwrap_or("")),
            headers,
        }
    }
}

/// Immutable, point-in-time set of routes, most recent first.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    pub fn new(mut routes: Vec<Arc<Route>>) -> Self {
        routes.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        Self { routes }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }

    /// The live REST resource registered under `hash`, if any.
    pub fn rest_resource(&self, hash: u64) -> Option<&Arc<RestResource>> {
        self.routes
            .iter()
            .filter(|route| route.hash == hash)
            .find_map(|route| match &route.action {
                RouteAction::Rest { resource, .. } => Some(resource),
                _ => None,
            })
    }

    /// Find the route that should serve a request.
    ///
    /// Exact paths beat prefix paths; among equals the most recently
    /// registered route wins.
    pub fn find(&self, request: &MockRequest) -> Option<RouteMatch<'_>> {
        let prepared = PreparedRequest::new(request);
        let mut fallback: Option<RouteMatch<'_>> = None;

        for route in &self.routes {
            let Some(id) = route.matches(&prepared) else {
                continue;
            };
            if route.is_exact() {
                return Some(RouteMatch { route, id });
            }
            if fallback.is_none() {
                fallback = Some(RouteMatch { route, id });
            }
        }

        fallback
    }
}

/// Parse a query string into name -> values, in order of appearance.
/// Matching only looks at the first value of each name.
pub fn parse_query_string(query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        params
            .entry(form_decode(key))
            .or_default()
            .push(form_decode(value));
    }

    params
}

fn form_decode(s: &str) -> String {
    let s = s.replace('+', " ");
    match urlencoding::decode(&s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s,
    }
}
