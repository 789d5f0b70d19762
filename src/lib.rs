//! Flax HTTP mock server
//!
//! Serves canned HTTP responses and in-memory RESTful collections from mock
//! definitions that can be loaded at startup or registered at runtime.
//!
//! # Features
//!
//! - **Request Matching**: Match by method, path (exact or prefix), query
//!   parameters and headers, all patterns full-match regular expressions
//! - **Static Responses**: Status, headers and a JSON body, with a delay
//! - **REST Collections**: List, create, read, replace, update and delete
//!   documents of an in-memory store
//! - **Runtime Registration**: Add or remove mocks through the control plane
//!   while requests are being served
//!
//! # Example Spec
//!
//! ```yaml
//! http:
//!   - methods: [POST]
//!     path: /echo
//!     response:
//!       status: 201
//!       body:
//!         ok: true
//! rest:
//!   - base_path: /api/v1/teams
//!     response:
//!       list_key: data
//!     store:
//!       objects:
//!         - _id: a
//!           name: X
//! ```

pub mod config;
pub mod control;
pub mod delay;
pub mod dispatch;
pub mod error;
pub mod hash;
pub mod matcher;
pub mod mock;
pub mod registry;
pub mod rest;
pub mod server;
pub mod store;

pub use config::{ServerSettings, SpecFile};
pub use control::ControlPlane;
pub use dispatch::{Dispatcher, Forwarder, MockRequest, MockResponse, Outcome};
pub use error::{ForwardError, RegistryError};
pub use mock::{HttpMock, Mock, RestMock};
pub use registry::MockRegistry;
