//! Mokkapi Mock API Server
//!
//! Serves synthetic HTTP endpoints declared in configuration: a path,
//! optional authentication, and one canned response per HTTP method.
//!
//! # Features
//!
//! - **Path Normalization**: Repeated, leading and trailing slashes are ignored
//! - **Authentication**: API key (`X-API-KEY`) or HTTP Basic per endpoint
//! - **Method Dispatch**: `405` with an `Allow` header for unconfigured methods
//! - **Content Negotiation**: JSON or XML content type chosen from `Accept`
//! - **Hot Reload**: Configuration changes are picked up without restart
//! - **Audit Trail**: Served requests and authentication failures are recorded
//!
//! # Example Configuration
//!
//! ```yaml
//! auth_profiles:
//!   - id: partner
//!     type: api_key
//!     key: ABC123
//!
//! endpoints:
//!   - id: users
//!     path: /api/users
//!     authentication: partner
//!     handlers:
//!       - id: list-users
//!         method: GET
//!         status: 200
//!         headers:
//!           Content-Type: application/json
//!         body: '[{"id": 1, "name": "Alice"}]'
//! ```

pub mod audit;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod materialize;
pub mod model;
pub mod path;
pub mod registry;
pub mod server;
pub mod store;

pub use config::{MockApiConfig, ServerSettings, WrongCredentialStatus};
pub use error::{ConfigurationError, ServeError};
pub use model::{AuthKind, AuthenticationProfile, HttpMethod, MockEndpoint, ResponseHandler};
pub use registry::{LiveRegistry, Registry};
pub use server::{MockRequest, MockServer};
pub use store::{ConfigStore, FileStore, MemoryStore};
