//! # labgate authorization
//!
//! Decides whether an authenticated identity may touch a lab.
//!
//! This crate provides:
//! - **Authorization engine**: role gate plus creator/member relation gate
//! - **Lab gate**: the per-lab active/inactive kill switch
//! - **Guard chain**: ordered request interceptors over method, path and
//!   headers, driven by a static route table
//! - **Lab administration**: lab, membership, sub-account and role
//!   mutations, each authorized and audited
//! - **Access errors**: one taxonomy with a fixed status per kind
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use http::Method;
//! use labgate_authn::{AuthConfig, Authenticator, TokenService};
//! use labgate_authz::{GuardChain, RequestContext, RoutePolicy};
//! use labgate_storage::{Directory, MemoryBackend};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::load("labgate.toml")?;
//! let directory = Arc::new(Directory::new(MemoryBackend::new()));
//! let authenticator = Authenticator::new(Arc::new(TokenService::new(&config)?), directory);
//!
//! let chain = GuardChain::standard(authenticator, RoutePolicy::default());
//! let request = RequestContext::new(Method::GET, "/lab/admin/get-labs")
//!     .with_authorization("Bearer eyJ...");
//! match chain.check(&request).await {
//!     Ok(principal) => println!("allowed: {:?}", principal.map(|p| p.id())),
//!     Err(e) => println!("{} {}", e.status_code(), e),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Lab, membership and role administration.
pub mod admin;
/// Authorization decisions.
pub mod engine;
/// Access error taxonomy.
pub mod error;
/// Request guards.
pub mod guard;
/// Lab accessibility gate.
pub mod lab_gate;
/// Route table, operation classes and relations.
pub mod policy;
/// The authenticated caller.
pub mod principal;
/// Shared test fixtures.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

pub use admin::LabAdministration;
pub use engine::AuthorizationEngine;
pub use error::{AccessError, ErrorBody, Result, UNAUTHENTICATED_MESSAGE};
pub use guard::{
    BearerAuthentication, Guard, GuardChain, GuardOutcome, GuardState, PublicRoutes,
    RequestContext, RoleGate,
};
pub use lab_gate::LabGate;
pub use policy::{OperationClass, Relation, RouteAccess, RoutePolicy};
pub use principal::Principal;
