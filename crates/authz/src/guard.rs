//! Ordered request guards evaluated before every protected route.
//!
//! A [`GuardChain`] runs its guards in order over a normalized
//! [`RequestContext`]. Each guard either lets the request continue to the
//! next guard, permits it outright, or rejects it with an [`AccessError`].
//!
//! The standard chain is:
//!
//! 1. [`PublicRoutes`]: permits public routes without a token
//! 2. [`BearerAuthentication`]: resolves the `Authorization` header
//! 3. [`RoleGate`]: enforces the route table's role requirement

use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderMap, Method, header::AUTHORIZATION};
use labgate_authn::Authenticator;

use crate::{
    error::{AccessError, Result},
    policy::{RouteAccess, RoutePolicy, normalize_path},
    principal::Principal,
};

/// Method, path and headers of an inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// HTTP method.
    pub method: Method,
    /// Request path in [`normalize_path`] form.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RequestContext {
    /// A request with no headers. The path is normalized here, so every
    /// guard sees the route that will actually be served.
    pub fn new(method: Method, path: impl AsRef<str>) -> Self {
        Self { method, path: normalize_path(path.as_ref()), headers: HeaderMap::new() }
    }

    /// Sets the `Authorization` header. Values that are not valid header
    /// text are dropped.
    #[must_use]
    pub fn with_authorization(mut self, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers.insert(AUTHORIZATION, value);
        }
        self
    }

    /// The `Authorization` header, if present and valid UTF-8.
    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
    }
}

/// State threaded through the guards of one request.
#[derive(Debug, Default)]
pub struct GuardState {
    /// Set once a guard has authenticated the caller.
    pub principal: Option<Principal>,
}

/// What a guard decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Run the next guard.
    Continue,
    /// Allow the request without running the remaining guards.
    Permit,
}

/// A single request interceptor.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Inspects `request`, possibly recording results in `state`.
    async fn check(
        &self,
        request: &RequestContext,
        state: &mut GuardState,
    ) -> Result<GuardOutcome>;
}

/// Permits routes the policy marks as public.
#[derive(Debug, Clone)]
pub struct PublicRoutes {
    policy: Arc<RoutePolicy>,
}

impl PublicRoutes {
    /// Creates the guard over `policy`.
    pub fn new(policy: Arc<RoutePolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Guard for PublicRoutes {
    async fn check(
        &self,
        request: &RequestContext,
        _state: &mut GuardState,
    ) -> Result<GuardOutcome> {
        if self.policy.classify(&request.method, &request.path) == RouteAccess::Public {
            tracing::debug!(path = %request.path, "public route");
            return Ok(GuardOutcome::Permit);
        }
        Ok(GuardOutcome::Continue)
    }
}

/// Resolves the bearer header to a principal, or rejects with 401.
#[derive(Debug, Clone)]
pub struct BearerAuthentication {
    authenticator: Authenticator,
}

impl BearerAuthentication {
    /// Creates the guard.
    pub fn new(authenticator: Authenticator) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl Guard for BearerAuthentication {
    async fn check(
        &self,
        request: &RequestContext,
        state: &mut GuardState,
    ) -> Result<GuardOutcome> {
        let identity = self
            .authenticator
            .authenticate(request.authorization())
            .await
            .ok_or_else(AccessError::unauthenticated)?;
        state.principal = Some(Principal::new(identity));
        Ok(GuardOutcome::Continue)
    }
}

/// Enforces the role a route requires.
#[derive(Debug, Clone)]
pub struct RoleGate {
    policy: Arc<RoutePolicy>,
}

impl RoleGate {
    /// Creates the guard over `policy`.
    pub fn new(policy: Arc<RoutePolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Guard for RoleGate {
    async fn check(
        &self,
        request: &RequestContext,
        state: &mut GuardState,
    ) -> Result<GuardOutcome> {
        let RouteAccess::Role(role) = self.policy.classify(&request.method, &request.path) else {
            return Ok(GuardOutcome::Continue);
        };
        let principal = state.principal.as_ref().ok_or_else(AccessError::unauthenticated)?;
        if !principal.has_role(role) {
            tracing::warn!(user_id = %principal.id(), %role, path = %request.path, "route denied");
            return Err(AccessError::forbidden(format!("role {role} required")));
        }
        Ok(GuardOutcome::Continue)
    }
}

/// An ordered list of guards.
#[derive(Default)]
pub struct GuardChain {
    guards: Vec<Box<dyn Guard>>,
}

impl std::fmt::Debug for GuardChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardChain").field("guards", &self.guards.len()).finish()
    }
}

impl GuardChain {
    /// An empty chain, which permits everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Public routes, then bearer authentication, then the role gate.
    #[must_use]
    pub fn standard(authenticator: Authenticator, policy: RoutePolicy) -> Self {
        let policy = Arc::new(policy);
        Self::new()
            .with_guard(PublicRoutes::new(Arc::clone(&policy)))
            .with_guard(BearerAuthentication::new(authenticator))
            .with_guard(RoleGate::new(policy))
    }

    /// Appends a guard.
    #[must_use]
    pub fn with_guard(mut self, guard: impl Guard + 'static) -> Self {
        self.guards.push(Box::new(guard));
        self
    }

    /// Runs the guards in order.
    ///
    /// Returns the authenticated principal, or `None` for a request
    /// permitted before any guard authenticated it.
    ///
    /// # Errors
    ///
    /// Returns the first guard's rejection.
    #[tracing::instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn check(&self, request: &RequestContext) -> Result<Option<Principal>> {
        let mut state = GuardState::default();
        for guard in &self.guards {
            match guard.check(request, &mut state).await? {
                GuardOutcome::Continue => {},
                GuardOutcome::Permit => break,
            }
        }
        Ok(state.principal)
    }
}
