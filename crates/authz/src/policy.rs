//! Static access policy: which role each route and operation class needs,
//! and which lab relation an operation demands.

use std::fmt;

use http::Method;
use labgate_storage::RoleName;

/// Coarse operation classes, each mapped to at most one required role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Creating and managing labs, their members and their sub-accounts.
    LabAdministration,
    /// Platform-wide operations across every tenant.
    CrossTenant,
    /// Day-to-day work inside a lab. Gated by relation only.
    LabOperation,
}

impl OperationClass {
    /// The role an identity must hold, if any.
    #[must_use]
    pub const fn required_role(self) -> Option<RoleName> {
        match self {
            Self::LabAdministration => Some(RoleName::Admin),
            Self::CrossTenant => Some(RoleName::SuperAdmin),
            Self::LabOperation => None,
        }
    }
}

/// The relation to a lab an operation demands.
///
/// The creator satisfies [`Relation::Member`] as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// Only the lab's creator. Required for deletion, updates, and
    /// membership or role mutations.
    Creator,
    /// The creator or any member. Sufficient for reads and operational
    /// writes on lab-scoped resources.
    Member,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creator => f.write_str("creator"),
            Self::Member => f.write_str("member"),
        }
    }
}

/// What a route requires before its handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    /// No token needed.
    Public,
    /// Any authenticated identity.
    Authenticated,
    /// An authenticated identity holding this role.
    Role(RoleName),
}

/// Ordered route table. The first matching role rule wins.
///
/// Patterns are either exact paths (`/error`) or prefixes ending in `/**`,
/// which match the prefix itself and everything below it. Paths are run
/// through [`normalize_path`] before matching.
///
/// # Examples
///
/// ```
/// use http::Method;
/// use labgate_authz::policy::{RouteAccess, RoutePolicy};
/// use labgate_storage::RoleName;
///
/// let policy = RoutePolicy::default();
/// assert_eq!(policy.classify(&Method::POST, "/login"), RouteAccess::Public);
/// assert_eq!(
///     policy.classify(&Method::GET, "/lab/admin/get-labs"),
///     RouteAccess::Role(RoleName::Admin)
/// );
/// assert_eq!(policy.classify(&Method::GET, "/profile"), RouteAccess::Authenticated);
/// ```
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    public: Vec<String>,
    rules: Vec<(String, RoleName)>,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self::empty()
            .with_public("/login/**")
            .with_public("/register/**")
            .with_public("/public/**")
            .with_public("/error")
            .with_public("/v3/api-docs/**")
            .with_public("/doc/**")
            .with_public("/swagger-ui/**")
            .with_public("/swagger-ui.html")
            .with_role("/admin/**", RoleName::Admin)
            .with_role("/lab/**", RoleName::Admin)
            .with_role("/lab-super-admin/**", RoleName::SuperAdmin)
            .with_role("/api/v1/lab-super-admin/**", RoleName::SuperAdmin)
    }
}

impl RoutePolicy {
    /// A table where every route only needs authentication.
    #[must_use]
    pub fn empty() -> Self {
        Self { public: Vec::new(), rules: Vec::new() }
    }

    /// Adds a pattern reachable without a token.
    #[must_use]
    pub fn with_public(mut self, pattern: impl Into<String>) -> Self {
        self.public.push(pattern.into());
        self
    }

    /// Adds a pattern that requires `role`.
    #[must_use]
    pub fn with_role(mut self, pattern: impl Into<String>, role: RoleName) -> Self {
        self.rules.push((pattern.into(), role));
        self
    }

    /// Classifies a request. `OPTIONS` preflight is always public.
    #[must_use]
    pub fn classify(&self, method: &Method, path: &str) -> RouteAccess {
        let path = normalize_path(path);
        if *method == Method::OPTIONS || self.public.iter().any(|p| pattern_matches(p, &path)) {
            return RouteAccess::Public;
        }
        self.rules
            .iter()
            .find(|(pattern, _)| pattern_matches(pattern, &path))
            .map_or(RouteAccess::Authenticated, |(_, role)| RouteAccess::Role(*role))
    }
}

/// Canonical form of a request path.
///
/// Drops the query string and fragment, collapses repeated `/`, removes `.`
/// segments and resolves `..` against the preceding segment. Dot segments
/// spelled with `%2e` count as dots. `..` never climbs above the root, and
/// the result always starts with `/` and never ends with one (except `/`
/// itself).
///
/// # Examples
///
/// ```
/// use labgate_authz::policy::normalize_path;
///
/// assert_eq!(normalize_path("/public/../admin/users"), "/admin/users");
/// assert_eq!(normalize_path("//lab/./admin/?id=3"), "/lab/admin");
/// ```
#[must_use]
pub fn normalize_path(raw: &str) -> String {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw[..end].split('/') {
        match decode_dots(segment).as_deref() {
            Some("" | ".") => {},
            Some("..") => {
                segments.pop();
            },
            _ => segments.push(segment),
        }
    }
    format!("/{}", segments.join("/"))
}

/// `Some` with `%2e` decoded if the segment is empty or made only of dots.
fn decode_dots(segment: &str) -> Option<String> {
    let decoded = segment.replace("%2e", ".").replace("%2E", ".");
    decoded.chars().all(|c| c == '.').then_some(decoded)
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix("/**") {
        Some(prefix) => {
            path == prefix
                || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
        },
        None => path == pattern,
    }
}
