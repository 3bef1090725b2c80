//! Static path rewrite table mapping external mounts to services

use serde::Serialize;

/// One external mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    /// External path prefix, e.g. `/api/users`
    pub prefix: String,
    /// Logical service the mount forwards to
    pub service: String,
    /// Internal prefix substituted for `prefix`, e.g. `/users`
    pub rewrite: String,
}

impl Route {
    /// Create a new route
    pub fn new(
        prefix: impl Into<String>,
        service: impl Into<String>,
        rewrite: impl Into<String>,
    ) -> Self {
        Self {
            prefix: normalize(prefix.into()),
            service: service.into(),
            rewrite: normalize(rewrite.into()),
        }
    }

    /// Remainder of `path` after this route's prefix, if the prefix matches
    /// on a segment boundary
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.prefix == "/" {
            return Some(path);
        }
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    fn rewrite_path(&self, rest: &str) -> String {
        match (self.rewrite.as_str(), rest) {
            ("/", "") => "/".to_string(),
            ("/", rest) => rest.to_string(),
            (base, rest) => format!("{}{}", base, rest),
        }
    }
}

fn normalize(mut prefix: String) -> String {
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.len() > 1 && prefix.ends_with('/') {
        prefix.pop();
    }
    prefix
}

/// Result of resolving an inbound path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    /// Matched mount
    pub route: &'a Route,
    /// Path to request on the service
    pub upstream_path: String,
}

impl RouteMatch<'_> {
    /// Logical service name
    pub fn service(&self) -> &str {
        &self.route.service
    }

    /// Upstream path with the inbound query string reattached
    pub fn path_and_query(&self, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.upstream_path, q),
            _ => self.upstream_path.clone(),
        }
    }
}

/// Longest-prefix route table
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Build a table; longer prefixes win over shorter ones
    pub fn new(mut routes: Vec<Route>) -> Self {
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { routes }
    }

    /// Mounts for the user, item and list services
    pub fn default_routes() -> Vec<Route> {
        vec![
            Route::new("/api/auth", "user-service", "/auth"),
            Route::new("/api/users", "user-service", "/users"),
            Route::new("/api/items", "item-service", "/items"),
            Route::new("/api/lists", "list-service", "/lists"),
        ]
    }

    /// Resolve an inbound path to a service and rewritten path
    pub fn resolve(&self, path: &str) -> Option<RouteMatch<'_>> {
        self.routes.iter().find_map(|route| {
            route.strip(path).map(|rest| RouteMatch {
                route,
                upstream_path: route.rewrite_path(rest),
            })
        })
    }

    /// All mounts, longest prefix first
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Distinct service names referenced by the table
    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.iter().map(|r| r.service.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(RouteTable::default_routes())
    }

    #[test]
    fn test_rewrites_prefix() {
        let table = table();

        let m = table.resolve("/api/users/42").unwrap();
        assert_eq!(m.service(), "user-service");
        assert_eq!(m.upstream_path, "/users/42");

        let m = table.resolve("/api/auth/login").unwrap();
        assert_eq!(m.service(), "user-service");
        assert_eq!(m.upstream_path, "/auth/login");

        let m = table.resolve("/api/items").unwrap();
        assert_eq!(m.upstream_path, "/items");
    }

    #[test]
    fn test_segment_boundary() {
        let table = table();
        assert!(table.resolve("/api/itemsx").is_none());
        assert!(table.resolve("/api").is_none());
        assert!(table.resolve("/health").is_none());
        assert_eq!(
            table.resolve("/api/lists/").unwrap().upstream_path,
            "/lists/"
        );
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = RouteTable::new(vec![
            Route::new("/api", "catch-all", "/"),
            Route::new("/api/items/", "item-service", "items"),
        ]);

        let m = table.resolve("/api/items/7").unwrap();
        assert_eq!(m.service(), "item-service");
        assert_eq!(m.upstream_path, "/items/7");

        let m = table.resolve("/api/other").unwrap();
        assert_eq!(m.service(), "catch-all");
        assert_eq!(m.upstream_path, "/other");

        assert_eq!(table.resolve("/api").unwrap().upstream_path, "/");
    }

    #[test]
    fn test_query_reattached() {
        let table = table();
        let m = table.resolve("/api/items").unwrap();
        assert_eq!(m.path_and_query(Some("page=2&q=milk")), "/items?page=2&q=milk");
        assert_eq!(m.path_and_query(Some("")), "/items");
        assert_eq!(m.path_and_query(None), "/items");
    }

    #[test]
    fn test_services() {
        assert_eq!(
            table().services(),
            vec!["item-service", "list-service", "user-service"]
        );
    }
}
