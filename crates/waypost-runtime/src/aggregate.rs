//! Fan-out endpoints that combine data from several services

use bytes::Bytes;
use http::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use http::Request;
use http_body_util::Full;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use waypost_proxy::{HttpClient, HttpProxy};
use waypost_registry::ServiceRegistry;

/// One upstream read within a fan-out
#[derive(Debug, Clone)]
struct Fetch {
    slot: &'static str,
    service: &'static str,
    path_and_query: String,
    authorization: Option<HeaderValue>,
}

/// Reads from several services concurrently; a failing service yields
/// `None` for its slot instead of failing the whole call.
#[derive(Debug, Clone)]
pub struct Aggregator {
    registry: Arc<ServiceRegistry>,
    client: HttpClient,
    timeout: Duration,
}

impl Aggregator {
    /// Create an aggregator whose per-service reads are bounded by `timeout`
    pub fn new(registry: Arc<ServiceRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            client: HttpClient::with_timeout(timeout),
            timeout,
        }
    }

    /// Profile, recent items and lists of the caller
    pub async fn dashboard(&self, authorization: HeaderValue) -> Value {
        let mut results = self
            .fan_out(vec![
                Fetch {
                    slot: "user",
                    service: "user-service",
                    path_and_query: "/users".to_string(),
                    authorization: Some(authorization.clone()),
                },
                Fetch {
                    slot: "recentItems",
                    service: "item-service",
                    path_and_query: "/items?limit=5".to_string(),
                    authorization: None,
                },
                Fetch {
                    slot: "userLists",
                    service: "list-service",
                    path_and_query: "/lists".to_string(),
                    authorization: Some(authorization),
                },
            ])
            .await;

        json!({
            "user": results.remove("user").flatten(),
            "recentItems": results.remove("recentItems").flatten(),
            "userLists": results.remove("userLists").flatten(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Search items and users for `query`
    pub async fn search(&self, query: &str, authorization: Option<HeaderValue>) -> Value {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        let path_and_query = format!("/search?q={}", encoded);

        let mut results = self
            .fan_out(vec![
                Fetch {
                    slot: "items",
                    service: "item-service",
                    path_and_query: path_and_query.clone(),
                    authorization: None,
                },
                Fetch {
                    slot: "users",
                    service: "user-service",
                    path_and_query,
                    authorization,
                },
            ])
            .await;

        json!({
            "items": results.remove("items").flatten().unwrap_or_else(|| json!([])),
            "users": results.remove("users").flatten().unwrap_or_else(|| json!([])),
            "query": query,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }

    async fn fan_out(&self, fetches: Vec<Fetch>) -> HashMap<&'static str, Option<Value>> {
        let mut tasks = JoinSet::new();
        for fetch in fetches {
            let aggregator = self.clone();
            tasks.spawn(async move {
                let value = aggregator.fetch(&fetch).await;
                (fetch.slot, value)
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, value)) => {
                    results.insert(slot, value);
                }
                Err(e) => warn!(error = %e, "Aggregate fetch task failed"),
            }
        }
        results
    }

    async fn fetch(&self, fetch: &Fetch) -> Option<Value> {
        match tokio::time::timeout(self.timeout, self.read(fetch)).await {
            Ok(value) => value,
            Err(_) => {
                warn!(service = fetch.service, "Aggregate read timed out");
                None
            }
        }
    }

    async fn read(&self, fetch: &Fetch) -> Option<Value> {
        let record = match self.registry.discover(fetch.service).await {
            Ok(record) => record,
            Err(e) => {
                debug!(service = fetch.service, error = %e, "Skipping service");
                return None;
            }
        };

        let uri = HttpProxy::build_upstream_uri(&record.base_url, &fetch.path_and_query).ok()?;
        let mut builder =
            Request::get(uri).header(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(authorization) = &fetch.authorization {
            builder = builder.header(AUTHORIZATION, authorization.clone());
        }
        let req = builder.body(Full::new(Bytes::new())).ok()?;

        let response = match self.client.send(req, fetch.service).await {
            Ok(response) => response,
            Err(e) => {
                warn!(service = fetch.service, error = %e, "Aggregate read failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(
                service = fetch.service,
                status = response.status().as_u16(),
                "Aggregate read rejected"
            );
            return None;
        }

        let value: Value = serde_json::from_slice(response.body()).ok()?;
        Some(unwrap_data(value))
    }
}

/// Services wrap payloads as `{ "data": ... }`; unwrap when present
fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut object) => match object.remove("data") {
            Some(data) if !data.is_null() => data,
            Some(_) | None => Value::Object(object),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypost_registry::{InMemoryStore, ServiceInfo};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn registry_with(services: &[(&str, &str)]) -> Arc<ServiceRegistry> {
        let registry = Arc::new(ServiceRegistry::new(InMemoryStore::new()));
        for (name, url) in services {
            registry.register(name, ServiceInfo::new(*url)).await.unwrap();
        }
        registry
    }

    #[test]
    fn test_unwrap_data() {
        assert_eq!(unwrap_data(json!({"data": [1]})), json!([1]));
        assert_eq!(unwrap_data(json!({"id": 1})), json!({"id": 1}));
        assert_eq!(unwrap_data(json!([2])), json!([2]));
    }

    #[tokio::test]
    async fn test_dashboard_tolerates_missing_services() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(header("authorization", "Bearer t"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "u1"}})))
            .mount(&upstream)
            .await;
        Mock::given(path("/items"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&upstream)
            .await;

        let uri = upstream.uri();
        let registry =
            registry_with(&[("user-service", uri.as_str()), ("item-service", uri.as_str())]).await;
        let dashboard = Aggregator::new(registry, Duration::from_secs(1))
            .dashboard(HeaderValue::from_static("Bearer t"))
            .await;

        assert_eq!(dashboard["user"], json!({"id": "u1"}));
        assert!(dashboard["recentItems"].is_null());
        assert!(dashboard["userLists"].is_null());
        assert!(dashboard["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_search_encodes_query() {
        let upstream = MockServer::start().await;
        Mock::given(path("/search"))
            .and(query_param("q", "milk & bread"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": ["milk"]})))
            .expect(1)
            .mount(&upstream)
            .await;

        let registry = registry_with(&[("item-service", upstream.uri().as_str())]).await;
        let results = Aggregator::new(registry, Duration::from_secs(1))
            .search("milk & bread", None)
            .await;

        assert_eq!(results["items"], json!(["milk"]));
        assert_eq!(results["users"], json!([]));
        assert_eq!(results["query"], "milk & bread");
    }

    #[tokio::test]
    async fn test_slow_service_is_dropped() {
        let upstream = MockServer::start().await;
        Mock::given(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&upstream)
            .await;

        let registry = registry_with(&[("item-service", upstream.uri().as_str())]).await;
        let results = Aggregator::new(registry, Duration::from_millis(50))
            .search("x", None)
            .await;
        assert_eq!(results["items"], json!([]));
    }
}
