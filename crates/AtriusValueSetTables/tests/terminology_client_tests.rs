mod common;

use atrius_value_set_tables::{ServiceError, TerminologyService, TerminologyServiceClient};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use common::serve;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
struct FakeTerminologyServer {
    codes: Vec<String>,
    report_total: bool,
    requests: Arc<Mutex<Vec<(HashMap<String, String>, Option<String>)>>>,
}

impl FakeTerminologyServer {
    fn new(count: usize) -> Self {
        Self {
            codes: (0..count).map(|i| format!("c{}", i)).collect(),
            report_total: true,
            requests: Arc::default(),
        }
    }

    fn requests(&self) -> Vec<(HashMap<String, String>, Option<String>)> {
        self.requests.lock().unwrap().clone()
    }
}

async fn expand(
    State(server): State<FakeTerminologyServer>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    server
        .requests
        .lock()
        .unwrap()
        .push((params.clone(), authorization));

    let url = params.get("url").cloned().unwrap_or_default();
    if url.ends_with("/missing") {
        return (StatusCode::NOT_FOUND, "ValueSet not found").into_response();
    }
    if url.ends_with("/no-expansion") {
        return Json(json!({"resourceType": "ValueSet", "url": url})).into_response();
    }

    let offset: usize = params.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let count: usize = params
        .get("count")
        .and_then(|v| v.parse().ok())
        .unwrap_or(server.codes.len());
    let contains: Vec<_> = server
        .codes
        .iter()
        .skip(offset)
        .take(count)
        .map(|code| json!({"system": "http://sys", "code": code}))
        .collect();

    let mut expansion = json!({"offset": offset, "contains": contains});
    if server.report_total {
        expansion["total"] = json!(server.codes.len());
    }
    Json(json!({
        "resourceType": "ValueSet",
        "expansion": expansion,
    }))
    .into_response()
}

async fn start(server: FakeTerminologyServer) -> String {
    let router = Router::new()
        .route("/fhir/ValueSet/$expand", get(expand))
        .with_state(server);
    format!("{}/fhir", serve(router).await)
}

#[tokio::test]
async fn test_expansion_pages_until_total() {
    let server = FakeTerminologyServer::new(5);
    let base = start(server.clone()).await;
    let client = TerminologyServiceClient::new().with_page_size(2);

    let vs = client
        .expand_value_set_url_using_service("http://example.org/ValueSet/five", &base)
        .await
        .unwrap();

    let codes: Vec<&str> = vs.codes().into_iter().map(|(_, code)| code).collect();
    assert_eq!(codes, vec!["c0", "c1", "c2", "c3", "c4"]);
    assert_eq!(vs.url.as_deref(), Some("http://example.org/ValueSet/five"));
    assert_eq!(vs.expansion.as_ref().unwrap().total, Some(5));

    let offsets: Vec<String> = server
        .requests()
        .into_iter()
        .map(|(params, _)| params["offset"].clone())
        .collect();
    assert_eq!(offsets, vec!["0", "2", "4"]);
    assert!(server.requests().iter().all(|(params, _)| params["count"] == "2"));
}

#[tokio::test]
async fn test_expansion_without_total_stops_on_short_page() {
    let mut server = FakeTerminologyServer::new(3);
    server.report_total = false;
    let base = start(server.clone()).await;
    let client = TerminologyServiceClient::new().with_page_size(2);

    let vs = client
        .expand_value_set_url_using_service("http://example.org/ValueSet/three", &base)
        .await
        .unwrap();

    assert_eq!(vs.codes().len(), 3);
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn test_versioned_url_sends_value_set_version() {
    let server = FakeTerminologyServer::new(1);
    let base = start(server.clone()).await;
    let client = TerminologyServiceClient::new();

    let vs = client
        .expand_value_set_url_using_service("http://example.org/ValueSet/vs|2.1.0", &base)
        .await
        .unwrap();

    let (params, _) = &server.requests()[0];
    assert_eq!(params["url"], "http://example.org/ValueSet/vs");
    assert_eq!(params["valueSetVersion"], "2.1.0");
    assert_eq!(vs.url.as_deref(), Some("http://example.org/ValueSet/vs"));
    assert_eq!(vs.version.as_deref(), Some("2.1.0"));
}

#[tokio::test]
async fn test_api_key_sent_as_basic_auth() {
    let server = FakeTerminologyServer::new(1);
    let base = start(server.clone()).await;
    let client = TerminologyServiceClient::new().with_api_key(&format!("{}/", base), "secret");

    client
        .expand_value_set_url_using_service("http://example.org/ValueSet/vs", &base)
        .await
        .unwrap();

    let (_, authorization) = &server.requests()[0];
    assert_eq!(authorization.as_deref(), Some("Basic YXBpa2V5OnNlY3JldA=="));
}

#[tokio::test]
async fn test_service_inferred_from_domain() {
    let server = FakeTerminologyServer::new(2);
    let base = start(server.clone()).await;
    let client = TerminologyServiceClient::new().with_domain_service("example.org", &base);

    let vs = client
        .expand_value_set_url("http://example.org/ValueSet/vs")
        .await
        .unwrap();

    assert_eq!(vs.codes().len(), 2);
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_http_error_is_reported() {
    let base = start(FakeTerminologyServer::new(1)).await;
    let client = TerminologyServiceClient::new();

    let err = client
        .expand_value_set_url_using_service("http://example.org/ValueSet/missing", &base)
        .await
        .unwrap_err();

    match err {
        ServiceError::Http { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "ValueSet not found");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_response_without_expansion_is_a_parse_error() {
    let base = start(FakeTerminologyServer::new(1)).await;
    let client = TerminologyServiceClient::new();

    let err = client
        .expand_value_set_url_using_service("http://example.org/ValueSet/no-expansion", &base)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Parse(_)));
}

#[tokio::test]
async fn test_unreachable_service_is_a_network_error() {
    let client = TerminologyServiceClient::new();
    let err = client
        .expand_value_set_url_using_service("http://example.org/ValueSet/vs", "http://127.0.0.1:9")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Network(_)));
}
