//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the provider's GraphQL endpoint
//! and drive the full crawl cycle end-to-end.

use fare_ripple::config::{
    load_config, ApiConfig, Config, CrawlerConfig, EmptyResultPolicy, OutputConfig, RouteEntry,
};
use fare_ripple::crawler::{
    crawl_with_sink, outbound_payload, run_crawl, ApiGateway, GatewayError, HttpGateway,
    RouteQuery,
};
use fare_ripple::model::TaskParams;
use fare_ripple::storage::{MemorySink, RunStatus, SqliteSink};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock server
fn create_test_config(endpoint: String, routes: Vec<RouteEntry>, db_path: &str) -> Config {
    Config {
        crawler: CrawlerConfig {
            max_concurrency: 2,
            max_attempts: 3,
            backoff_base_ms: 10, // Very short for testing
            backoff_cap_ms: 40,
            date_format: "%Y%m%d".to_string(),
            empty_results: EmptyResultPolicy::Skip,
        },
        api: ApiConfig {
            endpoint,
            timeout_secs: 5,
            connect_timeout_secs: 2,
            user_agent: "TestCrawler/1.0".to_string(),
        },
        output: OutputConfig {
            database_path: db_path.to_string(),
        },
        routes,
    }
}

fn route(id: &str, return_date: Option<&str>) -> RouteEntry {
    RouteEntry {
        id: Some(id.to_string()),
        origin: "TPE".to_string(),
        destination: "NRT".to_string(),
        departure_date: "2024-06-01".to_string(),
        return_date: return_date.map(str::to_string),
        trip_type: None,
        cabin: None,
        adults: None,
    }
}

fn itinerary(search_id: &str, flight: &str, date: &str, price: &str, tax: &str) -> Value {
    json!({
        "depDate": date,
        "flightDetail": [{ "marketingAirlineCode": "BR", "flightNumber": flight }],
        "fareList": [{
            "searchId": search_id,
            "pfpClassName": "Economy",
            "bccTp": "Y",
            "fareInfo": {
                "totalPrice": { "price": price },
                "tax": { "totalTax": tax }
            }
        }]
    })
}

fn flight_list(itineraries: Vec<Value>) -> Value {
    json!({
        "data": {
            "pfpFlightSegmentSearch": {
                "error": null,
                "data": { "flightList": itineraries }
            }
        }
    })
}

fn leg(segment_index: u8) -> impl wiremock::Match {
    body_partial_json(json!({ "variables": { "input": { "segmentIndex": segment_index } } }))
}

fn return_for(search_id: &str) -> impl wiremock::Match {
    body_partial_json(json!({ "variables": { "input": { "segmentIndex": 1, "searchId": search_id } } }))
}

fn sample_payload() -> fare_ripple::crawler::QueryPayload {
    let params = TaskParams::new()
        .with("origin", "TPE")
        .with("destination", "NRT")
        .with("departure_date", "2024-06-01");
    let route = RouteQuery::from_params(&params).unwrap();
    outbound_payload(&route, "%Y%m%d")
}

async fn gateway_for(server: &MockServer) -> HttpGateway {
    HttpGateway::new(&ApiConfig {
        endpoint: format!("{}/graphql", server.uri()),
        timeout_secs: 5,
        connect_timeout_secs: 2,
        user_agent: "TestCrawler/1.0".to_string(),
    })
    .expect("Failed to build gateway")
}

#[tokio::test]
async fn test_gateway_returns_json_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({ "operationName": "pfpFlightSegmentSearch" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(flight_list(vec![])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server).await;
    let body = gateway.send(&sample_payload()).await.expect("Request failed");

    assert!(body.pointer("/data/pfpFlightSegmentSearch/data/flightList").is_some());
}

#[tokio::test]
async fn test_gateway_classifies_status_codes() {
    let cases: [(u16, &str); 6] = [
        (503, "transient"),
        (429, "transient"),
        (401, "unauthorized"),
        (403, "unauthorized"),
        (400, "rejected"),
        (404, "rejected"),
    ];

    for (status, expected) in cases {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&mock_server)
            .await;

        let gateway = gateway_for(&mock_server).await;
        let err = gateway.send(&sample_payload()).await.unwrap_err();

        let actual = match err {
            GatewayError::Transient(_) => "transient",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Rejected { .. } => "rejected",
            GatewayError::InvalidBody(_) => "invalid_body",
        };
        assert_eq!(actual, expected, "HTTP {}", status);
    }
}

#[tokio::test]
async fn test_gateway_rejects_non_json_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&mock_server)
        .await;

    let gateway = gateway_for(&mock_server).await;
    let err = gateway.send(&sample_payload()).await.unwrap_err();

    assert!(matches!(err, GatewayError::InvalidBody(_)));
}

#[tokio::test]
async fn test_full_round_trip_crawl() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(leg(0))
        .respond_with(ResponseTemplate::new(200).set_body_json(flight_list(vec![
            itinerary("A", "198", "20240601", "4000", "500"),
            itinerary("B", "196", "20240601", "4500", "500"),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(return_for("A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(flight_list(vec![
            itinerary("A", "197", "20240608", "9000", "1200"),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(return_for("B"))
        .respond_with(ResponseTemplate::new(200).set_body_json(flight_list(vec![
            itinerary("B", "195", "20240608", "9800", "1200"),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(
        mock_server.uri(),
        vec![route("tpe-nrt", Some("2024-06-08"))],
        "unused.db",
    );
    let sink = Arc::new(MemorySink::new());

    let summary = crawl_with_sink(&config, sink.clone(), CancellationToken::new())
        .await
        .expect("Crawl failed");

    assert_eq!(summary.total, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.records, 2);
    assert_eq!(summary.attempts, 1);

    let records = sink.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].outbound_summary(), "BR198");
    assert_eq!(records[0].inbound_summary(), "BR197");
    assert_eq!(records[0].price, Decimal::new(9000, 0));
    assert_eq!(records[1].outbound_summary(), "BR196");
    assert_eq!(records[1].inbound_summary(), "BR195");
    assert!(records.iter().all(|r| r.is_round_trip()));
}

#[tokio::test]
async fn test_transient_failures_exhaust_attempts() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri(), vec![route("flaky", None)], "unused.db");
    let sink = Arc::new(MemorySink::new());

    let summary = crawl_with_sink(&config, sink.clone(), CancellationToken::new())
        .await
        .expect("Crawl failed");

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.attempts, 3);
    assert_eq!(summary.failures_by_kind.get("transient"), Some(&1));
    assert_eq!(sink.calls(), 0);
}

#[tokio::test]
async fn test_empty_flight_list_is_a_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(flight_list(vec![])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri(), vec![route("empty", None)], "unused.db");
    let sink = Arc::new(MemorySink::new());

    let summary = crawl_with_sink(&config, sink.clone(), CancellationToken::new())
        .await
        .expect("Crawl failed");

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.empty, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(sink.calls(), 0);
}

#[tokio::test]
async fn test_run_crawl_records_run_in_database() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(flight_list(vec![
            itinerary("S1", "812", "20240601", "3200", "400"),
            itinerary("S2", "816", "20240601", "", "400"),
        ])))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("fares.db");
    let config = create_test_config(
        mock_server.uri(),
        vec![route("one", None), route("two", None)],
        db_path.to_str().expect("Non-UTF-8 temp path"),
    );

    let summary = run_crawl(config, "test-hash", CancellationToken::new())
        .await
        .expect("Crawl failed");
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.records, 4);

    let storage = SqliteSink::open_existing(&db_path).expect("Failed to open DB");
    assert_eq!(storage.count_fares().expect("Failed to count fares"), 4);

    let run = storage
        .latest_run()
        .expect("Failed to load run")
        .expect("No run recorded");
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, "test-hash");
    assert!(run.finished_at.is_some());

    // An empty price string is stored as zero
    let fares = storage.load_fares(run.id).expect("Failed to load fares");
    assert!(fares.iter().any(|f| f.price == Decimal::ZERO));
}

#[tokio::test]
async fn test_cancelled_crawl_is_interrupted() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(flight_list(vec![])))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("fares.db");
    let config = create_test_config(
        mock_server.uri(),
        vec![route("a", None), route("b", None), route("c", None)],
        db_path.to_str().expect("Non-UTF-8 temp path"),
    );

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let summary = run_crawl(config, "test-hash", shutdown)
        .await
        .expect("Crawl failed");
    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded + summary.cancelled, 3);

    let storage = SqliteSink::open_existing(&db_path).expect("Failed to open DB");
    let run = storage
        .latest_run()
        .expect("Failed to load run")
        .expect("No run recorded");
    let expected = if summary.cancelled > 0 {
        RunStatus::Interrupted
    } else {
        RunStatus::Completed
    };
    assert_eq!(run.status, expected);
}

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    write!(
        file,
        r#"
[crawler]
max-concurrency = 3
max-attempts = 5

[api]
endpoint = "https://fares.example.com/graphql"

[output]
database-path = "./fares.db"

[[route]]
id = "tpe-nrt"
origin = "tpe"
destination = "NRT"
departure-date = "2024-06-01"
return-date = "2024-06-08"

[[route]]
origin = "TPE"
destination = "KIX"
departure-date = "2024-07-01"
"#
    )
    .expect("Failed to write config");

    let config = load_config(file.path()).expect("Failed to load config");

    assert_eq!(config.crawler.max_concurrency, 3);
    assert_eq!(config.crawler.max_attempts, 5);
    assert_eq!(config.crawler.date_format, "%Y%m%d");
    assert_eq!(config.routes.len(), 2);

    let task = config.routes[0].to_task();
    assert_eq!(task.id.as_str(), "tpe-nrt");
    assert_eq!(task.params.get("origin"), Some("TPE"));
    assert_eq!(task.params.get("return_date"), Some("2024-06-08"));
    assert!(config.routes[1].to_task().params.get("return_date").is_none());
}

#[test]
fn test_load_config_rejects_bad_route() {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    write!(
        file,
        r#"
[api]
endpoint = "https://fares.example.com/graphql"

[output]
database-path = "./fares.db"

[[route]]
origin = "TPE"
destination = "NRT"
departure-date = "2024-06-08"
return-date = "2024-06-01"
"#
    )
    .expect("Failed to write config");

    assert!(load_config(file.path()).is_err());
}
