//! FRED client and series download against a mock API.

use harvest_runtime::acquisition::{HttpClient, RetryPolicy};
use harvest_runtime::config::Config;
use harvest_runtime::sources::fred::{download_series, FredClient, FredError};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> FredClient {
    let http = HttpClient::new(&Config::from_env())
        .unwrap()
        .with_retry(RetryPolicy::none())
        .with_rate_limiter(None);
    FredClient::new(http, Some("test-key".into()))
        .unwrap()
        .with_base_url(server.uri())
}

#[tokio::test]
async fn test_search_sends_key_and_ordering() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series/search"))
        .and(query_param("api_key", "test-key"))
        .and(query_param("file_type", "json"))
        .and(query_param("search_text", "gdp"))
        .and(query_param("order_by", "popularity"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "seriess": [
                {"id": "GDP", "title": "Gross Domestic Product", "popularity": 93},
                {"id": "GDPC1", "title": "Real Gross Domestic Product", "popularity": 90}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let results = client(&server).search(" gdp ", 100).await.unwrap();
    let ids: Vec<String> = results.iter().map(|s| s.id()).collect();
    assert_eq!(ids, vec!["GDP", "GDPC1"]);
    assert_eq!(results[0].popularity(), Some(93.0));
}

#[tokio::test]
async fn test_empty_term_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    let err = client(&server).search("   ", 10).await.unwrap_err();
    assert!(matches!(err, FredError::EmptySearchTerm));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_download_series_writes_csv_and_stats() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .and(query_param("series_id", "UNRATE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "seriess": [{
                "id": "UNRATE",
                "title": "Unemployment Rate",
                "frequency": "Monthly",
                "units": "Percent",
                "popularity": 95
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/series/observations"))
        .and(query_param("series_id", "UNRATE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "observations": [
                {"date": "2020-01-01", "value": "3.5"},
                {"date": "2020-02-01", "value": "."},
                {"date": "2020-03-01", "value": "4.5"}
            ]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let done = download_series(&client(&server), dir.path(), "UNRATE").await.unwrap();
    assert_eq!(done.details.field("title"), "Unemployment Rate");

    let stats = done.stats.unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.first_date, "2020-01-01");
    assert_eq!(stats.last_date, "2020-03-01");
    assert_eq!(stats.mean, 4.0);

    let name = done.path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("UNRATE_") && name.ends_with(".csv"));
    let csv = std::fs::read_to_string(&done.path).unwrap();
    assert!(csv.contains("# Units: Percent\n"));
    assert!(csv.ends_with("date,value\n2020-01-01,3.5\n2020-03-01,4.5\n"));
}

#[tokio::test]
async fn test_unknown_series_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_code": 400,
            "error_message": "Bad Request.  The series does not exist."
        })))
        .mount(&server)
        .await;

    let err = client(&server).series("NOPE").await.unwrap_err();
    assert!(matches!(err, FredError::SeriesNotFound(id) if id == "NOPE"));
}

#[tokio::test]
async fn test_series_without_observations_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "seriess": [{"id": "EMPTY", "title": "Nothing yet"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/series/observations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"observations": []})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = download_series(&client(&server), dir.path(), "EMPTY").await.unwrap_err();
    assert!(matches!(err.downcast_ref::<FredError>(), Some(FredError::NoObservations(id)) if id == "EMPTY"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
