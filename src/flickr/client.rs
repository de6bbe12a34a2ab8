//! Stateless HTTP client for the Flickr photo-search endpoint.

use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::config::Config;
use crate::error::FetchError;

use super::api_types::{self, ApiSearchResponse};
use super::PhotoPage;

const METHOD: &str = "flickr.photos.search";
const EXTRAS: &str = "url_m";
const DATA_FORMAT: &str = "json";
const SAFE_SEARCH: &str = "1";
const NO_JSON_CALLBACK: &str = "1";

/// Client for the photo-search API.
///
/// Stateless apart from its connection pool; cheap to clone.
#[derive(Debug, Clone)]
pub struct SearchClient {
  http: reqwest::Client,
  endpoint: Url,
  api_key: String,
}

impl SearchClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    Self::with_endpoint(&config.flickr.url, api_key)
  }

  /// Build a client against an explicit endpoint. Used directly by tests and
  /// by `new` with the configured endpoint.
  pub fn with_endpoint(endpoint: &str, api_key: String) -> Result<Self> {
    let endpoint = Url::parse(endpoint)
      .map_err(|e| eyre!("Invalid search endpoint {}: {}", endpoint, e))?;

    Ok(Self {
      http: reqwest::Client::new(),
      endpoint,
      api_key,
    })
  }

  /// Share this client's connection pool (e.g. with an `ImageFetcher`).
  pub fn http(&self) -> reqwest::Client {
    self.http.clone()
  }

  /// Search for photos around a coordinate.
  ///
  /// Every outcome comes back through the `Result`: transport failures as
  /// `Transport`, API-reported failures as `Remote` with the body's status
  /// message, undecodable bodies as `Parse`.
  pub async fn search(
    &self,
    latitude: f64,
    longitude: f64,
    page: Option<u32>,
  ) -> std::result::Result<PhotoPage, FetchError> {
    let mut query: Vec<(&str, String)> = vec![
      ("method", METHOD.to_string()),
      ("api_key", self.api_key.clone()),
      ("safe_search", SAFE_SEARCH.to_string()),
      ("extras", EXTRAS.to_string()),
      ("format", DATA_FORMAT.to_string()),
      ("nojsoncallback", NO_JSON_CALLBACK.to_string()),
      ("lat", latitude.to_string()),
      ("lon", longitude.to_string()),
    ];
    if let Some(page) = page {
      query.push(("page", page.to_string()));
    }

    let response = self
      .http
      .get(self.endpoint.clone())
      .query(&query)
      .send()
      .await?;

    // An HTTP-level failure may still carry a parseable status message; if it
    // doesn't, surface the underlying status error unchanged.
    let status_err = response.error_for_status_ref().err();
    if let Some(status_err) = status_err {
      let body = response.bytes().await.unwrap_or_default();
      return Err(match api_types::error_message_from_body(&body) {
        Some(message) => FetchError::Remote(message),
        None => FetchError::Transport(status_err),
      });
    }

    let body = response.bytes().await?;
    let parsed: ApiSearchResponse =
      serde_json::from_slice(&body).map_err(|e| FetchError::Parse(e.to_string()))?;

    if parsed.stat != "ok" {
      let message = parsed
        .message
        .filter(|m| !m.is_empty())
        .unwrap_or(parsed.stat);
      return Err(FetchError::Remote(message));
    }

    let page = parsed
      .photos
      .ok_or_else(|| FetchError::Parse("response missing photos object".to_string()))?;

    Ok(page.into_page())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::flickr::testserver;

  fn client(base: &str) -> SearchClient {
    SearchClient::with_endpoint(base, "test-key".to_string()).unwrap()
  }

  #[tokio::test]
  async fn test_search_parses_page() {
    let body = r#"{"photos":{"pages":3,"photo":[
      {"id":"1","url_m":"http://x/a.jpg"},
      {"id":"2","url_m":""}
    ]},"stat":"ok"}"#;
    let base = testserver::serve_once(testserver::json_response("200 OK", body)).await;

    let page = client(&base).search(37.7, -122.4, Some(1)).await.unwrap();

    assert_eq!(page.pages, 3);
    assert_eq!(page.photos.len(), 2);
    assert_eq!(page.photos[0].url_m, "http://x/a.jpg");
    assert_eq!(page.photos[1].url_m, "");
  }

  #[tokio::test]
  async fn test_search_failure_stat_is_remote() {
    let body = r#"{"stat":"fail","code":100,"message":"Invalid API Key"}"#;
    let base = testserver::serve_once(testserver::json_response("200 OK", body)).await;

    let err = client(&base).search(0.0, 0.0, None).await.unwrap_err();

    match err {
      FetchError::Remote(message) => assert_eq!(message, "Invalid API Key"),
      other => panic!("expected Remote, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_search_http_error_with_message_is_remote() {
    let body = r#"{"stat":"fail","message":"Service unavailable"}"#;
    let base =
      testserver::serve_once(testserver::json_response("503 Service Unavailable", body)).await;

    let err = client(&base).search(0.0, 0.0, None).await.unwrap_err();

    match err {
      FetchError::Remote(message) => assert_eq!(message, "Service unavailable"),
      other => panic!("expected Remote, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_search_http_error_without_message_is_transport() {
    let base = testserver::serve_once(testserver::http_response(
      "500 Internal Server Error",
      "text/html",
      b"<html>boom</html>",
    ))
    .await;

    let err = client(&base).search(0.0, 0.0, None).await.unwrap_err();
    assert!(matches!(err, FetchError::Transport(_)));
  }

  #[tokio::test]
  async fn test_search_malformed_success_body_is_parse() {
    let base =
      testserver::serve_once(testserver::json_response("200 OK", r#"{"photos": "nope"#)).await;

    let err = client(&base).search(0.0, 0.0, None).await.unwrap_err();
    assert!(matches!(err, FetchError::Parse(_)));
  }

  #[tokio::test]
  async fn test_search_unreachable_is_transport() {
    // Bind-then-drop leaves a port nothing is listening on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = client(&base).search(0.0, 0.0, None).await.unwrap_err();
    assert!(matches!(err, FetchError::Transport(_)));
  }
}
