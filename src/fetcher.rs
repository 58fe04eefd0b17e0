use reqwest::{StatusCode, header::AUTHORIZATION};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::Config,
    range::DateRange,
    report::{MediaStatReport, parse_report},
};

const SEGMENTS_PATH: &str = "reports/service-segments";
const MEDIA_SEGMENT: &str = "m";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to analytics API failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("analytics API returned status {status}")]
    Upstream { status: StatusCode },

    #[error("analytics API rejected credentials (status {status})")]
    Authorization { status: StatusCode },

    #[error("unexpected analytics response: {0}")]
    Schema(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Transport,
    Authorization,
    Schema,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Transport => "transport",
            FetchErrorKind::Authorization => "authorization",
            FetchErrorKind::Schema => "schema",
        }
    }
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Transport(_) | FetchError::Upstream { .. } => FetchErrorKind::Transport,
            FetchError::Authorization { .. } => FetchErrorKind::Authorization,
            FetchError::Schema(_) => FetchErrorKind::Schema,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Transport(e) if e.is_timeout())
    }
}

/// Client for the Streamhoster service-segments report.
#[derive(Clone)]
pub struct StreamhosterClient {
    http: reqwest::Client,
    endpoint: Url,
    token: String,
}

impl StreamhosterClient {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .user_agent(concat!("streamviz/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let endpoint = cfg.api_base.join(SEGMENTS_PATH)?;
        Ok(Self {
            http,
            endpoint,
            token: cfg.api_token.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Fetches media statistics for `range`, sorted by views.
    ///
    /// `media_key` is applied locally as a substring filter after the
    /// response is parsed; it is never sent upstream.
    pub async fn fetch(&self, range: &DateRange, media_key: &str) -> Result<MediaStatReport, FetchError> {
        let start = range.compact_start();
        let end = range.compact_end();
        debug!(%start, %end, endpoint = %self.endpoint, "requesting service segments");

        let resp = self
            .http
            .get(self.endpoint.clone())
            .query(&[
                ("startTime", start.as_str()),
                ("endTime", end.as_str()),
                ("segmentNames", MEDIA_SEGMENT),
            ])
            .header(AUTHORIZATION, format!("Basic {}", self.token))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(%status, "analytics API rejected token");
            return Err(FetchError::Authorization { status });
        }
        if !status.is_success() {
            warn!(%status, "analytics API returned an error status");
            return Err(FetchError::Upstream { status });
        }

        let body = resp.bytes().await?;
        let report = parse_report(&body)?;
        debug!(rows = report.len(), "parsed service segments");

        Ok(report.filtered(media_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path, query_param},
    };

    fn config(base: &str, timeout: Duration) -> Config {
        Config {
            api_token: "dG9rZW4=".to_string(),
            api_base: Url::parse(base).unwrap(),
            timeout,
            dashboard_auth: None,
        }
    }

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
        )
        .unwrap()
    }

    fn payload() -> serde_json::Value {
        json!({
            "services": [{
                "m": [
                    {"key": "abc", "totals": {"views": 5, "uniques": 2, "dataTransferGB": 0.1}},
                    {"key": "xyz", "totals": {"views": 20, "uniques": 9, "dataTransferGB": 1.2}},
                    {"key": "xyz-2", "totals": {"views": 7, "uniques": 3, "dataTransferGB": 0.4}}
                ]
            }]
        })
    }

    fn client_for(server: &MockServer) -> StreamhosterClient {
        StreamhosterClient::new(&config(&server.uri(), Duration::from_secs(5))).unwrap()
    }

    #[test]
    fn endpoint_is_joined_onto_base() {
        let c = StreamhosterClient::new(&config("https://api.streamhoster.com/", Duration::from_secs(1))).unwrap();
        assert_eq!(c.endpoint().as_str(), "https://api.streamhoster.com/reports/service-segments");
    }

    #[tokio::test]
    async fn sends_compact_dates_segment_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reports/service-segments"))
            .and(query_param("startTime", "20240301"))
            .and(query_param("endTime", "20240309"))
            .and(query_param("segmentNames", "m"))
            .and(header("authorization", "Basic dG9rZW4="))
            .respond_with(ResponseTemplate::new(200).set_body_json(payload()))
            .expect(1)
            .mount(&server)
            .await;

        let report = client_for(&server).fetch(&range(), "").await.unwrap();
        let keys: Vec<_> = report.rows().iter().map(|r| r.media_key.as_str()).collect();
        assert_eq!(keys, ["xyz", "xyz-2", "abc"]);
    }

    #[tokio::test]
    async fn filter_is_applied_locally() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reports/service-segments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(payload()))
            .mount(&server)
            .await;

        let report = client_for(&server).fetch(&range(), "xyz").await.unwrap();
        assert_eq!(report.len(), 2);
        assert!(report.rows().iter().all(|r| r.media_key.contains("xyz")));

        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| !r.url.as_str().contains("xyz")));
    }

    #[tokio::test]
    async fn rejected_token_is_authorization_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch(&range(), "").await.unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Authorization);
    }

    #[tokio::test]
    async fn server_error_is_transport_kind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch(&range(), "").await.unwrap_err();
        assert!(matches!(err, FetchError::Upstream { status } if status == StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(err.kind(), FetchErrorKind::Transport);
    }

    #[tokio::test]
    async fn missing_fields_are_schema_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"services": [{"n": []}]})))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch(&range(), "").await.unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Schema);
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(payload())
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = StreamhosterClient::new(&config(&server.uri(), Duration::from_millis(200))).unwrap();
        let err = client.fetch(&range(), "").await.unwrap_err();
        assert!(err.is_timeout(), "{err:?}");
        assert_eq!(err.kind(), FetchErrorKind::Transport);
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        // Port 9 (discard) on localhost is not expected to be listening.
        let client = StreamhosterClient::new(&config("http://127.0.0.1:9/", Duration::from_secs(2))).unwrap();
        let err = client.fetch(&range(), "").await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }
}
