use crate::error::FetchError;
use crate::storage_utils::FetchConfig;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;

/// One daily close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub timestamp: i64, // unix seconds
    pub close: f64,
}

/// Chronological closes for one symbol over the requested window.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    pub symbol: String,
    pub points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, points: Vec<PricePoint>) -> Self {
        Self {
            symbol: symbol.into(),
            points,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Trailing window ending now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookbackWindow {
    pub days: u32,
}

impl LookbackWindow {
    pub const FIFTY_TWO_WEEKS: Self = Self { days: 365 };

    pub fn new(days: u32) -> Self {
        Self { days }
    }

    /// `(period1, period2)` in unix seconds, relative to `now`.
    pub fn bounds(self, now: i64) -> (i64, i64) {
        (now - Duration::days(self.days as i64).num_seconds(), now)
    }
}

#[async_trait]
pub trait PriceHistorySource: Send + Sync {
    async fn fetch_history(
        &self,
        symbol: &str,
        window: LookbackWindow,
    ) -> Result<PriceSeries, FetchError>;
}

// --- Yahoo chart payload ---

#[derive(Deserialize, Debug)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Deserialize, Debug)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteBlock>,
}

#[derive(Deserialize, Debug)]
struct QuoteBlock {
    #[serde(default)]
    close: Vec<LenientF64>,
}

/// Yahoo pads holidays and the live bar with `null`, and some mirrors send strings.
#[derive(Debug, Clone, Copy)]
struct LenientF64(Option<f64>);

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = LenientF64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, null, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(LenientF64(Some(v)))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(LenientF64(Some(v as f64)))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(LenientF64(Some(v as f64)))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(LenientF64(None))
        } else {
            v.trim().parse::<f64>().map(|f| LenientF64(Some(f))).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(LenientF64(None))
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(LenientF64(None))
    }
}

impl<'de> Deserialize<'de> for LenientF64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LenientF64Visitor)
    }
}

/// Decodes a Yahoo chart response body. Rows without a usable close are dropped;
/// a result with no rows is an empty series rather than an error.
pub fn parse_chart_payload(symbol: &str, body: &[u8]) -> Result<PriceSeries, FetchError> {
    let envelope: ChartEnvelope =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;

    if let Some(err) = envelope.chart.error {
        let description = err
            .description
            .unwrap_or_else(|| "no description".to_string());
        return Err(match err.code.as_deref() {
            Some("Not Found") => FetchError::UnknownSymbol(symbol.to_string()),
            _ => FetchError::Provider(description),
        });
    }

    let Some(result) = envelope.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(PriceSeries::new(symbol, Vec::new()));
    };

    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default();

    let points = result
        .timestamp
        .into_iter()
        .zip(closes)
        .filter_map(|(timestamp, close)| match close.0 {
            Some(close) if close.is_finite() => Some(PricePoint { timestamp, close }),
            _ => None,
        })
        .collect();

    Ok(PriceSeries::new(symbol, points))
}

/// Maps a non-success HTTP status onto the fetch taxonomy.
fn classify_status(status: u16, symbol: &str) -> FetchError {
    match status {
        404 => FetchError::UnknownSymbol(symbol.to_string()),
        418 | 429 => FetchError::Throttled(status),
        _ => FetchError::HttpStatus(status),
    }
}

// --- HTTP client ---

pub struct YahooChartClient {
    client: Client,
    base_url: String,
    interval: String,
}

impl YahooChartClient {
    pub fn new(client: Client, cfg: &FetchConfig) -> Self {
        Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            interval: cfg.interval.clone(),
        }
    }

    fn chart_url(&self, symbol: &str) -> String {
        // Index symbols start with '^', which the chart API expects percent-encoded.
        format!("{}/{}", self.base_url, symbol.replace('^', "%5E"))
    }
}

#[async_trait]
impl PriceHistorySource for YahooChartClient {
    async fn fetch_history(
        &self,
        symbol: &str,
        window: LookbackWindow,
    ) -> Result<PriceSeries, FetchError> {
        let (period1, period2) = window.bounds(Utc::now().timestamp());
        let query = [
            ("period1", period1.to_string()),
            ("period2", period2.to_string()),
            ("interval", self.interval.clone()),
        ];

        let response = self
            .client
            .get(self.chart_url(symbol))
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(symbol, status = status.as_u16(), "chart request rejected");
            return Err(classify_status(status.as_u16(), symbol));
        }

        let body = response.bytes().await?;
        parse_chart_payload(symbol, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_closes_and_drops_nulls() {
        let body = br#"{"chart":{"result":[{
            "meta":{"symbol":"X"},
            "timestamp":[1,2,3,4],
            "indicators":{"quote":[{"close":[100.0, null, "120.5", 90]}]}
        }],"error":null}}"#;

        let series = parse_chart_payload("X", body).unwrap();
        assert_eq!(series.symbol, "X");
        assert_eq!(
            series.points,
            vec![
                PricePoint { timestamp: 1, close: 100.0 },
                PricePoint { timestamp: 3, close: 120.5 },
                PricePoint { timestamp: 4, close: 90.0 },
            ]
        );
    }

    #[test]
    fn missing_rows_is_an_empty_series() {
        let body = br#"{"chart":{"result":[{"meta":{},"indicators":{"quote":[{}]}}],"error":null}}"#;
        assert!(parse_chart_payload("X", body).unwrap().is_empty());

        let body = br#"{"chart":{"result":[],"error":null}}"#;
        assert!(parse_chart_payload("X", body).unwrap().is_empty());
    }

    #[test]
    fn chart_error_maps_to_fetch_error() {
        let body = br#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        assert_eq!(
            parse_chart_payload("NOPE", body),
            Err(FetchError::UnknownSymbol("NOPE".to_string()))
        );

        let body = br#"{"chart":{"result":null,"error":{"code":"Bad Request","description":"Invalid input"}}}"#;
        assert_eq!(
            parse_chart_payload("X", body),
            Err(FetchError::Provider("Invalid input".to_string()))
        );
    }

    #[test]
    fn garbage_body_is_decode_error() {
        assert!(matches!(
            parse_chart_payload("X", b"<html>oops</html>"),
            Err(FetchError::Decode(_))
        ));
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(404, "X"), FetchError::UnknownSymbol("X".into()));
        assert_eq!(classify_status(429, "X"), FetchError::Throttled(429));
        assert_eq!(classify_status(418, "X"), FetchError::Throttled(418));
        assert_eq!(classify_status(500, "X"), FetchError::HttpStatus(500));
    }

    #[test]
    fn chart_url_encodes_index_caret() {
        let cfg = FetchConfig {
            base_url: "http://localhost/chart/".to_string(),
            ..FetchConfig::default()
        };
        let client = YahooChartClient::new(Client::new(), &cfg);
        assert_eq!(client.chart_url("^NSEI"), "http://localhost/chart/%5ENSEI");
        assert_eq!(client.chart_url("BTC-USD"), "http://localhost/chart/BTC-USD");
    }

    #[test]
    fn window_bounds_span_requested_days() {
        let (start, end) = LookbackWindow::FIFTY_TWO_WEEKS.bounds(1_000_000_000);
        assert_eq!(end, 1_000_000_000);
        assert_eq!(end - start, 365 * 86_400);
    }

    mod chart_client {
        use super::*;
        use std::collections::HashMap;
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn client_for(base_url: String) -> YahooChartClient {
            let cfg = FetchConfig {
                base_url,
                ..FetchConfig::default()
            };
            YahooChartClient::new(Client::new(), &cfg)
        }

        async fn respond(server: &MockServer, status: u16, body: &str) {
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status).set_body_string(body))
                .mount(server)
                .await;
        }

        #[tokio::test]
        async fn fetches_daily_closes_for_window() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/v8/finance/chart/%5ENSEI"))
                .and(query_param("interval", "1d"))
                .respond_with(ResponseTemplate::new(200).set_body_string(
                    r#"{"chart":{"result":[{"timestamp":[10,20,30],
                        "indicators":{"quote":[{"close":[100.0,120.0,90.0]}]}}],"error":null}}"#,
                ))
                .expect(1)
                .mount(&server)
                .await;

            let client = client_for(format!("{}/v8/finance/chart", server.uri()));
            let series = client
                .fetch_history("^NSEI", LookbackWindow::FIFTY_TWO_WEEKS)
                .await
                .unwrap();

            assert_eq!(series.symbol, "^NSEI");
            let closes: Vec<_> = series.points.iter().map(|p| p.close).collect();
            assert_eq!(closes, [100.0, 120.0, 90.0]);

            let requests = server.received_requests().await.unwrap();
            let query: HashMap<String, String> =
                requests[0].url.query_pairs().into_owned().collect();
            let period1: i64 = query["period1"].parse().unwrap();
            let period2: i64 = query["period2"].parse().unwrap();
            assert_eq!(period2 - period1, 365 * 86_400);
        }

        #[tokio::test]
        async fn too_many_requests_is_throttled() {
            let server = MockServer::start().await;
            respond(&server, 429, "Too Many Requests").await;

            let result = client_for(server.uri())
                .fetch_history("AVGO", LookbackWindow::FIFTY_TWO_WEEKS)
                .await;
            assert_eq!(result, Err(FetchError::Throttled(429)));
        }

        #[tokio::test]
        async fn not_found_is_unknown_symbol() {
            let server = MockServer::start().await;
            respond(
                &server,
                404,
                r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#,
            )
            .await;

            let result = client_for(server.uri())
                .fetch_history("NOPE", LookbackWindow::FIFTY_TWO_WEEKS)
                .await;
            assert_eq!(result, Err(FetchError::UnknownSymbol("NOPE".to_string())));
        }

        #[tokio::test]
        async fn server_error_keeps_status() {
            let server = MockServer::start().await;
            respond(&server, 503, "").await;

            let result = client_for(server.uri())
                .fetch_history("AVGO", LookbackWindow::FIFTY_TWO_WEEKS)
                .await;
            assert_eq!(result, Err(FetchError::HttpStatus(503)));
        }

        #[tokio::test]
        async fn non_json_success_is_decode_error() {
            let server = MockServer::start().await;
            respond(&server, 200, "<html>maintenance</html>").await;

            let result = client_for(server.uri())
                .fetch_history("AVGO", LookbackWindow::FIFTY_TWO_WEEKS)
                .await;
            assert!(matches!(result, Err(FetchError::Decode(_))));
        }

        #[tokio::test]
        async fn unreachable_host_is_network_error() {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let base_url = format!("http://{}", listener.local_addr().unwrap());
            drop(listener);

            let result = client_for(base_url)
                .fetch_history("AVGO", LookbackWindow::FIFTY_TWO_WEEKS)
                .await;
            assert!(matches!(result, Err(FetchError::Network(_))), "{result:?}");
        }
    }
}
