use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::ProviderError;
use crate::provider::{DailyClose, HistoricalPriceSource};

/// Daily closes from the Yahoo Finance v8 chart endpoint.
pub struct YahooSource {
    client: Client,
    base: String,
}

impl YahooSource {
    pub fn new(base: impl Into<String>) -> Self {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; coinmarket/0.1)")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base: base.into(),
        }
    }

    fn chart_url(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.base).map_err(|e| ProviderError::Transport(format!("bad base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Transport("base url cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol]);
        url.query_pairs_mut()
            .append_pair("period1", &start.timestamp().to_string())
            .append_pair("period2", &end.timestamp().to_string())
            .append_pair("interval", "1d")
            .append_pair("events", "history");
        Ok(url)
    }
}

#[derive(Deserialize, Debug)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Deserialize, Debug)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: String,
    description: String,
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
    quote: Vec<QuoteSeries>,
    #[serde(default)]
    adjclose: Vec<AdjCloseSeries>,
}

#[derive(Deserialize, Debug)]
struct QuoteSeries {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Deserialize, Debug)]
struct AdjCloseSeries {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Extracts `(timestamp, close)` pairs, preferring adjusted closes. Days with
/// a missing close are skipped.
pub(crate) fn parse_chart(symbol: &str, body: &str) -> Result<Vec<DailyClose>, ProviderError> {
    let resp: ChartResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(format!("{symbol}: {e}")))?;

    if let Some(err) = resp.chart.error {
        return Err(ProviderError::Parse(format!(
            "{symbol}: {} ({})",
            err.description, err.code
        )));
    }

    let result = resp
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.swap_remove(0)) })
        .ok_or_else(|| ProviderError::Empty(symbol.to_string()))?;

    let closes = match result.indicators.adjclose.into_iter().next() {
        Some(adj) if !adj.adjclose.is_empty() => adj.adjclose,
        _ => result
            .indicators
            .quote
            .into_iter()
            .next()
            .map(|q| q.close)
            .unwrap_or_default(),
    };

    let out: Vec<DailyClose> = result
        .timestamp
        .iter()
        .zip(closes)
        .filter_map(|(&ts, close)| {
            let close = close?;
            let timestamp = DateTime::<Utc>::from_timestamp(ts, 0)?;
            Some(DailyClose { timestamp, close })
        })
        .collect();

    if out.is_empty() {
        return Err(ProviderError::Empty(symbol.to_string()));
    }
    Ok(out)
}

#[async_trait]
impl HistoricalPriceSource for YahooSource {
    async fn daily_closes(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyClose>, ProviderError> {
        let url = self.chart_url(symbol, start, end)?;
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        parse_chart(symbol, &body)
    }
}
