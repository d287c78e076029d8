//! Yahoo Finance market-data source.
//!
//! Fetches bars from Yahoo's v8 chart API, including dividend and split
//! events. Handles retries with exponential backoff plus jitter, and response
//! parsing. Pacing between instruments is the caller's job (see `Pacer`).
//!
//! Yahoo Finance has no official API and is subject to unannounced format changes.

use super::{FetchRange, MarketDataSource, SourceError};
use crate::domain::{Interval, Record};
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    events: Option<ChartEvents>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ChartEvents {
    #[serde(default)]
    dividends: HashMap<String, DividendEvent>,
    #[serde(default)]
    splits: HashMap<String, SplitEvent>,
}

#[derive(Debug, Deserialize)]
struct DividendEvent {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct SplitEvent {
    date: i64,
    numerator: f64,
    denominator: f64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Request and shaping options for the Yahoo source.
#[derive(Debug, Clone, PartialEq)]
pub struct YahooOptions {
    /// Include pre/post market bars.
    pub prepost: bool,
    /// Scale OHLC by adjclose/close.
    pub auto_adjust: bool,
    /// Fill `Dividends` and `Stock Splits` (0.0 on days without events).
    pub actions: bool,
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound of the random delay added to each backoff.
    pub max_jitter: Duration,
    pub timeout: Duration,
}

impl Default for YahooOptions {
    fn default() -> Self {
        Self {
            prepost: false,
            auto_adjust: true,
            actions: true,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::from_millis(250),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Yahoo Finance source.
pub struct YahooSource {
    client: reqwest::blocking::Client,
    options: YahooOptions,
    base_url: String,
}

impl YahooSource {
    pub const NAME: &'static str = "yahoo_finance";

    pub fn new(options: YahooOptions) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(options.timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| SourceError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            options,
            base_url: "https://query2.finance.yahoo.com".to_string(),
        })
    }

    /// Point the source at another host (a local stub in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn options(&self) -> &YahooOptions {
        &self.options
    }

    /// Build the chart API URL for an instrument and range.
    fn chart_url(&self, instrument: &str, range: FetchRange, interval: Interval) -> String {
        let window = match range {
            FetchRange::EntireHistory => "range=max".to_string(),
            FetchRange::Since(start) => {
                // Exchanges east of UTC stamp the start day before its UTC midnight.
                let start_ts = (start - chrono::Duration::days(1))
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc().timestamp())
                    .unwrap_or_default();
                let end_ts = Utc::now().timestamp();
                format!("period1={start_ts}&period2={end_ts}")
            }
        };
        format!(
            "{}/v8/finance/chart/{instrument}?{window}&interval={interval}\
             &events=div,split&includePrePost={}&includeAdjustedClose=true",
            self.base_url, self.options.prepost
        )
    }

    /// Parse the chart API response into records.
    ///
    /// A response without timestamps means "no bars in the window" and yields
    /// an empty vector.
    fn parse_response(
        instrument: &str,
        resp: ChartResponse,
        options: &YahooOptions,
    ) -> Result<Vec<Record>, SourceError> {
        let result = resp.chart.result.ok_or_else(|| {
            if let Some(err) = resp.chart.error {
                if err.code == "Not Found" {
                    SourceError::InstrumentNotFound {
                        instrument: instrument.to_string(),
                    }
                } else {
                    SourceError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
                }
            } else {
                SourceError::ResponseFormatChanged("empty result with no error".into())
            }
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::ResponseFormatChanged("result array is empty".into()))?;

        let Some(timestamps) = data.timestamp else {
            return Ok(Vec::new());
        };

        let gmtoffset = data.meta.map(|m| m.gmtoffset).unwrap_or(0);
        let trading_date = |ts: i64| -> Result<NaiveDate, SourceError> {
            DateTime::from_timestamp(ts + gmtoffset, 0)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| SourceError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))
        };

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::ResponseFormatChanged("no quote data".into()))?;

        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);

        let events = data.events.unwrap_or_default();
        let mut dividends: HashMap<NaiveDate, f64> = HashMap::new();
        let mut splits: HashMap<NaiveDate, f64> = HashMap::new();
        if options.actions {
            for event in events.dividends.values() {
                *dividends.entry(trading_date(event.date)?).or_insert(0.0) += event.amount;
            }
            for event in events.splits.values() {
                if event.denominator != 0.0 {
                    splits.insert(trading_date(event.date)?, event.numerator / event.denominator);
                }
            }
        }

        let symbol = instrument.to_uppercase();
        let mut records = Vec::with_capacity(timestamps.len());

        for (i, &ts) in timestamps.iter().enumerate() {
            let date = trading_date(ts)?;

            let mut open = quote.open.get(i).copied().flatten();
            let mut high = quote.high.get(i).copied().flatten();
            let mut low = quote.low.get(i).copied().flatten();
            let mut close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();

            // Skip bars where all OHLCV are None (holidays/non-trading days)
            if open.is_none()
                && high.is_none()
                && low.is_none()
                && close.is_none()
                && volume.is_none()
            {
                continue;
            }

            if options.auto_adjust {
                let adj_close = adj_closes
                    .as_ref()
                    .and_then(|v| v.get(i).copied().flatten());
                if let (Some(adj), Some(raw)) = (adj_close, close) {
                    if raw != 0.0 {
                        let factor = adj / raw;
                        open = open.map(|v| v * factor);
                        high = high.map(|v| v * factor);
                        low = low.map(|v| v * factor);
                        close = Some(adj);
                    }
                }
            }

            let (dividend, split) = if options.actions {
                (
                    Some(dividends.get(&date).copied().unwrap_or(0.0)),
                    Some(splits.get(&date).copied().unwrap_or(0.0)),
                )
            } else {
                (None, None)
            };

            records.push(Record {
                date,
                open,
                high,
                low,
                close,
                volume,
                dividends: dividend,
                stock_splits: split,
                instrument: symbol.clone(),
            });
        }

        Ok(records)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let exp = self.options.base_delay.saturating_mul(factor);
        let jitter_ms = self.options.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        exp + Duration::from_millis(jitter)
    }

    /// Execute the request with retry logic.
    fn fetch_with_retry(&self, instrument: &str, url: &str) -> Result<Vec<Record>, SourceError> {
        let mut last_error = None;

        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                debug!(instrument, attempt, ?delay, "retrying Yahoo request");
                std::thread::sleep(delay);
            }

            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(SourceError::InstrumentNotFound {
                            instrument: instrument.to_string(),
                        });
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        warn!(instrument, retry_after, "rate limited by Yahoo");
                        last_error = Some(SourceError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status.is_server_error() {
                        last_error = Some(SourceError::Other(format!(
                            "HTTP {status} for {instrument}"
                        )));
                        continue;
                    }

                    if !status.is_success() {
                        return Err(SourceError::Other(format!("HTTP {status} for {instrument}")));
                    }

                    let chart: ChartResponse = resp.json().map_err(|e| {
                        SourceError::ResponseFormatChanged(format!(
                            "failed to parse response for {instrument}: {e}"
                        ))
                    })?;

                    return Self::parse_response(instrument, chart, &self.options);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(SourceError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(SourceError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SourceError::Other("max retries exceeded".into())))
    }
}

impl MarketDataSource for YahooSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fetch_history(
        &self,
        instrument: &str,
        range: FetchRange,
        interval: Interval,
    ) -> Result<Vec<Record>, SourceError> {
        let url = self.chart_url(instrument, range, interval);
        let mut records = self.fetch_with_retry(instrument, &url)?;

        match range {
            FetchRange::EntireHistory if records.is_empty() => {
                Err(SourceError::InstrumentNotFound {
                    instrument: instrument.to_string(),
                })
            }
            FetchRange::Since(start) => {
                // period1 opens a day early; trim back to the inclusive start
                records.retain(|r| r.date >= start);
                Ok(records)
            }
            FetchRange::EntireHistory => Ok(records),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "WEGE3.SA", "gmtoffset": -10800},
                "timestamp": [1704200400, 1704286800, 1704373200],
                "events": {
                    "dividends": {"1704286800": {"amount": 0.5, "date": 1704286800}},
                    "splits": {"1704373200": {"date": 1704373200, "numerator": 2, "denominator": 1, "splitRatio": "2:1"}}
                },
                "indicators": {
                    "quote": [{
                        "open":   [10.0, 11.0, null],
                        "high":   [10.5, 11.5, null],
                        "low":    [9.5, 10.5, null],
                        "close":  [10.0, 11.0, null],
                        "volume": [1000, 2000, null]
                    }],
                    "adjclose": [{"adjclose": [5.0, 11.0, null]}]
                }
            }],
            "error": null
        }
    }"#;

    fn parse(json: &str, options: &YahooOptions) -> Result<Vec<Record>, SourceError> {
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        YahooSource::parse_response("wege3.sa", resp, options)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn parses_bars_with_exchange_offset() {
        let records = parse(SAMPLE, &YahooOptions::default()).unwrap();
        // third bar is all-null and skipped
        assert_eq!(records.len(), 2);
        // 1704200400 is 2024-01-02 13:00 UTC, 10:00 in Sao Paulo
        assert_eq!(records[0].date, day(2));
        assert_eq!(records[1].date, day(3));
        assert_eq!(records[0].instrument, "WEGE3.SA");
    }

    #[test]
    fn auto_adjust_scales_ohlc() {
        let records = parse(SAMPLE, &YahooOptions::default()).unwrap();
        assert_eq!(records[0].close, Some(5.0));
        assert_eq!(records[0].open, Some(5.0));
        assert_eq!(records[0].high, Some(5.25));
        assert_eq!(records[0].volume, Some(1000));

        let raw = YahooOptions {
            auto_adjust: false,
            ..YahooOptions::default()
        };
        let records = parse(SAMPLE, &raw).unwrap();
        assert_eq!(records[0].close, Some(10.0));
    }

    #[test]
    fn actions_fill_dividends_and_splits() {
        let records = parse(SAMPLE, &YahooOptions::default()).unwrap();
        assert_eq!(records[0].dividends, Some(0.0));
        assert_eq!(records[1].dividends, Some(0.5));
        assert_eq!(records[0].stock_splits, Some(0.0));

        let no_actions = YahooOptions {
            actions: false,
            ..YahooOptions::default()
        };
        let records = parse(SAMPLE, &no_actions).unwrap();
        assert_eq!(records[1].dividends, None);
        assert_eq!(records[1].stock_splits, None);
    }

    #[test]
    fn missing_timestamps_mean_no_rows() {
        let json = r#"{"chart": {"result": [{"meta": {"gmtoffset": 0}, "indicators": {"quote": [{}]}}], "error": null}}"#;
        let records = parse(json, &YahooOptions::default()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn not_found_error_maps_to_instrument_not_found() {
        let json = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        let err = parse(json, &YahooOptions::default()).unwrap_err();
        assert!(matches!(err, SourceError::InstrumentNotFound { .. }));
    }

    #[test]
    fn other_chart_error_is_format_change() {
        let json = r#"{"chart": {"result": null, "error": {"code": "Bad Request", "description": "Invalid input"}}}"#;
        let err = parse(json, &YahooOptions::default()).unwrap_err();
        assert!(matches!(err, SourceError::ResponseFormatChanged(_)));
    }

    #[test]
    fn url_uses_range_max_for_entire_history() {
        let source = YahooSource::new(YahooOptions::default()).unwrap();
        let url = source.chart_url("IBM", FetchRange::EntireHistory, Interval::Week);
        assert!(url.contains("/v8/finance/chart/IBM?range=max&interval=1wk"));
        assert!(url.contains("events=div,split"));
        assert!(url.contains("includePrePost=false"));
    }

    #[test]
    fn url_period_opens_a_day_before_start() {
        let source = YahooSource::new(YahooOptions::default())
            .unwrap()
            .with_base_url("http://localhost:9");
        let url = source.chart_url("AIR.NZ", FetchRange::Since(day(2)), Interval::Day);
        // 2024-01-01T00:00:00Z, so a +13h bar for 2024-01-02 (stamped 2024-01-01T21:00Z) is inside
        assert!(url.starts_with("http://localhost:9/v8/finance/chart/AIR.NZ?period1=1704067200&period2="));
    }

    #[test]
    fn backoff_grows_and_stays_within_jitter() {
        let source = YahooSource::new(YahooOptions::default()).unwrap();
        for _ in 0..20 {
            let d1 = source.backoff(1);
            let d3 = source.backoff(3);
            assert!(d1 >= Duration::from_millis(500) && d1 <= Duration::from_millis(750));
            assert!(d3 >= Duration::from_millis(2000) && d3 <= Duration::from_millis(2250));
        }
    }

    #[test]
    fn backoff_saturates_on_large_attempts() {
        let source = YahooSource::new(YahooOptions::default()).unwrap();
        assert!(source.backoff(40) >= source.backoff(10));
    }
}
