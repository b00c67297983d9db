use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::debug;

use common::{Candle, Chart, ChartSync, Error, Result};

const BASE_URL: &str = "https://api.binance.com";

/// Candles requested when a chart has no history yet.
const INITIAL_LIMIT: u32 = 500;
/// Upper bound Binance accepts per request.
const MAX_LIMIT: u32 = 1000;

/// Public klines endpoint as a chart refresh source. No API key needed.
pub struct BinanceKlines {
    base_url: String,
    http: Client,
}

impl BinanceKlines {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    async fn fetch(&self, symbol: &str, interval: &str, start: Option<i64>) -> Result<Vec<Candle>> {
        let mut url = format!("{}/api/v3/klines?symbol={symbol}&interval={interval}", self.base_url);
        match start {
            Some(start) => url.push_str(&format!("&startTime={start}&limit={MAX_LIMIT}")),
            None => url.push_str(&format!("&limit={INITIAL_LIMIT}")),
        }

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        parse_klines(&body)
    }
}

#[async_trait]
impl ChartSync for BinanceKlines {
    /// Re-fetches from the last known candle so that a still-open candle is
    /// replaced by its final values.
    async fn sync_chart(&self, chart: &mut Chart) -> Result<()> {
        let interval = interval_code(chart.interval)?;
        let candles = self
            .fetch(&chart.symbol, interval, chart.series.last_time())
            .await?;
        let fetched = candles.len();
        let appended = chart.series.merge(candles);
        debug!(chart = %chart.name, fetched, appended, "Klines merged");
        Ok(())
    }
}

/// Binance's name for a candle duration.
pub fn interval_code(interval: Duration) -> Result<&'static str> {
    let code = match interval.as_secs() {
        60 => "1m",
        180 => "3m",
        300 => "5m",
        900 => "15m",
        1_800 => "30m",
        3_600 => "1h",
        7_200 => "2h",
        14_400 => "4h",
        21_600 => "6h",
        28_800 => "8h",
        43_200 => "12h",
        86_400 => "1d",
        259_200 => "3d",
        604_800 => "1w",
        _ => {
            return Err(Error::Config(format!(
                "no Binance kline interval for {interval:?}"
            )))
        }
    };
    Ok(code)
}

// ─── Response types ───────────────────────────────────────────────────────────

/// `[openTime, open, high, low, close, volume, closeTime, quoteVolume,
/// trades, takerBase, takerQuote, ignore]`
#[derive(Deserialize)]
struct KlineRow(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    u64,
    IgnoredAny,
    IgnoredAny,
    IgnoredAny,
);

fn number(field: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|e| Error::Exchange(format!("bad kline {field} '{raw}': {e}")))
}

fn parse_klines(body: &str) -> Result<Vec<Candle>> {
    let rows: Vec<KlineRow> =
        serde_json::from_str(body).map_err(|e| Error::Exchange(e.to_string()))?;
    rows.into_iter()
        .map(|KlineRow(open_time, open, high, low, close, volume, close_time, quote, trades, ..)| -> Result<Candle> {
            let volume = number("volume", &volume)?;
            let quote = number("quote volume", &quote)?;
            Ok(Candle {
                open_time,
                close_time,
                open: number("open", &open)?,
                high: number("high", &high)?,
                low: number("low", &low)?,
                close: number("close", &close)?,
                volume,
                trade_count: Some(trades as f64),
                vwap: (volume > 0.0).then(|| quote / volume),
            })
        })
        .collect()
}
