use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{Error, Result};

/// A named candle column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandleField {
    Open,
    High,
    Low,
    Close,
    Volume,
    OpenTime,
    CloseTime,
    TradeCount,
    Vwap,
}

impl FromStr for CandleField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(CandleField::Open),
            "high" => Ok(CandleField::High),
            "low" => Ok(CandleField::Low),
            "close" => Ok(CandleField::Close),
            "volume" => Ok(CandleField::Volume),
            "openTime" | "open_time" => Ok(CandleField::OpenTime),
            "closeTime" | "close_time" => Ok(CandleField::CloseTime),
            "tradeCount" | "trade_count" => Ok(CandleField::TradeCount),
            "vwap" => Ok(CandleField::Vwap),
            other => Err(Error::Config(format!("unknown candle field '{other}'"))),
        }
    }
}

/// One OHLCV bucket, used when merging new data into a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: Option<f64>,
    pub vwap: Option<f64>,
}

/// Parallel candle columns indexed `0..len`, oldest first.
///
/// All columns always have the same length; optional columns hold `NaN`
/// where the source did not provide a value. `open_time` is the designated
/// time field and never decreases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleSeries {
    pub open_time: Vec<i64>,
    pub close_time: Vec<i64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    #[serde(default)]
    pub trade_count: Vec<f64>,
    #[serde(default)]
    pub vwap: Vec<f64>,
}

impl CandleSeries {
    pub fn from_candles(candles: impl IntoIterator<Item = Candle>) -> Self {
        let mut series = Self::default();
        series.merge(candles);
        series
    }

    pub fn len(&self) -> usize {
        self.open_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open_time.is_empty()
    }

    /// Numeric value of `field` at `index`. `None` past the end or where an
    /// optional column has no value.
    pub fn value(&self, field: CandleField, index: usize) -> Option<f64> {
        let v = match field {
            CandleField::OpenTime => *self.open_time.get(index)? as f64,
            CandleField::CloseTime => *self.close_time.get(index)? as f64,
            CandleField::Open => *self.open.get(index)?,
            CandleField::High => *self.high.get(index)?,
            CandleField::Low => *self.low.get(index)?,
            CandleField::Close => *self.close.get(index)?,
            CandleField::Volume => *self.volume.get(index)?,
            CandleField::TradeCount => *self.trade_count.get(index)?,
            CandleField::Vwap => *self.vwap.get(index)?,
        };
        (!v.is_nan()).then_some(v)
    }

    /// Whole column as `f64`, the input form indicators consume.
    pub fn column(&self, field: CandleField) -> Vec<f64> {
        match field {
            CandleField::OpenTime => self.open_time.iter().map(|&t| t as f64).collect(),
            CandleField::CloseTime => self.close_time.iter().map(|&t| t as f64).collect(),
            CandleField::Open => self.open.clone(),
            CandleField::High => self.high.clone(),
            CandleField::Low => self.low.clone(),
            CandleField::Close => self.close.clone(),
            CandleField::Volume => self.volume.clone(),
            CandleField::TradeCount => self.trade_count.clone(),
            CandleField::Vwap => self.vwap.clone(),
        }
    }

    /// Timestamp (open time, ms) of the candle at `index`.
    pub fn time(&self, index: usize) -> Option<i64> {
        self.open_time.get(index).copied()
    }

    pub fn last_time(&self) -> Option<i64> {
        self.open_time.last().copied()
    }

    /// Merge candles at the tail. A candle whose open time already exists
    /// replaces it; a newer one is appended; an older unknown one is ignored.
    /// Returns the number of appended candles.
    pub fn merge(&mut self, candles: impl IntoIterator<Item = Candle>) -> usize {
        let mut appended = 0;
        for candle in candles {
            match self.last_time() {
                Some(last) if candle.open_time <= last => {
                    if let Ok(i) = self.open_time.binary_search(&candle.open_time) {
                        self.set(i, candle);
                    }
                }
                _ => {
                    self.push(candle);
                    appended += 1;
                }
            }
        }
        appended
    }

    /// Candles `[from, to)` as owned rows.
    pub fn slice(&self, from: usize, to: usize) -> Vec<Candle> {
        (from..to.min(self.len())).map(|i| self.candle(i)).collect()
    }

    fn candle(&self, i: usize) -> Candle {
        let optional = |col: &Vec<f64>| col.get(i).copied().filter(|v| !v.is_nan());
        Candle {
            open_time: self.open_time[i],
            close_time: self.close_time[i],
            open: self.open[i],
            high: self.high[i],
            low: self.low[i],
            close: self.close[i],
            volume: self.volume[i],
            trade_count: optional(&self.trade_count),
            vwap: optional(&self.vwap),
        }
    }

    fn push(&mut self, c: Candle) {
        self.open_time.push(c.open_time);
        self.close_time.push(c.close_time);
        self.open.push(c.open);
        self.high.push(c.high);
        self.low.push(c.low);
        self.close.push(c.close);
        self.volume.push(c.volume);
        self.trade_count.push(c.trade_count.unwrap_or(f64::NAN));
        self.vwap.push(c.vwap.unwrap_or(f64::NAN));
    }

    fn set(&mut self, i: usize, c: Candle) {
        self.close_time[i] = c.close_time;
        self.open[i] = c.open;
        self.high[i] = c.high;
        self.low[i] = c.low;
        self.close[i] = c.close;
        self.volume[i] = c.volume;
        self.trade_count[i] = c.trade_count.unwrap_or(f64::NAN);
        self.vwap[i] = c.vwap.unwrap_or(f64::NAN);
    }

    /// Check the parallel-array invariants of a series loaded from outside.
    /// Missing optional columns are padded with `NaN`.
    pub fn validate(&mut self) -> Result<()> {
        let n = self.len();
        for col in [&mut self.trade_count, &mut self.vwap] {
            if col.is_empty() {
                col.resize(n, f64::NAN);
            }
        }
        let lengths = [
            self.close_time.len(),
            self.open.len(),
            self.high.len(),
            self.low.len(),
            self.close.len(),
            self.volume.len(),
            self.trade_count.len(),
            self.vwap.len(),
        ];
        if lengths.iter().any(|&l| l != n) {
            return Err(Error::Config(format!(
                "candle columns have unequal lengths (openTime has {n})"
            )));
        }
        if self.open_time.windows(2).any(|w| w[1] < w[0]) {
            return Err(Error::Config("candle open times are not ordered".into()));
        }
        Ok(())
    }
}

/// A candle series plus what is needed to keep it fresh.
#[derive(Debug, Clone)]
pub struct Chart {
    pub name: String,
    pub symbol: String,
    /// Duration of one candle.
    pub interval: Duration,
    /// How old the data may get before a refresh is due.
    pub poll: Duration,
    pub series: CandleSeries,
    pub last_sync: Option<DateTime<Utc>>,
}

impl Chart {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            interval,
            poll: interval,
            series: CandleSeries::default(),
            last_sync: None,
        }
    }

    pub fn with_series(mut self, series: CandleSeries) -> Self {
        self.series = series;
        self
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.last_sync {
            None => true,
            Some(last) => (now - last).to_std().map_or(false, |age| age >= self.poll),
        }
    }

    /// Number of candles covering `window`, rounded up.
    pub fn candles_in(&self, window: Duration) -> usize {
        let step = self.interval.as_millis();
        if step == 0 {
            return self.series.len();
        }
        window.as_millis().div_ceil(step) as usize
    }
}

pub type SharedChart = Arc<RwLock<Chart>>;

/// All charts known to the process, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ChartBook {
    charts: HashMap<String, SharedChart>,
}

impl ChartBook {
    pub fn insert(&mut self, chart: Chart) -> SharedChart {
        let name = chart.name.clone();
        let shared = Arc::new(RwLock::new(chart));
        self.charts.insert(name, shared.clone());
        shared
    }

    pub fn get(&self, name: &str) -> Result<&SharedChart> {
        self.charts
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown chart '{name}'")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.charts.keys().map(String::as_str)
    }
}

/// Upstream data refresh for a chart.
///
/// Implementations append or merge new candles at the tail of
/// `chart.series` and must be idempotent over overlapping time ranges.
#[async_trait]
pub trait ChartSync: Send + Sync {
    async fn sync_chart(&self, chart: &mut Chart) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(t: i64, close: f64) -> Candle {
        Candle {
            open_time: t,
            close_time: t + 59_999,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            trade_count: None,
            vwap: None,
        }
    }

    #[test]
    fn merge_appends_replaces_and_ignores_older() {
        let mut s = CandleSeries::from_candles([candle(60_000, 1.0), candle(120_000, 2.0)]);
        let appended = s.merge([candle(120_000, 2.5), candle(180_000, 3.0), candle(0, 9.0)]);
        assert_eq!(appended, 1);
        assert_eq!(s.close, vec![1.0, 2.5, 3.0]);
        assert_eq!(s.open_time, vec![60_000, 120_000, 180_000]);
        assert_eq!(s.vwap.len(), 3);
    }

    #[test]
    fn missing_optional_values_resolve_to_none() {
        let s = CandleSeries::from_candles([candle(0, 1.0)]);
        assert_eq!(s.value(CandleField::Close, 0), Some(1.0));
        assert_eq!(s.value(CandleField::Vwap, 0), None);
        assert_eq!(s.value(CandleField::Close, 1), None);
        assert_eq!(s.value(CandleField::CloseTime, 0), Some(59_999.0));
    }

    #[test]
    fn validate_pads_optional_columns_and_checks_order() {
        let mut s = CandleSeries {
            open_time: vec![0, 60_000],
            close_time: vec![59_999, 119_999],
            open: vec![1.0, 2.0],
            high: vec![1.0, 2.0],
            low: vec![1.0, 2.0],
            close: vec![1.0, 2.0],
            volume: vec![1.0, 1.0],
            ..Default::default()
        };
        s.validate().unwrap();
        assert_eq!(s.trade_count.len(), 2);

        s.open_time = vec![60_000, 0];
        assert!(s.validate().is_err());
        s.open_time = vec![0];
        assert!(s.validate().is_err());
    }

    #[test]
    fn window_converts_to_candle_count() {
        let chart = Chart::new("btc-1m", "BTCUSDT", Duration::from_secs(60));
        assert_eq!(chart.candles_in(Duration::from_secs(600)), 10);
        assert_eq!(chart.candles_in(Duration::from_secs(630)), 11);
    }

    #[test]
    fn staleness_follows_poll_interval() {
        let mut chart = Chart::new("btc-1m", "BTCUSDT", Duration::from_secs(60));
        let now = Utc::now();
        assert!(chart.is_stale(now));
        chart.last_sync = Some(now - chrono::Duration::seconds(30));
        assert!(!chart.is_stale(now));
        chart.last_sync = Some(now - chrono::Duration::seconds(61));
        assert!(chart.is_stale(now));
    }
}
