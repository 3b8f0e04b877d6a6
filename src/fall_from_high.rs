//! Fall-from-52-week-high metrics for a watchlist.
//!
//! Each instrument is fetched and evaluated on its own: a failure turns into a
//! [`SkipWarning`] and never aborts the rest of the run. Records come back in
//! watchlist order even though fetches run concurrently.

use crate::error::{FetchError, SkipCause, SkipWarning};
use crate::klines::{LookbackWindow, PriceHistorySource, PricePoint};
use crate::storage_utils::{FetchConfig, InstrumentConfig};
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;

/// Severity levels, in percent. A flag is set when `fall_pct <= level`.
pub const THRESHOLDS: [f64; 4] = [-10.0, -15.0, -20.0, -25.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct ThresholdFlags {
    pub pct_10: bool,
    pub pct_15: bool,
    pub pct_20: bool,
    pub pct_25: bool,
}

impl ThresholdFlags {
    /// Compares the unrounded fall, so -9.996 does not trip the 10% flag.
    pub fn from_fall(fall_pct: f64) -> Self {
        let [t10, t15, t20, t25] = THRESHOLDS;
        Self {
            pct_10: fall_pct <= t10,
            pct_15: fall_pct <= t15,
            pct_20: fall_pct <= t20,
            pct_25: fall_pct <= t25,
        }
    }

    pub fn as_array(self) -> [bool; 4] {
        [self.pct_10, self.pct_15, self.pct_20, self.pct_25]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallMetrics {
    pub current_price: f64,
    pub high_52w: f64,
    pub fall_pct: f64,
}

/// Values are kept at full precision; use the `rounded_*` accessors for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallRecord {
    pub symbol: String,
    pub display_name: String,
    pub current_price: f64,
    pub high_52w: f64,
    pub fall_pct: f64,
    pub flags: ThresholdFlags,
}

impl FallRecord {
    pub fn new(instrument: &InstrumentConfig, metrics: FallMetrics) -> Self {
        Self {
            symbol: instrument.symbol.clone(),
            display_name: instrument.display_name.clone(),
            current_price: metrics.current_price,
            high_52w: metrics.high_52w,
            fall_pct: metrics.fall_pct,
            flags: ThresholdFlags::from_fall(metrics.fall_pct),
        }
    }

    pub fn rounded_price(&self) -> f64 {
        round2(self.current_price)
    }

    pub fn rounded_high(&self) -> f64 {
        round2(self.high_52w)
    }

    pub fn rounded_fall(&self) -> f64 {
        round2(self.fall_pct)
    }
}

/// Two-decimal rounding of the exact binary value, ties to even (0.125 -> 0.12).
pub fn round2(value: f64) -> f64 {
    format!("{:.2}", value).parse().unwrap_or(value)
}

/// Derives current price, 52-week high and fall from a chronological series.
///
/// Returns `Ok(None)` for an empty series (nothing to show, not an error).
pub fn analyze_series(points: &[PricePoint]) -> Result<Option<FallMetrics>, SkipCause> {
    let Some(last) = points.last() else {
        return Ok(None);
    };

    let high_52w = points
        .iter()
        .map(|p| p.close)
        .fold(f64::NEG_INFINITY, f64::max);

    if !high_52w.is_finite() || high_52w <= 0.0 {
        return Err(SkipCause::DegenerateHigh { high: high_52w });
    }

    let current_price = last.close;
    let fall_pct = (current_price - high_52w) / high_52w * 100.0;

    Ok(Some(FallMetrics {
        current_price,
        high_52w,
        fall_pct,
    }))
}

/// Output of one run: records in watchlist order plus the instruments that were skipped with a warning.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FallReport {
    pub records: Vec<FallRecord>,
    pub warnings: Vec<SkipWarning>,
}

pub struct FallEngine<S> {
    source: S,
    window: LookbackWindow,
    timeout: Duration,
    concurrency: usize,
}

impl<S: PriceHistorySource> FallEngine<S> {
    pub fn new(source: S, cfg: &FetchConfig) -> Self {
        Self {
            source,
            window: LookbackWindow::new(cfg.lookback_days),
            timeout: Duration::from_secs(cfg.timeout_secs),
            concurrency: cfg.concurrency.max(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Evaluates every instrument. Never fails: bad instruments become warnings.
    pub async fn compute(&self, watchlist: &[InstrumentConfig]) -> FallReport {
        // Built eagerly; a borrowing stream `map` closure is not `Send` for `tokio::spawn`.
        let pending: Vec<_> = watchlist.iter().map(|i| self.evaluate(i)).collect();

        // `buffered` yields in input order, whatever order the fetches finish in.
        let outcomes: Vec<_> = futures::stream::iter(pending)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = FallReport::default();
        for (instrument, outcome) in watchlist.iter().zip(outcomes) {
            match outcome {
                Ok(Some(record)) => report.records.push(record),
                Ok(None) => {
                    tracing::debug!(symbol = %instrument.symbol, "no data in window, skipping");
                }
                Err(cause) => {
                    let warning = SkipWarning {
                        symbol: instrument.symbol.clone(),
                        cause,
                    };
                    tracing::warn!("{}", warning);
                    report.warnings.push(warning);
                }
            }
        }

        tracing::info!(
            records = report.records.len(),
            skipped = report.warnings.len(),
            "fall metrics computed"
        );
        report
    }

    async fn evaluate(
        &self,
        instrument: &InstrumentConfig,
    ) -> Result<Option<FallRecord>, SkipCause> {
        let fetch = self.source.fetch_history(&instrument.symbol, self.window);
        let series = match tokio::time::timeout(self.timeout, fetch).await {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout(self.timeout.as_millis() as u64).into()),
        };

        if series.is_empty() {
            return Ok(None);
        }
        tracing::debug!(symbol = %series.symbol, points = series.points.len(), "history fetched");

        Ok(analyze_series(&series.points)?.map(|metrics| FallRecord::new(instrument, metrics)))
    }
}
