use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

#[derive(Debug)]
pub enum FeedError {
    Io(String),
    Parse(String),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FeedError::Io(e) => write!(f, "Feed IO error: {}", e),
            FeedError::Parse(e) => write!(f, "Feed parse error: {}", e),
        }
    }
}

impl std::error::Error for FeedError {}

/// Price resolver consumed by the engine. The only suspension point in a
/// cycle sits behind this trait.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Current price for a ticker, or None when the feed does not know it.
    async fn latest_price(&self, ticker: &str) -> Result<Option<Decimal>, FeedError>;

    /// Advances feed-driven time by one step. Live feeds always have a
    /// next step; a replay returns false once the data is exhausted.
    async fn advance(&self) -> Result<bool, FeedError> {
        Ok(true)
    }

    /// Feed-provided wall clock in epoch seconds (replay timestamps).
    fn current_timestamp_secs(&self) -> Option<i64> {
        None
    }
}

// Mirrors one line of the JSONL dump file.
#[derive(Debug, Clone, Deserialize)]
struct ReplayEntry {
    timestamp: i64,
    prices: HashMap<String, Decimal>,
}

/// Replays a recorded JSONL price dump, one entry per step.
#[derive(Debug)]
pub struct ReplayFeed {
    entries: Vec<ReplayEntry>,
    cursor: AtomicUsize,
}

impl ReplayFeed {
    pub fn new(path: &str) -> Result<Self, FeedError> {
        let file =
            File::open(path).map_err(|e| FeedError::Io(format!("failed to open {}: {}", path, e)))?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for line in reader.lines() {
            let line = line.map_err(|e| FeedError::Io(format!("failed to read {}: {}", path, e)))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ReplayEntry = serde_json::from_str(&line)
                .map_err(|e| FeedError::Parse(format!("bad replay entry '{}': {}", line, e)))?;
            entries.push(entry);
        }

        if entries.is_empty() {
            return Err(FeedError::Parse(format!(
                "replay file {} is empty or invalid",
                path
            )));
        }
        Ok(Self {
            entries,
            cursor: AtomicUsize::new(0),
        })
    }

    fn current(&self) -> &ReplayEntry {
        let cursor = self
            .cursor
            .load(AtomicOrdering::SeqCst)
            .min(self.entries.len() - 1);
        &self.entries[cursor]
    }
}

#[async_trait]
impl PriceFeed for ReplayFeed {
    async fn latest_price(&self, ticker: &str) -> Result<Option<Decimal>, FeedError> {
        Ok(self.current().prices.get(ticker).copied())
    }

    async fn advance(&self) -> Result<bool, FeedError> {
        let cursor = self.cursor.load(AtomicOrdering::SeqCst);
        if cursor < self.entries.len() - 1 {
            self.cursor.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn current_timestamp_secs(&self) -> Option<i64> {
        Some(self.current().timestamp / 1000) // stored as ms
    }
}

struct SyntheticState {
    prices: HashMap<String, f64>,
    rng: StdRng,
}

/// Gaussian random-walk prices for dry runs without any market data.
pub struct SyntheticFeed {
    step: Normal<f64>,
    state: Mutex<SyntheticState>,
}

impl SyntheticFeed {
    pub fn new(
        seeds: impl IntoIterator<Item = (String, Decimal)>,
        step_sigma: f64,
    ) -> Result<Self, FeedError> {
        let step = Normal::new(0.0, step_sigma)
            .map_err(|e| FeedError::Parse(format!("invalid step sigma {}: {}", step_sigma, e)))?;
        let prices = seeds
            .into_iter()
            .map(|(ticker, price)| (ticker, price.to_f64().unwrap_or(0.0)))
            .collect();
        Ok(Self {
            step,
            state: Mutex::new(SyntheticState {
                prices,
                rng: StdRng::from_entropy(),
            }),
        })
    }
}

#[async_trait]
impl PriceFeed for SyntheticFeed {
    async fn latest_price(&self, ticker: &str) -> Result<Option<Decimal>, FeedError> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        Ok(state.prices.get(ticker).and_then(|&p| Decimal::from_f64(p)))
    }

    async fn advance(&self) -> Result<bool, FeedError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let SyntheticState { prices, rng } = &mut *state;
        for price in prices.values_mut() {
            let step = self.step.sample(rng);
            *price = (*price * (1.0 + step)).max(0.01);
        }
        Ok(true)
    }
}
