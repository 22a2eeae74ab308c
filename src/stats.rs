use std::collections::{HashMap, VecDeque};

/// Price ratio with the degenerate-denominator rule: a zero denominator
/// yields a ratio of 0, not an error. Downstream gating (minimum sample
/// count, zero-stdev check) keeps such samples from signaling on their own.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Bounded per-ticker price histories and pairwise ratio statistics.
#[derive(Debug)]
pub struct RatioTracker {
    capacity: usize,
    histories: HashMap<String, VecDeque<f64>>,
}

impl RatioTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            histories: HashMap::new(),
        }
    }

    /// Appends a price to the ticker's history, evicting the oldest sample
    /// once the window is full. Always succeeds.
    pub fn record(&mut self, ticker: &str, price: f64) {
        let history = self
            .histories
            .entry(ticker.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(price);
    }

    pub fn history_len(&self, ticker: &str) -> usize {
        self.histories.get(ticker).map_or(0, |h| h.len())
    }

    /// Number of index-aligned samples the two histories share.
    pub fn aligned_len(&self, ticker_a: &str, ticker_b: &str) -> usize {
        self.history_len(ticker_a).min(self.history_len(ticker_b))
    }

    /// Mean and sample standard deviation of the aligned ratio series
    /// price(a)/price(b). Returns None when no aligned samples exist;
    /// the stdev is 0 when exactly one aligned sample exists.
    pub fn pair_stats(&self, ticker_a: &str, ticker_b: &str) -> Option<(f64, f64)> {
        let history_a = self.histories.get(ticker_a)?;
        let history_b = self.histories.get(ticker_b)?;

        let ratios: Vec<f64> = history_a
            .iter()
            .zip(history_b.iter())
            .map(|(&a, &b)| ratio(a, b))
            .collect();
        if ratios.is_empty() {
            return None;
        }

        let n = ratios.len();
        let mean = ratios.iter().sum::<f64>() / n as f64;
        let stdev = if n < 2 {
            0.0
        } else {
            let var = ratios
                .iter()
                .map(|r| {
                    let d = r - mean;
                    d * d
                })
                .sum::<f64>()
                / (n - 1) as f64;
            var.sqrt()
        };
        Some((mean, stdev))
    }
}
