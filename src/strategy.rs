use chrono::{NaiveTime, Timelike};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::signal::{Action, RawSignal, SignalKind};
use crate::stats::{ratio, RatioTracker};

// Exchange liquidity blackout: no evaluation between these instants,
// regardless of the enumerated window set.
const BLACKOUT_START: (u32, u32) = (13, 0);
const BLACKOUT_END: (u32, u32) = (14, 30);

const MAX_CONFIDENCE: f64 = 0.9;

/// Signal confidence grows with divergence and saturates at 0.9.
pub fn confidence_for(z: f64) -> f64 {
    (z.abs() / 3.0).min(MAX_CONFIDENCE)
}

/// Low-duty-cycle evaluation gate. The detector runs only when the local
/// exchange time matches one of the enumerated (hour, minute) instants
/// exactly; an instant falling inside the blackout never fires.
#[derive(Debug, Clone)]
pub struct TradingWindow {
    instants: Vec<(u32, u32)>,
}

impl TradingWindow {
    pub fn new(instants: Vec<(u32, u32)>) -> Self {
        Self { instants }
    }

    pub fn default_instants() -> Vec<(u32, u32)> {
        vec![
            (10, 0),
            (10, 30),
            (11, 0),
            (11, 30),
            (12, 0),
            (12, 30),
            (13, 30),
            (14, 0),
            (15, 0),
            (15, 30),
            (16, 0),
            (16, 30),
            (17, 0),
            (17, 30),
            (18, 0),
        ]
    }

    pub fn is_open(&self, time: NaiveTime) -> bool {
        let hm = (time.hour(), time.minute());
        if hm >= BLACKOUT_START && hm <= BLACKOUT_END {
            return false;
        }
        self.instants.contains(&hm)
    }
}

impl Default for TradingWindow {
    fn default() -> Self {
        Self::new(Self::default_instants())
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// |z| must exceed this to signal.
    pub entry_z: f64,
    /// Minimum aligned historical samples before any signal.
    pub min_samples: usize,
    /// Per-leg level suggestions, as fractions of the entry price.
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            entry_z: 2.0,
            min_samples: 20,
            stop_loss_pct: dec!(0.015),
            take_profit_pct: dec!(0.03),
        }
    }
}

/// Z-score pair-divergence detector over the rolling ratio statistics.
#[derive(Debug)]
pub struct PairDetector {
    cfg: DetectorConfig,
    tracker: RatioTracker,
}

impl PairDetector {
    pub fn new(cfg: DetectorConfig, history_window: usize) -> Self {
        Self {
            cfg,
            tracker: RatioTracker::new(history_window),
        }
    }

    pub fn tracker(&self) -> &RatioTracker {
        &self.tracker
    }

    /// Records both prices, then emits a paired SELL/BUY candidate when the
    /// current ratio diverges beyond the entry threshold. Degenerate inputs
    /// (thin history, flat ratio series) produce no signals, not errors.
    pub fn analyze_pair(
        &mut self,
        ticker_a: &str,
        ticker_b: &str,
        price_a: Decimal,
        price_b: Decimal,
    ) -> Vec<RawSignal> {
        let pa = price_a.to_f64().unwrap_or(0.0);
        let pb = price_b.to_f64().unwrap_or(0.0);
        self.tracker.record(ticker_a, pa);
        self.tracker.record(ticker_b, pb);

        if self.tracker.aligned_len(ticker_a, ticker_b) < self.cfg.min_samples {
            return Vec::new();
        }
        let Some((mean, stdev)) = self.tracker.pair_stats(ticker_a, ticker_b) else {
            return Vec::new();
        };
        if stdev == 0.0 {
            return Vec::new();
        }

        let current_ratio = ratio(pa, pb);
        let z = (current_ratio - mean) / stdev;
        let confidence = confidence_for(z);

        if z > self.cfg.entry_z {
            // ticker_a rich relative to ticker_b
            vec![
                self.leg(Action::Sell, ticker_a, ticker_b, price_a, z, confidence),
                self.leg(Action::Buy, ticker_b, ticker_a, price_b, z, confidence),
            ]
        } else if z < -self.cfg.entry_z {
            vec![
                self.leg(Action::Buy, ticker_a, ticker_b, price_a, z, confidence),
                self.leg(Action::Sell, ticker_b, ticker_a, price_b, z, confidence),
            ]
        } else {
            Vec::new()
        }
    }

    fn leg(
        &self,
        action: Action,
        ticker: &str,
        paired: &str,
        price: Decimal,
        z: f64,
        confidence: f64,
    ) -> RawSignal {
        let (suggested_stop, suggested_take) = match action {
            Action::Buy => (
                price * (Decimal::ONE - self.cfg.stop_loss_pct),
                price * (Decimal::ONE + self.cfg.take_profit_pct),
            ),
            Action::Sell => (
                price * (Decimal::ONE + self.cfg.stop_loss_pct),
                price * (Decimal::ONE - self.cfg.take_profit_pct),
            ),
        };
        let relation = match action {
            Action::Sell => "overpriced",
            Action::Buy => "underpriced",
        };
        RawSignal {
            action: Some(action),
            ticker: ticker.to_string(),
            price,
            confidence,
            reason: format!(
                "{} {} relative to {} (z-score: {:.2})",
                ticker, relation, paired, z
            ),
            suggested_stop,
            suggested_take,
            kind: SignalKind::PairDivergence {
                paired_ticker: paired.to_string(),
                z_score: z,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromPrimitive;

    fn detector() -> PairDetector {
        PairDetector::new(DetectorConfig::default(), 100)
    }

    /// Seeds `n` aligned samples whose ratio series has a known mean and a
    /// small spread, then returns (mean, stdev) for assertion math.
    fn seed_history(detector: &mut PairDetector, n: usize) -> (f64, f64) {
        // alternate ratios 2.0 and 2.02 around a 100/50 base
        for i in 0..n {
            let a = if i % 2 == 0 { 100.0 } else { 101.0 };
            detector.analyze_pair(
                "AAA",
                "BBB",
                Decimal::from_f64(a).unwrap(),
                Decimal::from_f64(50.0).unwrap(),
            );
        }
        detector.tracker().pair_stats("AAA", "BBB").unwrap()
    }

    fn price_for_z(mean: f64, stdev: f64, z: f64) -> f64 {
        (mean + z * stdev) * 50.0
    }

    #[test]
    fn no_signal_below_min_samples() {
        let mut det = detector();
        for _ in 0..19 {
            let signals =
                det.analyze_pair("AAA", "BBB", Decimal::from(1000), Decimal::from(1));
            assert!(signals.is_empty());
        }
    }

    #[test]
    fn no_signal_when_stdev_is_zero() {
        let mut det = detector();
        for _ in 0..30 {
            let signals = det.analyze_pair("AAA", "BBB", Decimal::from(100), Decimal::from(50));
            assert!(signals.is_empty());
        }
    }

    #[test]
    fn z_inside_band_yields_no_signal() {
        let mut det = detector();
        let (mean, stdev) = seed_history(&mut det, 40);
        // the probe sample itself shifts the stats, so aim well inside
        // the band
        let price = price_for_z(mean, stdev, 1.0);
        let signals = det.analyze_pair(
            "AAA",
            "BBB",
            Decimal::from_f64(price).unwrap(),
            Decimal::from(50),
        );
        assert!(signals.is_empty());
    }

    #[test]
    fn positive_divergence_sells_a_buys_b() {
        let mut det = detector();
        let (mean, stdev) = seed_history(&mut det, 40);
        let price = price_for_z(mean, stdev, 4.0);
        let signals = det.analyze_pair(
            "AAA",
            "BBB",
            Decimal::from_f64(price).unwrap(),
            Decimal::from(50),
        );
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].action, Some(Action::Sell));
        assert_eq!(signals[0].ticker, "AAA");
        assert_eq!(signals[1].action, Some(Action::Buy));
        assert_eq!(signals[1].ticker, "BBB");
        match &signals[0].kind {
            SignalKind::PairDivergence { paired_ticker, z_score } => {
                assert_eq!(paired_ticker, "BBB");
                assert!(*z_score > 2.0);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn negative_divergence_buys_a_sells_b() {
        let mut det = detector();
        let (mean, stdev) = seed_history(&mut det, 40);
        let price = price_for_z(mean, stdev, -4.0);
        let signals = det.analyze_pair(
            "AAA",
            "BBB",
            Decimal::from_f64(price).unwrap(),
            Decimal::from(50),
        );
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].action, Some(Action::Buy));
        assert_eq!(signals[0].ticker, "AAA");
        assert_eq!(signals[1].action, Some(Action::Sell));
        assert_eq!(signals[1].ticker, "BBB");
    }

    #[test]
    fn confidence_follows_z_over_three() {
        assert!((confidence_for(2.5) - 0.8333333333333334).abs() < 1e-9);
        assert!((confidence_for(-2.5) - 0.8333333333333334).abs() < 1e-9);
        assert_eq!(confidence_for(4.0), 0.9);
        assert!((confidence_for(2.1) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn emitted_confidence_matches_reported_z() {
        let mut det = detector();
        let (mean, stdev) = seed_history(&mut det, 40);
        let price = price_for_z(mean, stdev, 3.0);
        let signals = det.analyze_pair(
            "AAA",
            "BBB",
            Decimal::from_f64(price).unwrap(),
            Decimal::from(50),
        );
        assert_eq!(signals.len(), 2);
        let SignalKind::PairDivergence { z_score, .. } = &signals[0].kind else {
            panic!("expected pair-divergence provenance");
        };
        assert!((signals[0].confidence - confidence_for(*z_score)).abs() < 1e-12);
    }

    #[test]
    fn confidence_caps_at_point_nine() {
        // confidence = min(0.9, |z|/3): 2.5 -> ~0.833, huge z -> 0.9
        let mut det = detector();
        let (mean, stdev) = seed_history(&mut det, 40);
        let price = price_for_z(mean, stdev, 40.0);
        let signals = det.analyze_pair(
            "AAA",
            "BBB",
            Decimal::from_f64(price).unwrap(),
            Decimal::from(50),
        );
        assert_eq!(signals[0].confidence, 0.9);
    }

    #[test]
    fn buy_leg_targets_above_entry_sell_leg_below() {
        let mut det = detector();
        let (mean, stdev) = seed_history(&mut det, 40);
        let price = price_for_z(mean, stdev, 4.0);
        let signals = det.analyze_pair(
            "AAA",
            "BBB",
            Decimal::from_f64(price).unwrap(),
            Decimal::from(50),
        );
        let sell = &signals[0];
        let buy = &signals[1];
        assert!(sell.suggested_take < sell.price);
        assert!(sell.suggested_stop > sell.price);
        assert!(buy.suggested_take > buy.price);
        assert!(buy.suggested_stop < buy.price);
    }

    #[test]
    fn window_matches_enumerated_instants_only() {
        let window = TradingWindow::default();
        assert!(window.is_open(NaiveTime::from_hms_opt(10, 0, 0).unwrap()));
        assert!(window.is_open(NaiveTime::from_hms_opt(10, 0, 59).unwrap()));
        assert!(!window.is_open(NaiveTime::from_hms_opt(10, 1, 0).unwrap()));
        assert!(!window.is_open(NaiveTime::from_hms_opt(9, 59, 0).unwrap()));
    }

    #[test]
    fn blackout_blocks_enumerated_instants() {
        // 13:30 and 14:00 are in the default set but inside the blackout
        let window = TradingWindow::default();
        assert!(!window.is_open(NaiveTime::from_hms_opt(13, 30, 0).unwrap()));
        assert!(!window.is_open(NaiveTime::from_hms_opt(14, 0, 0).unwrap()));
        assert!(!window.is_open(NaiveTime::from_hms_opt(14, 30, 0).unwrap()));
        assert!(window.is_open(NaiveTime::from_hms_opt(15, 0, 0).unwrap()));
    }
}
