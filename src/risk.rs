use once_cell::sync::Lazy;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};

use crate::config::ConfigError;
use crate::signal::{Action, RawSignal, Sentiment, SignalKind, SizedOrder};

/// Minimum tradable lots per ticker (MOEX board lots). Tickers missing
/// from the table trade in single shares.
pub static DEFAULT_LOT_SIZES: Lazy<HashMap<&'static str, u64>> = Lazy::new(|| {
    HashMap::from([
        ("SBER", 10),
        ("GAZP", 10),
        ("LKOH", 1),
        ("ROSN", 10),
        ("NVTK", 1),
        ("GMKN", 1),
        ("PLZL", 1),
        ("POLY", 1),
        ("TATN", 1),
        ("ALRS", 10),
        ("CHMF", 10),
        ("NLMK", 1),
        ("MAGN", 10),
        ("SNGS", 100),
        ("VTBR", 10_000),
        ("TCSG", 1),
        ("MTSS", 10),
        ("AFKS", 100),
        ("FEES", 100),
        ("MGNT", 1),
        ("FIVE", 1),
        ("YNDX", 1),
        ("OZON", 1),
        ("MOEX", 10),
        ("RTKM", 100),
        ("PHOR", 1),
        ("TRNFP", 1),
        ("BANE", 10),
    ])
});

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Fraction of capital risked per trade (0.015 = 1.5%).
    pub risk_per_trade: Decimal,
    /// Per-ticker exposure cap as a fraction of capital.
    pub max_risk_per_ticker: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    /// Floor for deriving an action from a sentiment classification.
    pub min_confidence: f64,
    pub lot_sizes: HashMap<String, u64>,
    /// Tickers permitted to be sold without a long position. Empty by
    /// default: no new short positions, ever.
    pub short_allow: HashSet<String>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: dec!(0.015),
            max_risk_per_ticker: dec!(0.045),
            stop_loss_pct: dec!(0.015),
            take_profit_pct: dec!(0.03),
            min_confidence: 0.6,
            lot_sizes: DEFAULT_LOT_SIZES
                .iter()
                .map(|(t, l)| (t.to_string(), *l))
                .collect(),
            short_allow: HashSet::new(),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("risk_per_trade", self.risk_per_trade),
            ("max_risk_per_ticker", self.max_risk_per_ticker),
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ] {
            if value < Decimal::ZERO {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be non-negative, got {}",
                    name, value
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::InvalidValue(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        for (ticker, lot) in &self.lot_sizes {
            if *lot == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "lot size for {} must be at least 1",
                    ticker
                )));
            }
        }
        Ok(())
    }

    pub fn lot_size(&self, ticker: &str) -> u64 {
        self.lot_sizes.get(ticker).copied().unwrap_or(1)
    }
}

/// Converts raw signals into lot-rounded, capital-constrained orders.
/// Pure: no state beyond the validated configuration.
#[derive(Debug)]
pub struct RiskSizer {
    cfg: RiskConfig,
}

impl RiskSizer {
    pub fn new(cfg: RiskConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.cfg
    }

    /// Sizes one signal against the current price and ledger capital.
    /// Every "no trade" outcome is a None, never an error.
    pub fn prepare_order(
        &self,
        signal: &RawSignal,
        ticker: &str,
        price: Decimal,
        capital: Decimal,
    ) -> Option<SizedOrder> {
        let action = self.resolve_action(signal)?;

        if action == Action::Sell && !self.cfg.short_allow.contains(ticker) {
            log::debug!("[RISK] {} sell suppressed: short selling not allowed", ticker);
            return None;
        }
        if price <= Decimal::ZERO || capital <= Decimal::ZERO {
            return None;
        }

        let (stop_loss, take_profit) = match action {
            Action::Buy => (
                price * (Decimal::ONE - self.cfg.stop_loss_pct),
                price * (Decimal::ONE + self.cfg.take_profit_pct),
            ),
            Action::Sell => (
                price * (Decimal::ONE + self.cfg.stop_loss_pct),
                price * (Decimal::ONE - self.cfg.take_profit_pct),
            ),
        };
        // entry-to-stop gap in the adverse direction
        let stop_distance = match action {
            Action::Buy => price - stop_loss,
            Action::Sell => stop_loss - price,
        };
        if stop_distance <= Decimal::ZERO {
            return None;
        }

        let risk_money = capital * self.cfg.risk_per_trade;
        let raw_shares = (risk_money / stop_distance).floor().to_u64()?;
        let max_shares = (capital * self.cfg.max_risk_per_ticker / price)
            .floor()
            .to_u64()?;

        let lot = self.cfg.lot_size(ticker);
        let shares = raw_shares.min(max_shares) / lot * lot;
        if shares < lot {
            log::debug!(
                "[RISK] {} {} sized below one lot ({} < {}); skipping",
                action,
                ticker,
                shares,
                lot
            );
            return None;
        }

        Some(SizedOrder {
            action,
            ticker: ticker.to_string(),
            size: shares,
            price,
            stop_loss,
            take_profit,
            stop_loss_pct: self.cfg.stop_loss_pct,
            take_profit_pct: self.cfg.take_profit_pct,
            reason: signal.reason.clone(),
            confidence: signal.confidence,
            strategy: signal.kind.strategy_label().to_string(),
            assisted: matches!(signal.kind, SignalKind::Classification { .. }),
        })
    }

    /// Explicit actions win; otherwise a sufficiently confident sentiment
    /// classification derives one. Neutral never trades.
    fn resolve_action(&self, signal: &RawSignal) -> Option<Action> {
        if let Some(action) = signal.action {
            return Some(action);
        }
        match &signal.kind {
            SignalKind::Classification { sentiment }
                if signal.confidence >= self.cfg.min_confidence =>
            {
                match sentiment {
                    Sentiment::Positive => Some(Action::Buy),
                    Sentiment::Negative => Some(Action::Sell),
                    Sentiment::Neutral => None,
                }
            }
            _ => None,
        }
    }
}
