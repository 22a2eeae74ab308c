use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
        }
    }
}

/// Outcome of an external news/event classification, consumed by the sizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Where a raw signal came from. Pair-divergence signals always carry an
/// explicit action; classification signals leave the action to the sizer.
#[derive(Debug, Clone)]
pub enum SignalKind {
    PairDivergence { paired_ticker: String, z_score: f64 },
    Classification { sentiment: Sentiment },
}

impl SignalKind {
    pub fn strategy_label(&self) -> &'static str {
        match self {
            SignalKind::PairDivergence { .. } => "pair-arbitrage",
            SignalKind::Classification { .. } => "news-classification",
        }
    }
}

/// Signal candidate produced per detection cycle. Ephemeral.
#[derive(Debug, Clone)]
pub struct RawSignal {
    pub action: Option<Action>,
    pub ticker: String,
    pub price: Decimal,
    pub confidence: f64,
    pub reason: String,
    /// Per-leg level suggestions (direction-dependent offsets from entry).
    pub suggested_stop: Decimal,
    pub suggested_take: Decimal,
    pub kind: SignalKind,
}

/// Risk-constrained order ready for the ledger. Never represents a short.
#[derive(Debug, Clone)]
pub struct SizedOrder {
    pub action: Action,
    pub ticker: String,
    /// Positive integer, multiple of the ticker's lot size.
    pub size: u64,
    pub price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub reason: String,
    pub confidence: f64,
    pub strategy: String,
    /// Opened by the classification pipeline; the ledger's partial
    /// profit-taking rule only applies to assisted positions.
    pub assisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    PartialProfit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExitReason::TakeProfit => write!(f, "take-profit"),
            ExitReason::StopLoss => write!(f, "stop-loss"),
            ExitReason::PartialProfit => write!(f, "partial profit-taking"),
        }
    }
}

/// Exit produced by the ledger's per-cycle scan, fed back as a SELL.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    pub ticker: String,
    pub size: u64,
    pub price: Decimal,
    pub reason: ExitReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Executed,
    InsufficientFunds,
    NoPosition,
    Error(String),
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TradeStatus::Executed => write!(f, "EXECUTED"),
            TradeStatus::InsufficientFunds => write!(f, "INSUFFICIENT_FUNDS"),
            TradeStatus::NoPosition => write!(f, "NO_POSITION"),
            TradeStatus::Error(msg) => write!(f, "ERROR: {}", msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradeResult {
    pub status: TradeStatus,
    pub realized_profit: Decimal,
}

impl TradeResult {
    pub fn executed(realized_profit: Decimal) -> Self {
        Self {
            status: TradeStatus::Executed,
            realized_profit,
        }
    }

    pub fn rejected(status: TradeStatus) -> Self {
        Self {
            status,
            realized_profit: Decimal::ZERO,
        }
    }

    pub fn is_executed(&self) -> bool {
        self.status == TradeStatus::Executed
    }
}

/// Record handed to the execution/reporting layer for every processed order.
#[derive(Debug, Clone, Serialize)]
pub struct SignalRecord {
    pub ts: i64,
    pub action: Action,
    pub ticker: String,
    pub price: Decimal,
    pub size: u64,
    pub confidence: f64,
    pub reason: String,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub strategy: String,
    pub status: TradeStatus,
    pub realized_profit: Decimal,
}

impl SignalRecord {
    pub fn from_execution(order: &SizedOrder, result: &TradeResult) -> Self {
        Self {
            ts: Utc::now().timestamp(),
            action: order.action,
            ticker: order.ticker.clone(),
            price: order.price,
            size: order.size,
            confidence: order.confidence,
            reason: order.reason.clone(),
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            stop_loss_pct: order.stop_loss_pct,
            take_profit_pct: order.take_profit_pct,
            strategy: order.strategy.clone(),
            status: result.status.clone(),
            realized_profit: result.realized_profit,
        }
    }
}
