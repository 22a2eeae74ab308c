use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::config::ConfigError;
use crate::signal::{Action, ExitReason, ExitSignal, SizedOrder, TradeResult, TradeStatus};

/// Unrealized gain that arms partial profit-taking on assisted positions.
const PARTIAL_PROFIT_THRESHOLD: Decimal = dec!(0.05);
const PERSISTED_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub size: u64,
    pub avg_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub entry_ts: i64,
    pub assisted: bool,
}

/// Immutable record of one executed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub ts: i64,
    pub action: Action,
    pub ticker: String,
    pub price: Decimal,
    pub size: u64,
    pub status: TradeStatus,
    pub realized_profit: Decimal,
}

#[derive(Debug, Serialize)]
pub struct PositionSummary {
    pub ticker: String,
    pub size: u64,
    pub avg_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub assisted: bool,
    pub market_value: Decimal,
}

#[derive(Debug, Serialize)]
pub struct LedgerSnapshot {
    pub ts: i64,
    pub cash: Decimal,
    pub total_value: Decimal,
    pub positions: Vec<PositionSummary>,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub win_rate_pct: f64,
    pub total_realized_profit: Decimal,
    pub max_drawdown_pct: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerState {
    cash: Decimal,
    positions: Vec<Position>,
    total_trades: u64,
    winning_trades: u64,
    total_realized_profit: Decimal,
    peak_value: Decimal,
    max_drawdown_pct: Decimal,
    history: Vec<Trade>,
}

/// The system of record for simulated cash, positions and trade history.
/// All mutations go through `execute_trade`; rejections leave the ledger
/// untouched and are reported as statuses, never as errors.
#[derive(Debug)]
pub struct PortfolioLedger {
    cash: Decimal,
    positions: HashMap<String, Position>,
    trade_history: Vec<Trade>,
    total_trades: u64,
    winning_trades: u64,
    total_realized_profit: Decimal,
    peak_value: Decimal,
    max_drawdown_pct: Decimal,
    state_path: Option<PathBuf>,
}

impl PortfolioLedger {
    pub fn new(initial_capital: Decimal) -> Result<Self, ConfigError> {
        if initial_capital <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue(format!(
                "initial capital must be positive, got {}",
                initial_capital
            )));
        }
        Ok(Self {
            cash: initial_capital,
            positions: HashMap::new(),
            trade_history: Vec::new(),
            total_trades: 0,
            winning_trades: 0,
            total_realized_profit: Decimal::ZERO,
            peak_value: initial_capital,
            max_drawdown_pct: Decimal::ZERO,
            state_path: None,
        })
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> + '_ {
        self.positions.values()
    }

    pub fn trade_history(&self) -> &[Trade] {
        &self.trade_history
    }

    pub fn total_trades(&self) -> u64 {
        self.total_trades
    }

    pub fn winning_trades(&self) -> u64 {
        self.winning_trades
    }

    pub fn total_realized_profit(&self) -> Decimal {
        self.total_realized_profit
    }

    pub fn peak_value(&self) -> Decimal {
        self.peak_value
    }

    pub fn max_drawdown_pct(&self) -> Decimal {
        self.max_drawdown_pct
    }

    /// Executes one order at the given price. Rejections (insufficient
    /// funds, no position to sell) mutate nothing; arithmetic faults are
    /// contained to this trade and surface as an ERROR status.
    pub fn execute_trade(&mut self, order: &SizedOrder, price: Decimal) -> TradeResult {
        let result = match self.try_execute(order, price) {
            Ok(result) => result,
            Err(msg) => {
                log::error!(
                    "[TRADE] {} {} x{} failed: {}",
                    order.action,
                    order.ticker,
                    order.size,
                    msg
                );
                TradeResult {
                    status: TradeStatus::Error(msg),
                    realized_profit: Decimal::ZERO,
                }
            }
        };

        if result.is_executed() {
            self.trade_history.push(Trade {
                ts: Utc::now().timestamp(),
                action: order.action,
                ticker: order.ticker.clone(),
                price,
                size: order.size,
                status: result.status.clone(),
                realized_profit: result.realized_profit,
            });
            // revalue against the execution price; other positions fall
            // back to their average entry price
            let marks = HashMap::from([(order.ticker.clone(), price)]);
            self.update_drawdown(&marks);
        }
        result
    }

    fn try_execute(&mut self, order: &SizedOrder, price: Decimal) -> Result<TradeResult, String> {
        if order.size == 0 {
            return Err("order size is zero".to_string());
        }
        let size = Decimal::from(order.size);

        match order.action {
            Action::Buy => {
                let cost = price
                    .checked_mul(size)
                    .ok_or_else(|| "order cost overflow".to_string())?;
                if self.cash < cost {
                    return Ok(TradeResult::rejected(TradeStatus::InsufficientFunds));
                }

                match self.positions.get_mut(&order.ticker) {
                    Some(position) => {
                        let held = Decimal::from(position.size);
                        let merged_cost = position
                            .avg_price
                            .checked_mul(held)
                            .and_then(|held_cost| held_cost.checked_add(cost))
                            .ok_or_else(|| "position cost overflow".to_string())?;
                        let merged_size = held + size;
                        let merged_avg = merged_cost
                            .checked_div(merged_size)
                            .ok_or_else(|| "average price division failed".to_string())?;
                        position.size += order.size;
                        position.avg_price = merged_avg;
                    }
                    None => {
                        self.positions.insert(
                            order.ticker.clone(),
                            Position {
                                ticker: order.ticker.clone(),
                                size: order.size,
                                avg_price: price,
                                stop_loss: order.stop_loss,
                                take_profit: order.take_profit,
                                entry_ts: Utc::now().timestamp(),
                                assisted: order.assisted,
                            },
                        );
                    }
                }
                self.cash -= cost;
                Ok(TradeResult::executed(Decimal::ZERO))
            }
            Action::Sell => {
                let Some(position) = self.positions.get_mut(&order.ticker) else {
                    return Ok(TradeResult::rejected(TradeStatus::NoPosition));
                };
                if position.size < order.size {
                    return Ok(TradeResult::rejected(TradeStatus::NoPosition));
                }

                let proceeds = price
                    .checked_mul(size)
                    .ok_or_else(|| "sale proceeds overflow".to_string())?;
                let realized = price
                    .checked_sub(position.avg_price)
                    .and_then(|edge| edge.checked_mul(size))
                    .ok_or_else(|| "realized profit overflow".to_string())?;

                if position.size == order.size {
                    self.positions.remove(&order.ticker);
                } else {
                    position.size -= order.size;
                }
                self.cash += proceeds;
                self.total_trades += 1;
                if realized > Decimal::ZERO {
                    self.winning_trades += 1;
                }
                self.total_realized_profit += realized;
                Ok(TradeResult::executed(realized))
            }
        }
    }

    /// Scans open positions against current prices. Strict priority per
    /// position, first match only: take-profit, stop-loss, then the 5%
    /// assisted partial exit. Positions without a price are skipped.
    pub fn check_exit_conditions(&self, prices: &HashMap<String, Decimal>) -> Vec<ExitSignal> {
        let mut exits = Vec::new();
        for (ticker, position) in &self.positions {
            let Some(&price) = prices.get(ticker) else {
                continue;
            };
            if price >= position.take_profit {
                exits.push(ExitSignal {
                    ticker: ticker.clone(),
                    size: position.size,
                    price,
                    reason: ExitReason::TakeProfit,
                });
            } else if price <= position.stop_loss {
                exits.push(ExitSignal {
                    ticker: ticker.clone(),
                    size: position.size,
                    price,
                    reason: ExitReason::StopLoss,
                });
            } else if position.assisted && position.avg_price > Decimal::ZERO {
                let gain = (price - position.avg_price) / position.avg_price;
                let half = position.size / 2;
                if gain >= PARTIAL_PROFIT_THRESHOLD && half > 0 {
                    exits.push(ExitSignal {
                        ticker: ticker.clone(),
                        size: half,
                        price,
                        reason: ExitReason::PartialProfit,
                    });
                }
            }
        }
        exits
    }

    /// Cash plus marked position value; positions without a current price
    /// are valued at their average entry price.
    pub fn total_value(&self, prices: &HashMap<String, Decimal>) -> Decimal {
        let mut value = self.cash;
        for (ticker, position) in &self.positions {
            let mark = prices.get(ticker).copied().unwrap_or(position.avg_price);
            value += mark * Decimal::from(position.size);
        }
        value
    }

    /// Raises the peak on new highs; otherwise widens the recorded
    /// maximum drawdown. Both are monotone by construction.
    pub fn update_drawdown(&mut self, prices: &HashMap<String, Decimal>) {
        let value = self.total_value(prices);
        if value > self.peak_value {
            self.peak_value = value;
        } else if self.peak_value > Decimal::ZERO {
            let drawdown = (self.peak_value - value) / self.peak_value * dec!(100);
            if drawdown > self.max_drawdown_pct {
                self.max_drawdown_pct = drawdown;
            }
        }
    }

    pub fn snapshot(&self, prices: &HashMap<String, Decimal>) -> LedgerSnapshot {
        let positions = self
            .positions
            .values()
            .map(|position| {
                let mark = prices
                    .get(&position.ticker)
                    .copied()
                    .unwrap_or(position.avg_price);
                PositionSummary {
                    ticker: position.ticker.clone(),
                    size: position.size,
                    avg_price: position.avg_price,
                    stop_loss: position.stop_loss,
                    take_profit: position.take_profit,
                    assisted: position.assisted,
                    market_value: mark * Decimal::from(position.size),
                }
            })
            .collect();
        let win_rate_pct = if self.total_trades > 0 {
            self.winning_trades as f64 / self.total_trades as f64 * 100.0
        } else {
            0.0
        };
        LedgerSnapshot {
            ts: Utc::now().timestamp(),
            cash: self.cash,
            total_value: self.total_value(prices),
            positions,
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            win_rate_pct,
            total_realized_profit: self.total_realized_profit,
            max_drawdown_pct: self.max_drawdown_pct,
        }
    }

    pub fn attach_state_file(&mut self, path: PathBuf) {
        self.state_path = Some(path);
    }

    /// Best-effort restore from the attached state file. A missing file is
    /// a normal first run; parse failures are logged and ignored.
    pub fn load_state(&mut self) {
        let Some(path) = self.state_path.clone() else {
            return;
        };
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("[LEDGER] no saved state at {}", path.display());
                return;
            }
            Err(err) => {
                log::warn!("[LEDGER] failed to read {}: {}", path.display(), err);
                return;
            }
        };
        let state: LedgerState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(err) => {
                log::warn!("[LEDGER] failed to parse {}: {}", path.display(), err);
                return;
            }
        };
        self.cash = state.cash;
        self.positions = state
            .positions
            .into_iter()
            .map(|p| (p.ticker.clone(), p))
            .collect();
        self.total_trades = state.total_trades;
        self.winning_trades = state.winning_trades;
        self.total_realized_profit = state.total_realized_profit;
        self.peak_value = state.peak_value;
        self.max_drawdown_pct = state.max_drawdown_pct;
        self.trade_history = state.history;
        log::info!(
            "[LEDGER] restored state: cash={} positions={} trades={}",
            self.cash,
            self.positions.len(),
            self.total_trades
        );
    }

    /// Best-effort save of the current state to the attached file.
    pub fn persist_state(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let history_start = self
            .trade_history
            .len()
            .saturating_sub(PERSISTED_HISTORY_LIMIT);
        let state = LedgerState {
            cash: self.cash,
            positions: self.positions.values().cloned().collect(),
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            total_realized_profit: self.total_realized_profit,
            peak_value: self.peak_value,
            max_drawdown_pct: self.max_drawdown_pct,
            history: self.trade_history[history_start..].to_vec(),
        };
        match serde_json::to_string(&state) {
            Ok(json) => {
                if let Err(err) = fs::write(path, json) {
                    log::warn!("[LEDGER] failed to write {}: {}", path.display(), err);
                }
            }
            Err(err) => log::warn!("[LEDGER] failed to serialize state: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn ledger(capital: &str) -> PortfolioLedger {
        PortfolioLedger::new(dec(capital)).unwrap()
    }

    fn order(action: Action, ticker: &str, size: u64, price: &str) -> SizedOrder {
        let price = dec(price);
        SizedOrder {
            action,
            ticker: ticker.to_string(),
            size,
            price,
            stop_loss: price * dec("0.98"),
            take_profit: price * dec("1.04"),
            stop_loss_pct: dec("0.02"),
            take_profit_pct: dec("0.04"),
            reason: "test".to_string(),
            confidence: 0.8,
            strategy: "pair-arbitrage".to_string(),
            assisted: false,
        }
    }

    fn assisted_order(ticker: &str, size: u64, price: &str) -> SizedOrder {
        SizedOrder {
            assisted: true,
            ..order(Action::Buy, ticker, size, price)
        }
    }

    #[test]
    fn rejects_non_positive_capital() {
        assert!(PortfolioLedger::new(Decimal::ZERO).is_err());
        assert!(PortfolioLedger::new(dec("-5")).is_err());
    }

    #[test]
    fn buy_then_sell_at_same_price_round_trips_cash() {
        let mut ledger = ledger("100000");
        let buy = order(Action::Buy, "SBER", 50, "285.40");
        assert!(ledger.execute_trade(&buy, dec("285.40")).is_executed());
        let sell = order(Action::Sell, "SBER", 50, "285.40");
        let result = ledger.execute_trade(&sell, dec("285.40"));
        assert!(result.is_executed());
        assert_eq!(result.realized_profit, Decimal::ZERO);
        assert_eq!(ledger.cash(), dec("100000"));
        assert!(ledger.position("SBER").is_none());
    }

    #[test]
    fn accumulating_buys_cost_weight_the_average() {
        let mut ledger = ledger("100000");
        ledger.execute_trade(&order(Action::Buy, "GAZP", 10, "100"), dec("100"));
        ledger.execute_trade(&order(Action::Buy, "GAZP", 10, "110"), dec("110"));
        let position = ledger.position("GAZP").unwrap();
        assert_eq!(position.size, 20);
        assert_eq!(position.avg_price, dec("105"));
    }

    #[test]
    fn insufficient_funds_mutates_nothing() {
        let mut ledger = ledger("1000");
        let buy = order(Action::Buy, "LKOH", 10, "500");
        let result = ledger.execute_trade(&buy, dec("500"));
        assert_eq!(result.status, TradeStatus::InsufficientFunds);
        assert_eq!(ledger.cash(), dec("1000"));
        assert!(ledger.position("LKOH").is_none());
        assert!(ledger.trade_history().is_empty());
    }

    #[test]
    fn oversell_is_rejected_without_mutation() {
        let mut ledger = ledger("100000");
        ledger.execute_trade(&order(Action::Buy, "SBER", 10, "100"), dec("100"));
        let cash_before = ledger.cash();

        let result = ledger.execute_trade(&order(Action::Sell, "SBER", 20, "100"), dec("100"));
        assert_eq!(result.status, TradeStatus::NoPosition);
        assert_eq!(ledger.cash(), cash_before);
        assert_eq!(ledger.position("SBER").unwrap().size, 10);
        assert_eq!(ledger.total_trades(), 0);
    }

    #[test]
    fn sell_without_position_is_rejected() {
        let mut ledger = ledger("100000");
        let result = ledger.execute_trade(&order(Action::Sell, "VTBR", 10, "100"), dec("100"));
        assert_eq!(result.status, TradeStatus::NoPosition);
        assert_eq!(ledger.cash(), dec("100000"));
    }

    #[test]
    fn partial_sell_decrements_in_place() {
        let mut ledger = ledger("100000");
        ledger.execute_trade(&order(Action::Buy, "SBER", 20, "100"), dec("100"));
        let result = ledger.execute_trade(&order(Action::Sell, "SBER", 5, "110"), dec("110"));
        assert!(result.is_executed());
        assert_eq!(result.realized_profit, dec("50"));
        assert_eq!(ledger.position("SBER").unwrap().size, 15);
    }

    #[test]
    fn sell_counters_track_wins_and_realized_profit() {
        let mut ledger = ledger("100000");
        ledger.execute_trade(&order(Action::Buy, "SBER", 10, "100"), dec("100"));
        ledger.execute_trade(&order(Action::Buy, "GAZP", 10, "100"), dec("100"));

        ledger.execute_trade(&order(Action::Sell, "SBER", 10, "120"), dec("120"));
        ledger.execute_trade(&order(Action::Sell, "GAZP", 10, "90"), dec("90"));

        assert_eq!(ledger.total_trades(), 2);
        assert_eq!(ledger.winning_trades(), 1);
        assert_eq!(ledger.total_realized_profit(), dec("100"));
    }

    #[test]
    fn take_profit_beats_partial_exit() {
        let mut ledger = ledger("100000");
        ledger.execute_trade(&assisted_order("SBER", 10, "100"), dec("100"));

        // 112 satisfies both take-profit (104) and the 5% assisted rule
        let prices = HashMap::from([("SBER".to_string(), dec("112"))]);
        let exits = ledger.check_exit_conditions(&prices);
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].reason, ExitReason::TakeProfit);
        assert_eq!(exits[0].size, 10);
    }

    #[test]
    fn stop_loss_emits_full_exit() {
        let mut ledger = ledger("100000");
        ledger.execute_trade(&order(Action::Buy, "SBER", 10, "100"), dec("100"));

        let prices = HashMap::from([("SBER".to_string(), dec("97"))]);
        let exits = ledger.check_exit_conditions(&prices);
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].reason, ExitReason::StopLoss);
        assert_eq!(exits[0].size, 10);
    }

    #[test]
    fn assisted_partial_exit_takes_half() {
        // take-profit pushed out of the way so the partial rule is the
        // first match once the 5% gain threshold arms
        let mut ledger = ledger("100000");
        let mut buy = assisted_order("SBER", 11, "100");
        buy.take_profit = dec("200");
        ledger.execute_trade(&buy, dec("100"));

        let prices = HashMap::from([("SBER".to_string(), dec("103.9"))]);
        assert!(ledger.check_exit_conditions(&prices).is_empty());

        let prices = HashMap::from([("SBER".to_string(), dec("105"))]);
        let exits = ledger.check_exit_conditions(&prices);
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].reason, ExitReason::PartialProfit);
        assert_eq!(exits[0].size, 5); // floor(11 / 2)
    }

    #[test]
    fn partial_exit_requires_assisted_flag() {
        let mut ledger = ledger("100000");
        let mut buy = order(Action::Buy, "SBER", 10, "100");
        buy.take_profit = dec("200");
        ledger.execute_trade(&buy, dec("100"));

        let prices = HashMap::from([("SBER".to_string(), dec("106"))]);
        assert!(ledger.check_exit_conditions(&prices).is_empty());
    }

    #[test]
    fn partial_exit_skipped_when_half_rounds_to_zero() {
        let mut ledger = ledger("100000");
        let mut buy = assisted_order("SBER", 1, "100");
        buy.take_profit = dec("200");
        ledger.execute_trade(&buy, dec("100"));

        let prices = HashMap::from([("SBER".to_string(), dec("106"))]);
        assert!(ledger.check_exit_conditions(&prices).is_empty());
    }

    #[test]
    fn position_without_price_is_skipped() {
        let mut ledger = ledger("100000");
        ledger.execute_trade(&order(Action::Buy, "SBER", 10, "100"), dec("100"));
        assert!(ledger.check_exit_conditions(&HashMap::new()).is_empty());
    }

    #[test]
    fn total_value_falls_back_to_average_price() {
        let mut ledger = ledger("100000");
        ledger.execute_trade(&order(Action::Buy, "SBER", 10, "100"), dec("100"));
        assert_eq!(ledger.total_value(&HashMap::new()), dec("100000"));
        let prices = HashMap::from([("SBER".to_string(), dec("110"))]);
        assert_eq!(ledger.total_value(&prices), dec("100100"));
    }

    #[test]
    fn drawdown_never_decreases_without_a_new_peak() {
        let mut ledger = ledger("100000");
        ledger.execute_trade(&order(Action::Buy, "SBER", 100, "100"), dec("100"));

        let mut last_drawdown = Decimal::ZERO;
        for price in ["95", "90", "93", "85"] {
            ledger.execute_trade(&order(Action::Sell, "SBER", 10, price), dec(price));
            let drawdown = ledger.max_drawdown_pct();
            assert!(drawdown >= last_drawdown);
            last_drawdown = drawdown;
        }
        assert!(last_drawdown > Decimal::ZERO);
        assert_eq!(ledger.peak_value(), dec("100000"));
    }

    #[test]
    fn new_peak_raises_peak_value() {
        let mut ledger = ledger("100000");
        ledger.execute_trade(&order(Action::Buy, "SBER", 10, "100"), dec("100"));
        ledger.execute_trade(&order(Action::Sell, "SBER", 10, "150"), dec("150"));
        assert_eq!(ledger.peak_value(), dec("100500"));
    }

    #[test]
    fn state_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let mut ledger = ledger("100000");
        ledger.attach_state_file(path.clone());
        ledger.execute_trade(&order(Action::Buy, "SBER", 20, "100"), dec("100"));
        ledger.execute_trade(&order(Action::Sell, "SBER", 5, "110"), dec("110"));
        ledger.persist_state();

        let mut restored = PortfolioLedger::new(dec("1")).unwrap();
        restored.attach_state_file(path);
        restored.load_state();
        assert_eq!(restored.cash(), ledger.cash());
        assert_eq!(restored.position("SBER").unwrap().size, 15);
        assert_eq!(restored.total_trades(), 1);
        assert_eq!(restored.total_realized_profit(), dec("50"));
        assert_eq!(restored.trade_history().len(), 2);
    }

    #[test]
    fn load_state_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger("100000");
        ledger.attach_state_file(dir.path().join("absent.json"));
        ledger.load_state();
        assert_eq!(ledger.cash(), dec("100000"));
    }
}
