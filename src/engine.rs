use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;

use crate::config::{EngineConfig, PairSpec};
use crate::portfolio::PortfolioLedger;
use crate::ports::feed::{PriceFeed, ReplayFeed, SyntheticFeed};
use crate::report::{StatusReporter, TradeLogger};
use crate::risk::RiskSizer;
use crate::signal::{Action, ExitSignal, SignalRecord, SizedOrder, TradeResult};
use crate::strategy::{DetectorConfig, PairDetector, TradingWindow};

/// Cycle orchestration: fetch prices, detect divergences inside the
/// trading window, size and execute entries, then run the exit scan.
/// The ledger is owned exclusively here, so every mutation is linearized.
pub struct Engine {
    cfg: EngineConfig,
    feed: Arc<dyn PriceFeed>,
    detector: PairDetector,
    sizer: RiskSizer,
    ledger: PortfolioLedger,
    window: TradingWindow,
    offset: FixedOffset,
    status: Option<StatusReporter>,
    trade_log: Option<TradeLogger>,
    replay_mode: bool,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Result<Self> {
        let feed: Arc<dyn PriceFeed> = match &cfg.replay_file {
            Some(path) => {
                Arc::new(ReplayFeed::new(path).context("failed to load replay file")?)
            }
            None => {
                let seeds: Vec<(String, Decimal)> = cfg
                    .universe_tickers()
                    .into_iter()
                    .map(|ticker| {
                        let price = cfg.seed_price(&ticker);
                        (ticker, price)
                    })
                    .collect();
                Arc::new(
                    SyntheticFeed::new(seeds, cfg.synthetic_step_sigma)
                        .context("failed to initialize synthetic feed")?,
                )
            }
        };
        Self::with_feed(cfg, feed)
    }

    pub fn with_feed(cfg: EngineConfig, feed: Arc<dyn PriceFeed>) -> Result<Self> {
        let offset = FixedOffset::east_opt(cfg.timezone_offset_secs)
            .ok_or_else(|| anyhow!("invalid timezone offset {}", cfg.timezone_offset_secs))?;
        let detector = PairDetector::new(
            DetectorConfig {
                entry_z: cfg.entry_z,
                min_samples: cfg.min_samples,
                stop_loss_pct: cfg.risk.stop_loss_pct,
                take_profit_pct: cfg.risk.take_profit_pct,
            },
            cfg.history_window,
        );
        let sizer = RiskSizer::new(cfg.risk.clone())?;
        let mut ledger = PortfolioLedger::new(cfg.initial_capital)?;
        if let Some(path) = &cfg.state_file {
            ledger.attach_state_file(PathBuf::from(path));
        }
        let window = TradingWindow::new(cfg.window_instants.clone());
        let replay_mode = cfg.replay_file.is_some();

        Ok(Self {
            cfg,
            feed,
            detector,
            sizer,
            ledger,
            window,
            offset,
            status: StatusReporter::from_env(),
            trade_log: TradeLogger::from_env(),
            replay_mode,
        })
    }

    pub fn ledger(&self) -> &PortfolioLedger {
        &self.ledger
    }

    pub async fn run(&mut self) -> Result<()> {
        log::info!(
            "[CONFIG] pairs={} interval={}s capital={} windows={}",
            self.cfg.universe.len(),
            self.cfg.interval_secs,
            self.cfg.initial_capital,
            self.cfg.window_instants.len()
        );
        self.ledger.load_state();

        if self.replay_mode {
            log::info!("[REPLAY] running against recorded data");
            loop {
                if let Err(e) = self.cycle().await {
                    log::error!("[REPLAY] cycle failed: {:?}", e);
                }
                let has_more = match self.feed.advance().await {
                    Ok(has_more) => has_more,
                    Err(err) => {
                        log::error!("[REPLAY] feed advance failed: {}", err);
                        false
                    }
                };
                if !has_more {
                    log::info!("[REPLAY] end of data reached");
                    break;
                }
            }
            let prices = self.fetch_prices().await;
            let snapshot = self.ledger.snapshot(&prices);
            log::info!(
                "[REPLAY] finished: value={} cash={} trades={} win_rate={:.1}% max_drawdown={:.2}%",
                snapshot.total_value,
                snapshot.cash,
                snapshot.total_trades,
                snapshot.win_rate_pct,
                snapshot.max_drawdown_pct
            );
        } else {
            let mut ticker = tokio::time::interval(Duration::from_secs(self.cfg.interval_secs));
            loop {
                ticker.tick().await;
                if let Err(e) = self.cycle().await {
                    log::error!("[CYCLE] failed: {:?}", e);
                }
                if let Err(err) = self.feed.advance().await {
                    log::warn!("[FEED] advance failed: {}", err);
                }
            }
        }
        Ok(())
    }

    /// One full pass. Detection is gated by the trading window; the exit
    /// scan runs every cycle regardless.
    async fn cycle(&mut self) -> Result<()> {
        let now = self.local_now();
        let prices = self.fetch_prices().await;

        if self.window.is_open(now.time()) {
            let pairs = self.cfg.universe.clone();
            for pair in &pairs {
                if let Err(err) = self.process_pair(pair, &prices) {
                    log::error!(
                        "[PAIR] {}/{} processing failed: {:?}",
                        pair.base,
                        pair.quote,
                        err
                    );
                }
            }
        } else {
            log::debug!("[CYCLE] trading window closed at {}", now.format("%H:%M"));
        }

        for exit in self.ledger.check_exit_conditions(&prices) {
            let assisted = self
                .ledger
                .position(&exit.ticker)
                .map(|p| p.assisted)
                .unwrap_or(false);
            let order = exit_order(&exit, assisted);
            let result = self.ledger.execute_trade(&order, exit.price);
            log::info!(
                "[EXIT] {} {} x{} @ {} ({}): {}",
                order.action,
                order.ticker,
                order.size,
                exit.price,
                exit.reason,
                result.status
            );
            self.record(&order, &result);
        }

        self.ledger.update_drawdown(&prices);
        if let Some(reporter) = &mut self.status {
            reporter.write_snapshot_if_due(&self.ledger.snapshot(&prices));
        }
        self.ledger.persist_state();
        Ok(())
    }

    /// Analyzes one pair and pushes any resulting orders through the
    /// ledger. Failures here are contained to this pair.
    fn process_pair(
        &mut self,
        pair: &PairSpec,
        prices: &HashMap<String, Decimal>,
    ) -> Result<()> {
        let (Some(&price_a), Some(&price_b)) = (prices.get(&pair.base), prices.get(&pair.quote))
        else {
            log::debug!("[PAIR] {}/{} missing a price; skipped", pair.base, pair.quote);
            return Ok(());
        };

        let signals = self
            .detector
            .analyze_pair(&pair.base, &pair.quote, price_a, price_b);
        if signals.is_empty() {
            return Ok(());
        }
        log::info!(
            "[PAIR] {}/{}: {} signal candidates",
            pair.base,
            pair.quote,
            signals.len()
        );

        let capital = self.ledger.total_value(prices);
        for signal in signals {
            let Some(&price) = prices.get(&signal.ticker) else {
                continue;
            };
            let Some(order) = self
                .sizer
                .prepare_order(&signal, &signal.ticker, price, capital)
            else {
                continue;
            };
            let result = self.ledger.execute_trade(&order, price);
            log::info!(
                "[TRADE] {} {} x{} @ {}: {}",
                order.action,
                order.ticker,
                order.size,
                price,
                result.status
            );
            self.record(&order, &result);
        }
        Ok(())
    }

    async fn fetch_prices(&self) -> HashMap<String, Decimal> {
        let mut prices = HashMap::new();
        for ticker in self.cfg.universe_tickers() {
            match self.feed.latest_price(&ticker).await {
                Ok(Some(price)) => {
                    prices.insert(ticker, price);
                }
                Ok(None) => log::debug!("[FEED] no price for {}", ticker),
                Err(err) => log::warn!("[FEED] {}: {}", ticker, err),
            }
        }
        prices
    }

    fn record(&mut self, order: &SizedOrder, result: &TradeResult) {
        if let Some(logger) = &mut self.trade_log {
            let record = SignalRecord::from_execution(order, result);
            if let Err(err) = logger.log(&record) {
                log::warn!("[TRADE] failed to write trade log: {:?}", err);
            }
        }
    }

    /// Exchange-local time, driven by the replay clock when one exists.
    fn local_now(&self) -> DateTime<FixedOffset> {
        if let Some(ts) = self.feed.current_timestamp_secs() {
            if let Some(dt) = self.offset.timestamp_opt(ts, 0).single() {
                return dt;
            }
        }
        Utc::now().with_timezone(&self.offset)
    }
}

fn exit_order(exit: &ExitSignal, assisted: bool) -> SizedOrder {
    SizedOrder {
        action: Action::Sell,
        ticker: exit.ticker.clone(),
        size: exit.size,
        price: exit.price,
        stop_loss: Decimal::ZERO,
        take_profit: Decimal::ZERO,
        stop_loss_pct: Decimal::ZERO,
        take_profit_pct: Decimal::ZERO,
        reason: exit.reason.to_string(),
        confidence: 1.0,
        strategy: "exit".to_string(),
        assisted,
    }
}
