use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;
use std::fs::File;
use std::num::{ParseFloatError, ParseIntError};
use std::path::Path;
use std::str::FromStr;

use crate::risk::RiskConfig;
use crate::strategy::TradingWindow;

const DEFAULT_INTERVAL_SECS: u64 = 20;
const DEFAULT_INITIAL_CAPITAL: Decimal = dec!(100000);
const DEFAULT_HISTORY_WINDOW: usize = 100;
const DEFAULT_MIN_SAMPLES: usize = 20;
const DEFAULT_ENTRY_Z: f64 = 2.0;
// Moscow exchange time
const DEFAULT_TIMEZONE_OFFSET_SECS: i32 = 10_800;
const DEFAULT_SYNTHETIC_STEP_SIGMA: f64 = 0.002;
const DEFAULT_SEED_PRICE: Decimal = dec!(100);

#[derive(Debug)]
pub enum ConfigError {
    ParseIntError(ParseIntError),
    ParseFloatError(ParseFloatError),
    DecimalParseError(rust_decimal::Error),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::ParseIntError(e) => write!(f, "Parse int error: {}", e),
            ConfigError::ParseFloatError(e) => write!(f, "Parse float error: {}", e),
            ConfigError::DecimalParseError(e) => write!(f, "Decimal parse error: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ParseIntError> for ConfigError {
    fn from(err: ParseIntError) -> ConfigError {
        ConfigError::ParseIntError(err)
    }
}

impl From<ParseFloatError> for ConfigError {
    fn from(err: ParseFloatError) -> ConfigError {
        ConfigError::ParseFloatError(err)
    }
}

impl From<rust_decimal::Error> for ConfigError {
    fn from(err: rust_decimal::Error) -> ConfigError {
        ConfigError::DecimalParseError(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairSpec {
    pub base: String,
    pub quote: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct EngineYaml {
    interval_secs: Option<u64>,
    initial_capital: Option<Decimal>,
    universe_pairs: Option<Vec<String>>,
    history_window_length: Option<usize>,
    min_ratio_samples: Option<usize>,
    entry_z_score: Option<f64>,
    risk_per_trade: Option<Decimal>,
    max_risk_per_ticker: Option<Decimal>,
    stop_loss_pct: Option<Decimal>,
    take_profit_pct: Option<Decimal>,
    min_confidence: Option<f64>,
    lot_sizes: Option<HashMap<String, u64>>,
    short_allow: Option<Vec<String>>,
    trading_windows: Option<Vec<String>>,
    timezone_offset_secs: Option<i32>,
    state_file: Option<String>,
    replay_file: Option<String>,
    seed_prices: Option<HashMap<String, Decimal>>,
    synthetic_step_sigma: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub interval_secs: u64,
    pub initial_capital: Decimal,
    pub universe: Vec<PairSpec>,
    pub history_window: usize,
    pub min_samples: usize,
    pub entry_z: f64,
    pub risk: RiskConfig,
    pub window_instants: Vec<(u32, u32)>,
    pub timezone_offset_secs: i32,
    pub state_file: Option<String>,
    pub replay_file: Option<String>,
    pub seed_prices: HashMap<String, Decimal>,
    pub synthetic_step_sigma: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            universe: default_universe(),
            history_window: DEFAULT_HISTORY_WINDOW,
            min_samples: DEFAULT_MIN_SAMPLES,
            entry_z: DEFAULT_ENTRY_Z,
            risk: RiskConfig::default(),
            window_instants: TradingWindow::default_instants(),
            timezone_offset_secs: DEFAULT_TIMEZONE_OFFSET_SECS,
            state_file: None,
            replay_file: None,
            seed_prices: HashMap::new(),
            synthetic_step_sigma: DEFAULT_SYNTHETIC_STEP_SIGMA,
        }
    }
}

impl EngineConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("ARBSIM_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());
        if let Some(path) = config_path {
            return Self::from_yaml_path(path);
        }
        Self::from_env()
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open config {}", path_ref.display()))?;
        let yaml: EngineYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse config {}", path_ref.display()))?;

        let mut cfg = EngineConfig::default();
        if let Some(v) = yaml.interval_secs {
            cfg.interval_secs = v;
        }
        if let Some(v) = yaml.initial_capital {
            cfg.initial_capital = v;
        }
        if let Some(pairs) = yaml.universe_pairs {
            cfg.universe = parse_pairs_vec(&pairs)?;
        }
        if let Some(v) = yaml.history_window_length {
            cfg.history_window = v;
        }
        if let Some(v) = yaml.min_ratio_samples {
            cfg.min_samples = v;
        }
        if let Some(v) = yaml.entry_z_score {
            cfg.entry_z = v;
        }
        if let Some(v) = yaml.risk_per_trade {
            cfg.risk.risk_per_trade = v;
        }
        if let Some(v) = yaml.max_risk_per_ticker {
            cfg.risk.max_risk_per_ticker = v;
        }
        if let Some(v) = yaml.stop_loss_pct {
            cfg.risk.stop_loss_pct = v;
        }
        if let Some(v) = yaml.take_profit_pct {
            cfg.risk.take_profit_pct = v;
        }
        if let Some(v) = yaml.min_confidence {
            cfg.risk.min_confidence = v;
        }
        if let Some(lots) = yaml.lot_sizes {
            cfg.risk.lot_sizes.extend(lots);
        }
        if let Some(tickers) = yaml.short_allow {
            cfg.risk.short_allow = tickers.into_iter().collect();
        }
        if let Some(windows) = yaml.trading_windows {
            cfg.window_instants = parse_instants_vec(&windows)?;
        }
        if let Some(v) = yaml.timezone_offset_secs {
            cfg.timezone_offset_secs = v;
        }
        cfg.state_file = yaml.state_file;
        cfg.replay_file = yaml.replay_file;
        if let Some(prices) = yaml.seed_prices {
            cfg.seed_prices = prices;
        }
        if let Some(v) = yaml.synthetic_step_sigma {
            cfg.synthetic_step_sigma = v;
        }

        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = EngineConfig::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw) = env::var("INTERVAL_SECS") {
            self.interval_secs = raw.parse()?;
        }
        if let Ok(raw) = env::var("INITIAL_CAPITAL") {
            self.initial_capital = Decimal::from_str(&raw)?;
        }
        if let Ok(raw) = env::var("UNIVERSE_PAIRS") {
            self.universe = parse_pairs_list(&raw)?;
        }
        if let Ok(raw) = env::var("HISTORY_WINDOW_LENGTH") {
            self.history_window = raw.parse()?;
        }
        if let Ok(raw) = env::var("MIN_RATIO_SAMPLES") {
            self.min_samples = raw.parse()?;
        }
        if let Ok(raw) = env::var("ENTRY_Z_SCORE") {
            self.entry_z = raw.parse()?;
        }
        if let Ok(raw) = env::var("RISK_PER_TRADE") {
            self.risk.risk_per_trade = Decimal::from_str(&raw)?;
        }
        if let Ok(raw) = env::var("MAX_RISK_PER_TICKER") {
            self.risk.max_risk_per_ticker = Decimal::from_str(&raw)?;
        }
        if let Ok(raw) = env::var("STOP_LOSS_PCT") {
            self.risk.stop_loss_pct = Decimal::from_str(&raw)?;
        }
        if let Ok(raw) = env::var("TAKE_PROFIT_PCT") {
            self.risk.take_profit_pct = Decimal::from_str(&raw)?;
        }
        if let Ok(raw) = env::var("MIN_CONFIDENCE") {
            self.risk.min_confidence = raw.parse()?;
        }
        if let Ok(raw) = env::var("LOT_SIZES") {
            self.risk.lot_sizes.extend(parse_lot_map(&raw)?);
        }
        if let Ok(raw) = env::var("SHORT_ALLOW") {
            self.risk.short_allow = parse_ticker_list(&raw);
        }
        if let Ok(raw) = env::var("TRADING_WINDOWS") {
            let items: Vec<String> = raw.split(',').map(|s| s.to_string()).collect();
            self.window_instants = parse_instants_vec(&items)?;
        }
        if let Ok(raw) = env::var("TIMEZONE_OFFSET") {
            self.timezone_offset_secs = raw.parse()?;
        }
        if let Ok(raw) = env::var("STATE_FILE") {
            self.state_file = Some(raw).filter(|v| !v.trim().is_empty());
        }
        if let Ok(raw) = env::var("REPLAY_FILE") {
            self.replay_file = Some(raw).filter(|v| !v.trim().is_empty());
        }
        if let Ok(raw) = env::var("SYNTHETIC_STEP_SIGMA") {
            self.synthetic_step_sigma = raw.parse()?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_capital <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue(format!(
                "initial_capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if self.universe.is_empty() {
            return Err(ConfigError::InvalidValue(
                "universe_pairs must not be empty".to_string(),
            ));
        }
        if self.history_window == 0 {
            return Err(ConfigError::InvalidValue(
                "history_window_length must be at least 1".to_string(),
            ));
        }
        if self.synthetic_step_sigma < 0.0 {
            return Err(ConfigError::InvalidValue(
                "synthetic_step_sigma must be non-negative".to_string(),
            ));
        }
        for (hour, minute) in &self.window_instants {
            if *hour > 23 || *minute > 59 {
                return Err(ConfigError::InvalidValue(format!(
                    "trading window instant {:02}:{:02} out of range",
                    hour, minute
                )));
            }
        }
        self.risk.validate()
    }

    /// Initial price for the synthetic feed, per ticker.
    pub fn seed_price(&self, ticker: &str) -> Decimal {
        self.seed_prices
            .get(ticker)
            .copied()
            .unwrap_or(DEFAULT_SEED_PRICE)
    }

    /// Every ticker named by the pair universe, deduplicated.
    pub fn universe_tickers(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut tickers = Vec::new();
        for pair in &self.universe {
            for ticker in [&pair.base, &pair.quote] {
                if seen.insert(ticker.clone()) {
                    tickers.push(ticker.clone());
                }
            }
        }
        tickers
    }
}

/// Correlated MOEX pairs the source traded by default.
fn default_universe() -> Vec<PairSpec> {
    [
        ("SBER", "VTBR"),
        ("GAZP", "LKOH"),
        ("GAZP", "ROSN"),
        ("GMKN", "ALRS"),
    ]
    .into_iter()
    .map(|(base, quote)| PairSpec {
        base: base.to_string(),
        quote: quote.to_string(),
    })
    .collect()
}

fn parse_pairs_list(raw: &str) -> Result<Vec<PairSpec>, ConfigError> {
    let items: Vec<String> = raw.split(',').map(|s| s.to_string()).collect();
    parse_pairs_vec(&items)
}

fn parse_pairs_vec(items: &[String]) -> Result<Vec<PairSpec>, ConfigError> {
    let mut pairs = Vec::new();
    for item in items {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (base, quote) = item.split_once('/').ok_or_else(|| {
            ConfigError::InvalidValue(format!("pair '{}' must look like BASE/QUOTE", item))
        })?;
        let base = base.trim();
        let quote = quote.trim();
        if base.is_empty() || quote.is_empty() || base == quote {
            return Err(ConfigError::InvalidValue(format!(
                "pair '{}' must name two distinct tickers",
                item
            )));
        }
        pairs.push(PairSpec {
            base: base.to_string(),
            quote: quote.to_string(),
        });
    }
    Ok(pairs)
}

fn parse_lot_map(raw: &str) -> Result<HashMap<String, u64>, ConfigError> {
    let mut lots = HashMap::new();
    for item in raw.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (ticker, lot) = item.split_once(':').ok_or_else(|| {
            ConfigError::InvalidValue(format!("lot entry '{}' must look like TICKER:SIZE", item))
        })?;
        lots.insert(ticker.trim().to_string(), lot.trim().parse::<u64>()?);
    }
    Ok(lots)
}

fn parse_ticker_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn parse_instants_vec(items: &[String]) -> Result<Vec<(u32, u32)>, ConfigError> {
    let mut instants = Vec::new();
    for item in items {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (hour, minute) = item.split_once(':').ok_or_else(|| {
            ConfigError::InvalidValue(format!("window instant '{}' must look like HH:MM", item))
        })?;
        instants.push((hour.trim().parse::<u32>()?, minute.trim().parse::<u32>()?));
    }
    Ok(instants)
}
