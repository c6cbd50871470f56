// In crates/engine/tests/common/mod.rs

#![allow(dead_code)]

use app_config::{AppSettings, BinanceSettings, DatabaseSettings, Settings, SimulationSettings, TradingSettings};
use async_trait::async_trait;
use core_types::{MarginType, Position, Side, Symbol};
use database::Db;
use engine::{
    ActionOutcome, DecisionOutput, DecisionProvider, DecisionRequest, OpenLimits, OpenRequest,
    Proposal, Reconciler,
};
use execution::SimulatedExchange;
use risk::RiskSettings;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn btc() -> Symbol {
    Symbol::new("BTCUSDT")
}

pub fn eth() -> Symbol {
    Symbol::new("ETHUSDT")
}

pub fn settings() -> Settings {
    Settings {
        app: AppSettings {
            environment: "test".into(),
            log_level: "debug".into(),
            paper_trading: true,
        },
        binance: BinanceSettings {
            api_key: String::new(),
            secret_key: String::new(),
            rest_base_url: "http://localhost".into(),
        },
        database: DatabaseSettings { url: "sqlite::memory:".into() },
        trading: TradingSettings {
            symbols: vec!["BTCUSDT".into(), "ETHUSDT".into()],
            kline_interval: "3m".into(),
            kline_limit: 20,
            cycle_interval_minutes: 3,
            sync_interval_secs: 3600,
            min_leverage: 1,
            max_leverage: 20,
            min_notional: 5.0,
            margin_type: MarginType::Crossed,
            initial_balance: None,
            recent_history_limit: 10,
            system_instruction: "Trade carefully.".into(),
        },
        risk: RiskSettings::default(),
        simulation: simulation(),
    }
}

fn simulation() -> SimulationSettings {
    SimulationSettings {
        initial_balance: 10_000.0,
        taker_fee_rate: 0.0,
        mark_prices: HashMap::from([("BTCUSDT".to_string(), 100_000.0), ("ETHUSDT".to_string(), 3_000.0)]),
        ..SimulationSettings::default()
    }
}

pub async fn memory_db() -> Db {
    Db::connect_url("sqlite::memory:").await.unwrap()
}

pub struct Harness {
    pub db: Db,
    pub exchange: Arc<SimulatedExchange>,
    pub reconciler: Reconciler,
}

pub async fn harness() -> Harness {
    let db = memory_db().await;
    let exchange = Arc::new(SimulatedExchange::new(&simulation()));
    let reconciler = Reconciler::new(
        db.clone(),
        exchange.clone(),
        OpenLimits {
            min_leverage: 1,
            max_leverage: 20,
            min_notional: dec!(5),
            margin_type: MarginType::Crossed,
        },
    );
    Harness { db, exchange, reconciler }
}

pub fn open_request(symbol: Symbol, side: Side, quantity: Decimal, leverage: u32) -> OpenRequest {
    let reference_price = if symbol == btc() { dec!(100000) } else { dec!(3000) };
    OpenRequest {
        symbol,
        side,
        leverage,
        quantity,
        reference_price,
        reason: "breakout above range".into(),
        exit_plan: "stop loss 95000, take profit 110000".into(),
        stop_loss: None,
        take_profit: None,
    }
}

pub async fn positions(db: &Db) -> Vec<Position> {
    let mut conn = db.acquire().await.unwrap();
    database::positions::list(&mut conn).await.unwrap()
}

/// Answers each cycle with the next scripted output and keeps every report it receives.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<anyhow::Result<DecisionOutput>>>,
    pub reports: Mutex<Vec<Vec<ActionOutcome>>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, proposals: Vec<Proposal>) {
        self.script.lock().unwrap().push_back(Ok(DecisionOutput {
            raw_text: "scripted".into(),
            proposals,
            prompt_tokens: 120,
            completion_tokens: 30,
        }));
    }

    pub fn push_error(&self, message: &str) {
        self.script.lock().unwrap().push_back(Err(anyhow::anyhow!(message.to_string())));
    }

    pub fn last_report(&self) -> Vec<ActionOutcome> {
        self.reports.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl DecisionProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn decide(&self, _request: &DecisionRequest) -> anyhow::Result<DecisionOutput> {
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| Ok(DecisionOutput::default()))
    }

    async fn report(&self, outcomes: &[ActionOutcome]) {
        self.reports.lock().unwrap().push(outcomes.to_vec());
    }
}

/// Holds every decision for a fixed delay, so a cycle can be caught in flight.
pub struct SlowProvider {
    delay: Duration,
    finished: AtomicBool,
}

impl SlowProvider {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay, finished: AtomicBool::new(false) })
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionProvider for SlowProvider {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn decide(&self, _request: &DecisionRequest) -> anyhow::Result<DecisionOutput> {
        tokio::time::sleep(self.delay).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(DecisionOutput::default())
    }

    async fn report(&self, _outcomes: &[ActionOutcome]) {}
}
