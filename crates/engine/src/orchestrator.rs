// In crates/engine/src/orchestrator.rs

use crate::cycle::{CycleConfig, CycleSummary, TradingCycle};
use crate::decision::DecisionProvider;
use crate::reconciler::{OpenLimits, Reconciler};
use crate::{Error, Result};
use app_config::Settings;
use chrono::{DateTime, Days, NaiveTime, TimeZone, Timelike, Utc};
use database::{decisions, Db};
use execution::ExchangeGateway;
use num_traits::FromPrimitive;
use risk::{RiskRuleEngine, ValidationGate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// A read-only view of the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub iteration: u64,
    pub cycle_interval_minutes: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct SchedulerState {
    running: bool,
    stopping: bool,
    iteration: u64,
    started_at: Option<DateTime<Utc>>,
    last_cycle_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    poller_stop_tx: Option<oneshot::Sender<()>>,
    poller_handle: Option<JoinHandle<()>>,
}

impl SchedulerState {
    /// Hands back whatever must be signalled and joined. The running flag is left to the caller.
    /// Senders are taken, so each stop signal goes out at most once.
    fn take_tasks(&mut self) -> (Vec<oneshot::Sender<()>>, Vec<JoinHandle<()>>) {
        let senders = [self.stop_tx.take(), self.poller_stop_tx.take()].into_iter().flatten().collect();
        let handles = [self.handle.take(), self.poller_handle.take()].into_iter().flatten().collect();
        (senders, handles)
    }
}

/// Owns the scheduler, the trading cycle and the background poller.
pub struct Engine {
    reconciler: Arc<Reconciler>,
    cycle: Arc<TradingCycle>,
    db: Db,
    cycle_interval_minutes: u32,
    sync_interval: Duration,
    state: Arc<Mutex<SchedulerState>>,
    cycle_lock: Arc<Mutex<()>>,
}

impl Engine {
    pub fn new(
        settings: &Settings,
        db: Db,
        exchange: Arc<dyn ExchangeGateway>,
        provider: Arc<dyn DecisionProvider>,
    ) -> Self {
        let trading = &settings.trading;
        let limits = OpenLimits {
            min_leverage: trading.min_leverage,
            max_leverage: trading.max_leverage,
            min_notional: Decimal::from_f64(trading.min_notional).unwrap_or_default(),
            margin_type: trading.margin_type,
        };
        let reconciler = Arc::new(Reconciler::new(db.clone(), exchange, limits));
        let cycle = TradingCycle::new(
            reconciler.clone(),
            provider,
            RiskRuleEngine::new(settings.risk.clone()),
            ValidationGate::from_settings(&settings.risk),
            CycleConfig::from_settings(settings),
        );

        Self {
            reconciler,
            cycle: Arc::new(cycle),
            db,
            cycle_interval_minutes: trading.cycle_interval_minutes,
            sync_interval: Duration::from_secs(trading.sync_interval_secs.max(1)),
            state: Arc::new(Mutex::new(SchedulerState::default())),
            cycle_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Starts the scheduled loop and the position poller.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.stopping {
            return Err(Error::Stopping);
        }
        if state.running {
            return Err(Error::AlreadyRunning);
        }

        state.iteration = self.persisted_iteration().await?;
        state.started_at = Some(Utc::now());
        state.last_error = None;

        let (stop_tx, stop_rx) = oneshot::channel();
        let scheduler = Scheduler {
            cycle: self.cycle.clone(),
            state: self.state.clone(),
            cycle_lock: self.cycle_lock.clone(),
            interval_minutes: self.cycle_interval_minutes,
        };
        state.handle = Some(tokio::spawn(scheduler.run(stop_rx)));
        state.stop_tx = Some(stop_tx);

        let (poller_stop_tx, poller_stop_rx) = oneshot::channel();
        state.poller_handle = Some(tokio::spawn(self.reconciler.clone().run_poller(self.sync_interval, poller_stop_rx)));
        state.poller_stop_tx = Some(poller_stop_tx);

        state.running = true;
        tracing::info!(
            iteration = state.iteration,
            interval_minutes = self.cycle_interval_minutes,
            "Trading engine started."
        );
        Ok(())
    }

    /// Signals the loop and the poller once, then waits for any in-flight cycle to finish.
    /// The engine reports itself running until that cycle is done.
    pub async fn stop(&self) -> Result<()> {
        let (senders, handles) = {
            let mut state = self.state.lock().await;
            if state.stopping {
                return Err(Error::Stopping);
            }
            if !state.running {
                return Err(Error::NotRunning);
            }
            state.stopping = true;
            state.take_tasks()
        };

        for tx in senders {
            let _ = tx.send(());
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Engine task ended abnormally.");
            }
        }
        let _in_flight = self.cycle_lock.lock().await;
        let mut state = self.state.lock().await;
        state.running = false;
        state.stopping = false;
        tracing::info!("Trading engine stopped.");
        Ok(())
    }

    pub async fn status(&self) -> EngineStatus {
        let state = self.state.lock().await;
        EngineStatus {
            running: state.running,
            iteration: state.iteration,
            cycle_interval_minutes: self.cycle_interval_minutes,
            started_at: state.started_at,
            last_cycle_at: state.last_cycle_at,
            last_error: state.last_error.clone(),
        }
    }

    /// Runs one cycle outside the schedule. A fatal result halts a running scheduler.
    pub async fn run_cycle_once(&self) -> Result<CycleSummary> {
        let _in_flight = self.cycle_lock.lock().await;
        let iteration = {
            let mut state = self.state.lock().await;
            if !state.running {
                state.iteration = self.persisted_iteration().await?;
            }
            state.iteration += 1;
            state.iteration
        };
        let result = self.cycle.run(iteration).await;
        record_result(&self.state, &result).await;
        result
    }

    async fn persisted_iteration(&self) -> Result<u64> {
        let mut conn = self.db.acquire().await?;
        Ok(decisions::latest_iteration(&mut conn).await?.unwrap_or(0))
    }
}

struct Scheduler {
    cycle: Arc<TradingCycle>,
    state: Arc<Mutex<SchedulerState>>,
    cycle_lock: Arc<Mutex<()>>,
    interval_minutes: u32,
}

impl Scheduler {
    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        loop {
            let now = Utc::now();
            let wait = (next_aligned_tick(now, self.interval_minutes) - now)
                .to_std()
                .unwrap_or_default();
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let result = {
                let _in_flight = self.cycle_lock.lock().await;
                let iteration = {
                    let mut state = self.state.lock().await;
                    state.iteration += 1;
                    state.iteration
                };
                self.cycle.run(iteration).await
            };
            if record_result(&self.state, &result).await {
                break;
            }
        }
        tracing::info!("Scheduler loop exited.");
    }
}

/// Stores the outcome of a cycle. On a fatal error the scheduler is torn down
/// and `true` is returned.
async fn record_result(state: &Mutex<SchedulerState>, result: &Result<CycleSummary>) -> bool {
    let mut state = state.lock().await;
    state.last_cycle_at = Some(Utc::now());
    let Err(e) = result else {
        state.last_error = None;
        return false;
    };

    state.last_error = Some(e.to_string());
    if !e.is_fatal() {
        tracing::error!(iteration = state.iteration, error = %e, "Trading cycle failed; continuing on the next tick.");
        return false;
    }

    tracing::error!(iteration = state.iteration, error = %e, "Fatal condition; stopping the scheduler.");
    // Tasks detach here; each exits on its stop signal or, for the loop, on return.
    state.running = false;
    let (senders, _detached) = state.take_tasks();
    for tx in senders {
        let _ = tx.send(());
    }
    true
}

/// The next wall-clock instant that is a whole multiple of `minutes` past midnight UTC.
/// A tick exactly on a boundary moves to the following one.
pub fn next_aligned_tick(now: DateTime<Utc>, minutes: u32) -> DateTime<Utc> {
    const DAY_SECS: u32 = 24 * 60 * 60;
    let period = minutes.clamp(1, 24 * 60) * 60;
    let next = (now.num_seconds_from_midnight() / period + 1) * period;

    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    let naive = if next >= DAY_SECS {
        midnight.checked_add_days(Days::new(1)).unwrap_or(midnight)
    } else {
        midnight + chrono::Duration::seconds(i64::from(next))
    };
    Utc.from_utc_datetime(&naive)
}
