// In crates/engine/src/cycle.rs

use crate::actions::OpenRequest;
use crate::decision::{
    ActionOutcome, Checked, DecisionContext, DecisionOutput, DecisionProvider, DecisionRequest,
    MarketSnapshot, Outcome, PositionView, Proposal, Rejection,
};
use crate::reconciler::{load_positions, Reconciler};
use crate::{Error, Result};
use analytics::{AnalyticsEngine, BalanceReading};
use app_config::types::Settings;
use chrono::{DateTime, Utc};
use core_types::{AccountMetrics, AccountSnapshot, Decision, Position, Side, Symbol};
use database::{account_history, decisions, orders, trades, Db};
use num_traits::FromPrimitive;
use risk::{ConditionType, RiskRuleEngine, Validation, ValidationGate};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;

/// The knobs of one cycle, resolved from [`Settings`].
#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub symbols: Vec<Symbol>,
    pub kline_interval: String,
    pub kline_limit: u16,
    pub initial_balance: Option<Decimal>,
    pub recent_history_limit: u32,
    pub system_instruction: String,
}

impl CycleConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let trading = &settings.trading;
        Self {
            symbols: trading.symbols.iter().map(|s| Symbol::new(s.as_str())).collect(),
            kline_interval: trading.kline_interval.clone(),
            kline_limit: trading.kline_limit,
            initial_balance: trading.initial_balance.and_then(Decimal::from_f64),
            recent_history_limit: trading.recent_history_limit,
            system_instruction: trading.system_instruction.clone(),
        }
    }
}

/// What one cycle did, logged as a single line at the end.
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub iteration: u64,
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub unrealized_pnl: Decimal,
    pub position_count: usize,
    pub forced_closes: usize,
    pub proposals: usize,
    pub executed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub duration_ms: u128,
}

/// One pass of the trading loop:
/// market data, account metrics, reconcile, risk gates, decision, reconcile, snapshot.
pub struct TradingCycle {
    reconciler: Arc<Reconciler>,
    db: Db,
    provider: Arc<dyn DecisionProvider>,
    risk: RiskRuleEngine,
    gate: ValidationGate,
    analytics: AnalyticsEngine,
    config: CycleConfig,
}

impl TradingCycle {
    pub fn new(
        reconciler: Arc<Reconciler>,
        provider: Arc<dyn DecisionProvider>,
        risk: RiskRuleEngine,
        gate: ValidationGate,
        config: CycleConfig,
    ) -> Self {
        Self {
            db: reconciler.db().clone(),
            reconciler,
            provider,
            risk,
            gate,
            analytics: AnalyticsEngine::new(),
            config,
        }
    }

    pub async fn run(&self, iteration: u64) -> Result<CycleSummary> {
        let started = Instant::now();
        tracing::info!(iteration, "Trading cycle started.");

        let markets = self.collect_market_data().await.map_err(Error::at_step("market_data"))?;
        let metrics = self.account_metrics().await.map_err(Error::at_step("account_metrics"))?;
        self.reconciler.sync().await.map_err(Error::at_step("reconcile"))?;

        if let Some(breach) = self.risk.check_account(&metrics) {
            tracing::error!(iteration, %breach, "Account gate breached; closing every position.");
            match self.reconciler.close_all_positions(&breach.to_string()).await {
                Ok(sweep) => tracing::warn!(closed = sweep.closed.len(), failed = sweep.failed, "Emergency close sweep finished."),
                Err(e) => tracing::error!(error = %e, "Emergency close sweep failed."),
            }
            return Err(Error::AccountBreach(breach));
        }

        let forced_closes = self.enforce_position_rules().await.map_err(Error::at_step("risk_gates"))?;
        let metrics = self.account_metrics().await.map_err(Error::at_step("account_metrics"))?;

        let (outcomes, decision) = self.decide_and_execute(iteration, markets, metrics).await;
        {
            let mut conn = self.db.acquire().await?;
            decisions::insert(&mut conn, &decision).await?;
        }

        self.reconciler.sync().await.map_err(Error::at_step("post_reconcile"))?;
        let summary = self
            .record_snapshot(iteration, forced_closes, &outcomes, started)
            .await
            .map_err(Error::at_step("snapshot"))?;

        tracing::info!(
            iteration = summary.iteration,
            total_balance = %summary.total_balance,
            available_balance = %summary.available_balance,
            unrealized_pnl = %summary.unrealized_pnl,
            positions = summary.position_count,
            forced_closes = summary.forced_closes,
            proposals = summary.proposals,
            executed = summary.executed,
            rejected = summary.rejected,
            failed = summary.failed,
            duration_ms = summary.duration_ms as u64,
            "Trading cycle finished."
        );
        Ok(summary)
    }

    async fn collect_market_data(&self) -> Result<Vec<MarketSnapshot>> {
        let exchange = self.reconciler.exchange();
        let mut markets = Vec::with_capacity(self.config.symbols.len());
        for symbol in &self.config.symbols {
            let klines = exchange
                .get_klines(symbol, &self.config.kline_interval, self.config.kline_limit)
                .await?;
            let funding_rate = exchange.get_funding_rate(symbol).await?;
            let price = klines.last().map(|k| k.close).unwrap_or_default();
            markets.push(MarketSnapshot {
                symbol: symbol.clone(),
                price,
                funding_rate,
                klines,
            });
        }
        Ok(markets)
    }

    /// Live balances combined with the stored balance history.
    pub async fn account_metrics(&self) -> Result<AccountMetrics> {
        let info = self.reconciler.exchange().get_account_info().await?;
        let history = {
            let mut conn = self.db.acquire().await?;
            account_history::list(&mut conn).await?
        };
        Ok(self.analytics.account_metrics(
            BalanceReading {
                total: info.total_balance,
                available: info.available_balance,
                unrealized_pnl: info.unrealized_pnl,
            },
            &history,
            self.config.initial_balance,
        ))
    }

    /// Applies the per-position rules. Returns how many positions were force-closed.
    async fn enforce_position_rules(&self) -> Result<usize> {
        let now = Utc::now();
        let mut forced = 0;
        for position in load_positions(&self.db).await? {
            let check = self.risk.check_position(&position, now);
            if check.peak_pnl_percent > position.peak_pnl_percent {
                self.reconciler.record_peak(&position, check.peak_pnl_percent).await?;
            }
            let Some(reason) = check.close else { continue };

            tracing::warn!(symbol = %position.symbol, side = %position.side, %reason, "Risk rule triggered; force-closing.");
            match self.reconciler.close_position(&position, &reason.to_string()).await {
                Ok(_) => forced += 1,
                Err(e) => tracing::error!(symbol = %position.symbol, side = %position.side, error = %e, "Force-close failed; will retry next cycle."),
            }
        }
        Ok(forced)
    }

    /// Runs the decision step and every proposal. Never fails: a broken decision
    /// step is recorded in the audit row and the cycle carries on.
    async fn decide_and_execute(
        &self,
        iteration: u64,
        markets: Vec<MarketSnapshot>,
        metrics: AccountMetrics,
    ) -> (Vec<ActionOutcome>, Decision) {
        let now = Utc::now();
        let mut decision = Decision {
            id: 0,
            iteration,
            system_instruction: self.config.system_instruction.clone(),
            context: String::new(),
            output: String::new(),
            actions: "[]".into(),
            prompt_tokens: 0,
            completion_tokens: 0,
            success: false,
            error: None,
            created_at: now,
        };

        let request = match self.build_request(iteration, markets, metrics, now).await {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(iteration, error = %e, "Failed to build the decision context.");
                decision.error = Some(e.to_string());
                return (Vec::new(), decision);
            }
        };
        decision.context = request.context_json().unwrap_or_default();

        let output = match self.provider.decide(&request).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(iteration, provider = self.provider.name(), error = %e, "Decision step failed.");
                decision.error = Some(Error::Decision(e).to_string());
                return (Vec::new(), decision);
            }
        };
        let DecisionOutput { raw_text, proposals, prompt_tokens, completion_tokens } = output;

        let mut outcomes = Vec::with_capacity(proposals.len());
        for proposal in proposals {
            let outcome = self.execute(&proposal, &request.context).await;
            match &outcome {
                Outcome::Rejected { rejection } => {
                    tracing::warn!(symbol = %proposal.symbol(), %rejection, "Proposal rejected.")
                }
                Outcome::Failed { error } => {
                    tracing::error!(symbol = %proposal.symbol(), error = %error, "Proposal failed.")
                }
                Outcome::Executed { .. } => {}
            }
            outcomes.push(ActionOutcome { proposal, outcome });
        }
        self.provider.report(&outcomes).await;

        decision.output = raw_text;
        decision.prompt_tokens = prompt_tokens;
        decision.completion_tokens = completion_tokens;
        decision.actions = serde_json::to_string(&outcomes).unwrap_or_else(|_| "[]".into());
        decision.success = true;
        (outcomes, decision)
    }

    async fn build_request(
        &self,
        iteration: u64,
        markets: Vec<MarketSnapshot>,
        account: AccountMetrics,
        now: DateTime<Utc>,
    ) -> Result<DecisionRequest> {
        let positions = load_positions(&self.db).await?;
        let (recent_trades, recent_orders) = {
            let mut conn = self.db.acquire().await?;
            let limit = self.config.recent_history_limit;
            (trades::recent(&mut conn, limit).await?, orders::recent(&mut conn, limit).await?)
        };

        Ok(DecisionRequest {
            system_instruction: self.config.system_instruction.clone(),
            context: DecisionContext {
                iteration,
                timestamp: now,
                markets,
                account,
                positions: positions.iter().map(|p| position_view(p, now)).collect(),
                recent_trades,
                recent_orders,
            },
        })
    }

    async fn execute(&self, proposal: &Proposal, context: &DecisionContext) -> Outcome {
        let result = match proposal {
            Proposal::Open { .. } => self.execute_open(proposal, context).await,
            Proposal::Close { symbol, side, reason } => self.execute_close(symbol, *side, reason).await,
        };
        match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(rejection)) => Outcome::Rejected { rejection },
            Err(e) => Outcome::Failed { error: e.to_string() },
        }
    }

    async fn execute_open(&self, proposal: &Proposal, context: &DecisionContext) -> Result<Checked<Outcome>> {
        let Proposal::Open { symbol, side, leverage, quantity, reason, exit_plan, stop_loss, take_profit } = proposal else {
            return Ok(Err(Rejection::ValidationRejected { explanation: "not an open proposal".into() }));
        };
        let symbol = symbol.clone();
        let Some(market) = context.markets.iter().find(|m| m.symbol == symbol) else {
            return Ok(Err(Rejection::SymbolNotTraded { symbol }));
        };

        let request = OpenRequest {
            symbol,
            side: *side,
            leverage: *leverage,
            quantity: *quantity,
            reference_price: market.price,
            reason: reason.clone(),
            exit_plan: exit_plan.clone(),
            stop_loss: *stop_loss,
            take_profit: *take_profit,
        };
        Ok(self.reconciler.open_position(&request).await?.map(|position| Outcome::Executed {
            order_id: position.order_id,
            matched: None,
        }))
    }

    async fn execute_close(&self, symbol: &Symbol, side: Option<Side>, reason: &str) -> Result<Checked<Outcome>> {
        let symbol = symbol.clone();
        let position = match self.find_position(&symbol, side).await? {
            Ok(position) => position,
            Err(rejection) => return Ok(Err(rejection)),
        };

        let matched = match validate_close(&self.gate, &position, reason, Utc::now()) {
            Ok(matched) => matched,
            Err(rejection) => return Ok(Err(rejection)),
        };
        tracing::info!(symbol = %symbol, side = %position.side, matched = ?matched, "Close accepted by the exit plan.");

        let trade = self.reconciler.close_position(&position, reason).await?;
        Ok(Ok(Outcome::Executed { order_id: trade.order_id, matched }))
    }

    async fn find_position(&self, symbol: &Symbol, side: Option<Side>) -> Result<Checked<Position>> {
        let mut conn = self.db.acquire().await?;
        let candidates = database::positions::find_by_symbol(&mut conn, symbol).await?;
        let mut matching: Vec<Position> = candidates
            .into_iter()
            .filter(|p| side.is_none_or(|s| p.side == s))
            .collect();
        Ok(match matching.len() {
            0 => Err(Rejection::PositionNotFound { symbol: symbol.clone() }),
            1 => Ok(matching.remove(0)),
            _ => Err(Rejection::AmbiguousSide { symbol: symbol.clone() }),
        })
    }

    async fn record_snapshot(
        &self,
        iteration: u64,
        forced_closes: usize,
        outcomes: &[ActionOutcome],
        started: Instant,
    ) -> Result<CycleSummary> {
        let info = self.reconciler.exchange().get_account_info().await?;
        let mut conn = self.db.acquire().await?;
        let position_count = database::positions::list(&mut conn).await?.len();
        account_history::insert(
            &mut conn,
            &AccountSnapshot {
                id: 0,
                iteration,
                total_balance: info.total_balance,
                available_balance: info.available_balance,
                unrealized_pnl: info.unrealized_pnl,
                position_count: u32::try_from(position_count).unwrap_or(u32::MAX),
                recorded_at: Utc::now(),
            },
        )
        .await?;

        Ok(CycleSummary {
            iteration,
            total_balance: info.total_balance,
            available_balance: info.available_balance,
            unrealized_pnl: info.unrealized_pnl,
            position_count,
            forced_closes,
            proposals: outcomes.len(),
            executed: outcomes.iter().filter(|o| o.is_executed()).count(),
            rejected: outcomes.iter().filter(|o| o.is_rejected()).count(),
            failed: outcomes.iter().filter(|o| matches!(o.outcome, Outcome::Failed { .. })).count(),
            duration_ms: started.elapsed().as_millis(),
        })
    }
}

/// Runs the exit-plan gate on a proposed close.
pub fn validate_close(
    gate: &ValidationGate,
    position: &Position,
    reason: &str,
    now: DateTime<Utc>,
) -> Checked<Option<ConditionType>> {
    match gate.validate(position, reason, now) {
        Validation::Allowed { matched } => Ok(matched),
        Validation::Rejected { explanation } => Err(Rejection::ValidationRejected { explanation }),
    }
}

fn position_view(position: &Position, now: DateTime<Utc>) -> PositionView {
    PositionView {
        symbol: position.symbol.clone(),
        side: position.side,
        quantity: position.quantity,
        entry_price: position.entry_price,
        current_price: position.current_price,
        leverage: position.leverage,
        unrealized_pnl: position.unrealized_pnl,
        pnl_percent: position.pnl_percent(),
        peak_pnl_percent: position.peak_pnl_percent,
        holding_minutes: position.holding_minutes(now),
        entry_reason: position.entry_reason.clone(),
        exit_plan: position.exit_plan.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn position(exit_plan: &str, held_minutes: i64) -> Position {
        Position {
            id: 1,
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Long,
            quantity: dec!(0.01),
            entry_price: dec!(100000),
            current_price: dec!(96000),
            liquidation_price: dec!(90000),
            leverage: 5,
            margin: dec!(200),
            unrealized_pnl: dec!(-40),
            peak_pnl_percent: 0.0,
            entry_reason: "breakout".into(),
            exit_plan: exit_plan.into(),
            order_id: None,
            opened_at: Utc::now() - Duration::minutes(held_minutes),
        }
    }

    #[test]
    fn accepted_close_reports_the_matched_condition() {
        let gate = ValidationGate::new(60, false);
        let matched = validate_close(&gate, &position("止损 $95,000", 120), "触发止损，跌破95000", Utc::now());
        assert_eq!(matched, Ok(Some(ConditionType::StopLoss)));
    }

    #[test]
    fn rejected_close_becomes_a_typed_rejection() {
        let gate = ValidationGate::new(60, false);
        let result = validate_close(&gate, &position("止盈 $110,000", 120), "市场剧烈波动", Utc::now());
        match result {
            Err(Rejection::ValidationRejected { explanation }) => {
                assert!(explanation.contains("止盈 $110,000"));
                assert!(explanation.contains("市场剧烈波动"));
            }
            other => panic!("expected a validation rejection, got {:?}", other),
        }
    }

    #[test]
    fn position_view_reports_holding_time_and_pnl() {
        let view = position_view(&position("", 90), Utc::now());
        assert_eq!(view.holding_minutes, 90);
        assert_eq!(view.pnl_percent, -20.0);
    }
}
