// In crates/engine/tests/engine.rs

mod common;

use common::{btc, memory_db, open_request, positions, settings, ScriptedProvider, SlowProvider};
use core_types::Side;
use database::{account_history, decisions, orders, Db};
use engine::{Engine, Error, Outcome, Proposal, Rejection};
use execution::SimulatedExchange;
use risk::{AccountBreach, ConditionType};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

struct Setup {
    engine: Engine,
    db: Db,
    exchange: Arc<SimulatedExchange>,
    provider: Arc<ScriptedProvider>,
}

async fn setup_with(settings: app_config::Settings) -> Setup {
    let db = memory_db().await;
    let exchange = Arc::new(SimulatedExchange::new(&settings.simulation));
    let provider = ScriptedProvider::new();
    let engine = Engine::new(&settings, db.clone(), exchange.clone(), provider.clone());
    Setup { engine, db, exchange, provider }
}

async fn setup() -> Setup {
    setup_with(settings()).await
}

fn open_proposal(symbol: &str) -> Proposal {
    Proposal::Open {
        symbol: core_types::Symbol::new(symbol),
        side: Side::Long,
        leverage: 5,
        quantity: dec!(0.01),
        reason: "higher lows on the 3m chart".into(),
        exit_plan: "stop loss 95000".into(),
        stop_loss: Some(dec!(95000)),
        take_profit: None,
    }
}

fn close_proposal(side: Option<Side>, reason: &str) -> Proposal {
    Proposal::Close { symbol: btc(), side, reason: reason.into() }
}

#[tokio::test]
async fn cycle_executes_proposals_and_records_the_audit_trail() {
    let s = setup().await;
    s.provider.push(vec![open_proposal("BTCUSDT")]);

    let summary = s.engine.run_cycle_once().await.unwrap();
    assert_eq!(summary.iteration, 1);
    assert_eq!(summary.executed, 1);
    assert_eq!(summary.position_count, 1);

    let mut conn = s.db.acquire().await.unwrap();
    assert_eq!(orders::list_active(&mut conn).await.unwrap().len(), 1);

    let decision = decisions::latest(&mut conn).await.unwrap().unwrap();
    assert_eq!(decision.iteration, 1);
    assert!(decision.success);
    assert_eq!(decision.prompt_tokens, 120);
    assert!(decision.actions.contains("executed"));
    assert!(decision.context.contains("BTCUSDT"));

    let history = account_history::list(&mut conn).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].iteration, 1);
    assert_eq!(history[0].position_count, 1);
}

#[tokio::test]
async fn close_that_ignores_the_exit_plan_is_rejected() {
    let s = setup().await;
    let mut request = open_request(btc(), Side::Long, dec!(0.01), 5);
    request.exit_plan = "take profit 110000".into();
    s.engine.reconciler().open_position(&request).await.unwrap().unwrap();
    s.provider.push(vec![close_proposal(None, "market looks choppy")]);

    let summary = s.engine.run_cycle_once().await.unwrap();
    assert_eq!(summary.rejected, 1);
    assert_eq!(positions(&s.db).await.len(), 1);

    let report = s.provider.last_report();
    match &report[0].outcome {
        Outcome::Rejected { rejection: Rejection::ValidationRejected { explanation } } => {
            assert!(explanation.contains("take profit 110000"));
        }
        other => panic!("expected a validation rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn urgent_close_is_accepted_before_the_minimum_holding_time() {
    let s = setup().await;
    s.engine
        .reconciler()
        .open_position(&open_request(btc(), Side::Long, dec!(0.01), 5))
        .await
        .unwrap()
        .unwrap();
    s.provider.push(vec![close_proposal(Some(Side::Long), "stop loss level reached")]);

    let summary = s.engine.run_cycle_once().await.unwrap();
    assert_eq!(summary.executed, 1);
    assert!(positions(&s.db).await.is_empty());
    assert!(matches!(
        s.provider.last_report()[0].outcome,
        Outcome::Executed { matched: Some(ConditionType::StopLoss), .. }
    ));
}

#[tokio::test]
async fn close_without_a_side_is_ambiguous_in_hedge_mode() {
    let s = setup().await;
    for side in [Side::Long, Side::Short] {
        s.engine
            .reconciler()
            .open_position(&open_request(btc(), side, dec!(0.01), 5))
            .await
            .unwrap()
            .unwrap();
    }
    s.provider.push(vec![close_proposal(None, "stop loss")]);

    s.engine.run_cycle_once().await.unwrap();
    assert_eq!(
        s.provider.last_report()[0].outcome,
        Outcome::Rejected { rejection: Rejection::AmbiguousSide { symbol: btc() } }
    );
    assert_eq!(positions(&s.db).await.len(), 2);
}

#[tokio::test]
async fn proposals_for_untraded_symbols_are_rejected() {
    let s = setup().await;
    s.provider.push(vec![open_proposal("DOGEUSDT")]);

    s.engine.run_cycle_once().await.unwrap();
    assert!(matches!(
        s.provider.last_report()[0].outcome,
        Outcome::Rejected { rejection: Rejection::SymbolNotTraded { .. } }
    ));
    assert!(positions(&s.db).await.is_empty());
}

#[tokio::test]
async fn risk_rules_force_close_without_a_decision() {
    let s = setup().await;
    s.engine
        .reconciler()
        .open_position(&open_request(btc(), Side::Long, dec!(0.01), 10))
        .await
        .unwrap()
        .unwrap();
    s.exchange.set_mark_price(&btc(), dec!(95000));

    let summary = s.engine.run_cycle_once().await.unwrap();
    assert_eq!(summary.forced_closes, 1);
    assert_eq!(summary.proposals, 0);
    assert!(positions(&s.db).await.is_empty());
}

#[tokio::test]
async fn account_breach_closes_everything_and_stops_the_scheduler() {
    let mut config = settings();
    config.risk.account_stop_loss_balance = Some(20_000.0);
    let s = setup_with(config).await;
    s.engine
        .reconciler()
        .open_position(&open_request(btc(), Side::Long, dec!(0.01), 5))
        .await
        .unwrap()
        .unwrap();
    s.engine.start().await.unwrap();

    let err = s.engine.run_cycle_once().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, Error::AccountBreach(AccountBreach::StopLoss { .. })));
    assert!(positions(&s.db).await.is_empty());

    let status = s.engine.status().await;
    assert!(!status.running);
    assert!(status.last_error.is_some());
    assert!(matches!(s.engine.stop().await, Err(Error::NotRunning)));
}

#[tokio::test]
async fn failed_decision_step_is_recorded_and_the_cycle_completes() {
    let s = setup().await;
    s.provider.push_error("upstream timed out");

    let summary = s.engine.run_cycle_once().await.unwrap();
    assert_eq!(summary.proposals, 0);

    let mut conn = s.db.acquire().await.unwrap();
    let decision = decisions::latest(&mut conn).await.unwrap().unwrap();
    assert!(!decision.success);
    assert!(decision.error.unwrap().contains("upstream timed out"));
    assert_eq!(account_history::list(&mut conn).await.unwrap().len(), 1);
}

#[tokio::test]
async fn market_data_failure_aborts_the_cycle_with_its_step_name() {
    let s = setup().await;
    s.exchange.set_offline(true);

    let err = s.engine.run_cycle_once().await.unwrap_err();
    assert!(!err.is_fatal());
    assert!(matches!(err, Error::Step { step: "market_data", .. }));

    let mut conn = s.db.acquire().await.unwrap();
    assert!(decisions::latest(&mut conn).await.unwrap().is_none());
}

#[tokio::test]
async fn start_is_single_flight() {
    let s = setup().await;
    s.engine.start().await.unwrap();
    assert!(matches!(s.engine.start().await, Err(Error::AlreadyRunning)));
    assert!(matches!(s.engine.start().await, Err(Error::AlreadyRunning)));
    assert!(s.engine.status().await.running);

    s.engine.stop().await.unwrap();
    assert!(!s.engine.status().await.running);
    assert!(matches!(s.engine.stop().await, Err(Error::NotRunning)));
}

#[tokio::test]
async fn iteration_resumes_from_the_last_decision() {
    let s = setup().await;
    s.engine.run_cycle_once().await.unwrap();
    assert_eq!(s.engine.run_cycle_once().await.unwrap().iteration, 2);

    let restarted = Engine::new(&settings(), s.db.clone(), s.exchange.clone(), ScriptedProvider::new());
    restarted.start().await.unwrap();
    assert_eq!(restarted.status().await.iteration, 2);
    restarted.stop().await.unwrap();
}

#[tokio::test]
async fn stop_reports_running_until_the_in_flight_cycle_finishes() {
    let db = memory_db().await;
    let settings = settings();
    let exchange = Arc::new(SimulatedExchange::new(&settings.simulation));
    let provider = SlowProvider::new(Duration::from_millis(400));
    let engine = Arc::new(Engine::new(&settings, db, exchange, provider.clone()));
    engine.start().await.unwrap();

    let cycle = tokio::spawn({
        let engine = engine.clone();
        async move { engine.run_cycle_once().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stopping = tokio::spawn({
        let engine = engine.clone();
        async move { engine.stop().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!provider.finished());
    assert!(engine.status().await.running);
    assert!(matches!(engine.start().await, Err(Error::Stopping)));
    assert!(matches!(engine.stop().await, Err(Error::Stopping)));

    stopping.await.unwrap().unwrap();
    assert!(provider.finished());
    assert!(!engine.status().await.running);
    assert_eq!(cycle.await.unwrap().unwrap().iteration, 1);

    engine.start().await.unwrap();
    engine.stop().await.unwrap();
}
