//! Settlement: payouts, idempotence, concurrency and crash recovery

mod common;

use common::*;
use drawhouse::{
    config::StorageBackend,
    errors::{EngineError, StateConflictError, ValidationError},
    games::SeededOutcomeSource,
    games::types::{
        GameState, Multiplier, OutcomeOrigin, SettlementState, SumBoundary, WagerKind,
    },
    EngineMetrics, GameStore, Ledger,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn test_settlement_pays_matches_and_categories() {
    let h = harness(Arc::new(FixedOutcomeSource::new(low_draw()))).await;
    let game = h.open_game().await;
    let alice = h.funded_owner("alice");

    let three = h.place(&alice, game.id, WagerKind::Numbers, &[10, 1, 5], 1_000).await.unwrap();
    let two = h.place(&alice, game.id, WagerKind::Numbers, &[1, 5, 79], 1_000).await.unwrap();
    let none = h.place(&alice, game.id, WagerKind::Numbers, &[70, 75, 79], 1_000).await.unwrap();
    let small = h.place(&alice, game.id, WagerKind::Small, &[], 1_000).await.unwrap();
    let big = h.place(&alice, game.id, WagerKind::Big, &[], 1_000).await.unwrap();
    let even = h.place(&alice, game.id, WagerKind::Even, &[], 1_000).await.unwrap();
    let odd = h.place(&alice, game.id, WagerKind::Odd, &[], 1_000).await.unwrap();
    assert_eq!(three.chosen_numbers, vec![1, 5, 10]);

    h.close(&game);
    let summary = h.engine.trigger_settlement(game.id).await.unwrap();
    assert_eq!(summary.state, GameState::Completed);
    assert_eq!(summary.newly_settled, 7);
    assert_eq!(summary.winners, 4);

    let settled = |id| {
        let engine = h.engine.clone();
        async move { engine.get_wager(id).await.unwrap() }
    };

    let w = settled(three.id).await;
    assert_eq!(w.state, SettlementState::Won);
    assert_eq!(w.matched_numbers, vec![1, 5, 10]);
    assert_eq!(w.matched_count, 3);
    assert_eq!(w.applied_multiplier, Multiplier::whole(2));
    assert_eq!(w.payout_amount, 2_000);

    let w = settled(two.id).await;
    assert_eq!(w.matched_count, 2);
    assert_eq!(w.payout_amount, 1_000);

    let w = settled(none.id).await;
    assert_eq!(w.state, SettlementState::Lost);
    assert_eq!(w.payout_amount, 0);
    assert!(w.matched_numbers.is_empty());

    assert_eq!(settled(small.id).await.payout_amount, 1_950);
    assert_eq!(settled(big.id).await.state, SettlementState::Lost);
    assert_eq!(settled(even.id).await.payout_amount, 1_950);
    assert_eq!(settled(odd.id).await.state, SettlementState::Lost);

    // 7 stakes out, 2000 + 1000 + 1950 + 1950 back
    assert_eq!(h.balance(&alice).await, STARTING_BALANCE - 7_000 + 6_900);
    assert_eq!(summary.payout_credited, 6_900);
    assert_eq!(summary.aggregates.stake_total, 7_000);
    assert_eq!(summary.aggregates.payout_total, 6_900);
    assert_eq!(summary.aggregates.wager_count, 7);
}

#[tokio::test]
async fn test_settlement_conserves_money() {
    let h = harness(Arc::new(SeededOutcomeSource::new(99))).await;
    let game = h.open_game().await;
    let owners: Vec<_> = (0..4).map(|i| h.funded_owner(&format!("player-{}", i))).collect();

    let picks: [&[u8]; 4] = [&[1, 2, 3, 4, 5], &[10, 20, 30], &[80], &[7, 14, 21, 28, 35, 42, 49, 56]];
    let mut staked = 0;
    for (i, owner) in owners.iter().enumerate() {
        for (j, numbers) in picks.iter().enumerate() {
            let stake = 100 * (i as u64 + 1) * (j as u64 + 1);
            h.place(owner, game.id, WagerKind::Numbers, numbers, stake).await.unwrap();
            staked += stake;
        }
        h.place(owner, game.id, WagerKind::Big, &[], 500).await.unwrap();
        staked += 500;
    }

    h.close(&game);
    let summary = h.engine.trigger_settlement(game.id).await.unwrap();

    let wagers = h.engine.get_wagers_for_game(game.id).await.unwrap();
    let paid: u64 = wagers
        .iter()
        .filter(|w| w.state == SettlementState::Won)
        .map(|w| w.payout_amount)
        .sum();
    assert!(wagers.iter().all(|w| w.state.is_terminal()));

    let mut balances = 0;
    for owner in &owners {
        balances += h.balance(owner).await;
    }
    assert_eq!(balances + staked, STARTING_BALANCE * owners.len() as u64 + paid);
    assert_eq!(summary.aggregates.stake_total, staked);
    assert_eq!(summary.aggregates.payout_total, paid);
    assert_eq!(summary.payout_credited, paid);
}

#[tokio::test]
async fn test_settlement_is_idempotent() {
    let source = Arc::new(FixedOutcomeSource::new(low_draw()));
    let h = harness(source.clone()).await;
    let game = h.open_game().await;
    let bob = h.funded_owner("bob");
    let wager = h.place(&bob, game.id, WagerKind::Numbers, &[1, 2, 3], 1_000).await.unwrap();

    h.close(&game);
    let first = h.engine.trigger_settlement(game.id).await.unwrap();
    let balance_after_first = h.balance(&bob).await;
    let wager_after_first = h.engine.get_wager(wager.id).await.unwrap();

    let second = h.engine.trigger_settlement(game.id).await.unwrap();
    assert_eq!(first.newly_settled, 1);
    assert_eq!(second.newly_settled, 0);
    assert_eq!(second.payout_credited, 0);
    assert_eq!(second.outcome, first.outcome);
    assert_eq!(second.aggregates, first.aggregates);
    assert_eq!(h.balance(&bob).await, balance_after_first);
    assert_eq!(h.engine.get_wager(wager.id).await.unwrap(), wager_after_first);
    assert_eq!(source.draws(), 1);
}

#[tokio::test]
async fn test_settlement_before_close_is_rejected() {
    let h = harness(Arc::new(FixedOutcomeSource::new(low_draw()))).await;
    let game = h.open_game().await;

    let err = h.engine.trigger_settlement(game.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::StateConflict(StateConflictError::GameNotClosed(_))
    ));
    assert_eq!(h.engine.get_game(game.id).await.unwrap().outcome, None);
}

#[tokio::test]
async fn test_sum_threshold_exclusive_boundary() {
    let h = harness(Arc::new(FixedOutcomeSource::new(threshold_draw()))).await;
    let game = h.open_game().await;
    let carol = h.funded_owner("carol");
    let big = h.place(&carol, game.id, WagerKind::Big, &[], 1_000).await.unwrap();
    let small = h.place(&carol, game.id, WagerKind::Small, &[], 1_000).await.unwrap();

    h.close(&game);
    let summary = h.engine.trigger_settlement(game.id).await.unwrap();
    assert_eq!(summary.outcome.unwrap().sum(), 810);

    assert_eq!(h.engine.get_wager(big.id).await.unwrap().state, SettlementState::Won);
    assert_eq!(h.engine.get_wager(small.id).await.unwrap().state, SettlementState::Lost);
}

#[tokio::test]
async fn test_sum_threshold_both_win_boundary() {
    let mut config = test_config();
    config.payouts.sum_boundary = SumBoundary::BothWin;
    let h = harness_with(config, Arc::new(FixedOutcomeSource::new(threshold_draw())), None).await;
    let game = h.open_game().await;
    let carol = h.funded_owner("carol");
    let big = h.place(&carol, game.id, WagerKind::Big, &[], 1_000).await.unwrap();
    let small = h.place(&carol, game.id, WagerKind::Small, &[], 1_000).await.unwrap();

    h.close(&game);
    h.engine.trigger_settlement(game.id).await.unwrap();

    assert_eq!(h.engine.get_wager(big.id).await.unwrap().payout_amount, 1_950);
    assert_eq!(h.engine.get_wager(small.id).await.unwrap().payout_amount, 1_950);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settlement_credits_once() {
    let source = Arc::new(FixedOutcomeSource::new(low_draw()));
    let h = harness(source.clone()).await;
    let game = h.open_game().await;
    let dave = h.funded_owner("dave");
    for numbers in [[1u8, 2, 3], [4, 5, 6], [7, 8, 60]] {
        h.place(&dave, game.id, WagerKind::Numbers, &numbers, 1_000).await.unwrap();
    }
    h.close(&game);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = h.engine.clone();
            let game_id = game.id;
            tokio::spawn(async move { engine.trigger_settlement(game_id).await })
        })
        .collect();

    let mut newly_settled = 0;
    let mut credited = 0;
    for result in futures::future::join_all(handles).await {
        let summary = result.unwrap().unwrap();
        assert_eq!(summary.state, GameState::Completed);
        newly_settled += summary.newly_settled;
        credited += summary.payout_credited;
    }

    // 3 matches pay 2x twice, 2 matches pay 1x once
    assert_eq!(newly_settled, 3);
    assert_eq!(credited, 5_000);
    assert_eq!(h.balance(&dave).await, STARTING_BALANCE - 3_000 + 5_000);
    assert_eq!(source.draws(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_force_and_tick_settle_once() {
    let source = Arc::new(FixedOutcomeSource::new(high_draw()));
    let h = harness(source.clone()).await;
    let game = h.open_game().await;
    let erin = h.funded_owner("erin");
    let wager = h.place(&erin, game.id, WagerKind::Small, &[], 1_000).await.unwrap();
    h.close(&game);

    let forced = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.force_outcome(game.id, low_draw()).await })
    };
    let triggered = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.trigger_settlement(game.id).await })
    };
    let forced = forced.await.unwrap();
    let triggered = triggered.await.unwrap().unwrap();

    let stored = h.engine.get_game(game.id).await.unwrap();
    let settled = h.engine.get_wager(wager.id).await.unwrap();
    match forced {
        Ok(game) => {
            // Force won the lock: small wins against 1..=20
            assert_eq!(game.outcome_origin, Some(OutcomeOrigin::Forced));
            assert_eq!(settled.state, SettlementState::Won);
            assert_eq!(source.draws(), 0);
        }
        Err(e) => {
            assert!(matches!(
                e,
                EngineError::StateConflict(StateConflictError::OutcomeAlreadySet(_))
            ));
            assert_eq!(stored.outcome_origin, Some(OutcomeOrigin::Generated));
            assert_eq!(settled.state, SettlementState::Lost);
        }
    }
    assert_eq!(triggered.outcome, stored.outcome);
    let expected = if settled.state == SettlementState::Won { 1_950 } else { 0 };
    assert_eq!(h.balance(&erin).await, STARTING_BALANCE - 1_000 + expected);
}

#[tokio::test]
async fn test_force_outcome_rules() {
    let source = Arc::new(FixedOutcomeSource::new(high_draw()));
    let h = harness(source.clone()).await;
    let game = h.open_game().await;
    let frank = h.funded_owner("frank");
    let wager = h.place(&frank, game.id, WagerKind::Numbers, &[1, 2], 1_000).await.unwrap();

    let err = h.engine.force_outcome(game.id, low_draw()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::StateConflict(StateConflictError::GameNotClosed(_))
    ));

    h.close(&game);
    let err = h.engine.force_outcome(game.id, (1..=19).collect()).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::InvalidOutcome(_))));
    assert_eq!(h.engine.get_game(game.id).await.unwrap().outcome, None);

    let settled = h.engine.force_outcome(game.id, low_draw()).await.unwrap();
    assert_eq!(settled.state, GameState::Completed);
    assert_eq!(settled.outcome_origin, Some(OutcomeOrigin::Forced));
    assert_eq!(settled.outcome.as_ref().unwrap().numbers(), low_draw().as_slice());
    assert_eq!(h.engine.get_wager(wager.id).await.unwrap().payout_amount, 1_000);

    let err = h.engine.force_outcome(game.id, high_draw()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::StateConflict(StateConflictError::OutcomeAlreadySet(_))
    ));
    assert_eq!(source.draws(), 0);
}

#[tokio::test]
async fn test_manual_draw_mode_waits_for_forced_outcome() {
    let mut config = test_config();
    config.scheduler.auto_draw = false;
    let source = Arc::new(FixedOutcomeSource::new(high_draw()));
    let h = harness_with(config, source.clone(), None).await;
    let game = h.open_game().await;
    let gina = h.funded_owner("gina");
    h.place(&gina, game.id, WagerKind::Big, &[], 1_000).await.unwrap();
    h.close(&game);

    let err = h.engine.trigger_settlement(game.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::StateConflict(StateConflictError::OutcomeMissing(_))
    ));

    let settled = h.engine.force_outcome(game.id, high_draw()).await.unwrap();
    assert_eq!(settled.state, GameState::Completed);
    assert_eq!(h.balance(&gina).await, STARTING_BALANCE - 1_000 + 1_950);
    assert_eq!(source.draws(), 0);
}

#[tokio::test]
async fn test_draw_outcome_generates_in_manual_mode() {
    let mut config = test_config();
    config.scheduler.auto_draw = false;
    let source = Arc::new(FixedOutcomeSource::new(low_draw()));
    let h = harness_with(config, source.clone(), None).await;
    let game = h.open_game().await;
    h.close(&game);

    let summary = h.engine.draw_outcome(game.id).await.unwrap();
    assert_eq!(summary.state, GameState::Completed);
    assert_eq!(summary.newly_settled, 0);
    assert_eq!(source.draws(), 1);

    let stored = h.engine.get_game(game.id).await.unwrap();
    assert_eq!(stored.outcome_origin, Some(OutcomeOrigin::Generated));
    assert_eq!(stored.aggregates.wager_count, 0);
}

#[tokio::test]
async fn test_failed_wager_write_keeps_credit_and_heals_on_rerun() {
    let store = Arc::new(FlakyStore::default());
    let source = Arc::new(FixedOutcomeSource::new(low_draw()));
    let h = harness_with(test_config(), source.clone(), Some(store.clone())).await;
    let game = h.open_game().await;
    let hana = h.funded_owner("hana");
    let wager = h.place(&hana, game.id, WagerKind::Numbers, &[1, 2, 3], 1_000).await.unwrap();
    h.close(&game);

    store.fail_wager_updates.store(true, Ordering::SeqCst);
    let err = h.engine.trigger_settlement(game.id).await.unwrap_err();
    assert!(err.is_operator_alert());
    assert_eq!(
        h.engine.metrics().persistence_escalations.load(Ordering::Relaxed),
        1
    );

    // The credit landed; the wager and game are still unsettled but the outcome is fixed
    let credited = STARTING_BALANCE - 1_000 + 2_000;
    assert_eq!(h.balance(&hana).await, credited);
    let interrupted = h.engine.get_game(game.id).await.unwrap();
    assert_eq!(interrupted.state, GameState::Active);
    assert!(interrupted.outcome.is_some());
    assert_eq!(
        h.engine.get_wager(wager.id).await.unwrap().state,
        SettlementState::Pending
    );

    store.fail_wager_updates.store(false, Ordering::SeqCst);
    let summary = h.engine.trigger_settlement(game.id).await.unwrap();
    assert_eq!(summary.state, GameState::Completed);
    assert_eq!(summary.newly_settled, 1);
    assert_eq!(summary.outcome, interrupted.outcome);
    assert_eq!(h.balance(&hana).await, credited);
    assert_eq!(
        h.engine.get_wager(wager.id).await.unwrap().payout_amount,
        2_000
    );
    assert_eq!(source.draws(), 1);
}

#[tokio::test]
async fn test_settlement_metrics_and_events() {
    let h = harness(Arc::new(FixedOutcomeSource::new(low_draw()))).await;
    let mut events = h.engine.subscribe();
    let game = h.open_game().await;
    let ivan = h.funded_owner("ivan");
    h.place(&ivan, game.id, WagerKind::Numbers, &[1, 2], 500).await.unwrap();
    h.place(&ivan, game.id, WagerKind::Numbers, &[70, 71], 500).await.unwrap();
    h.close(&game);
    h.engine.trigger_settlement(game.id).await.unwrap();

    let metrics: Arc<EngineMetrics> = h.engine.metrics();
    assert_eq!(metrics.wagers_placed.load(Ordering::Relaxed), 2);
    assert_eq!(metrics.wagers_settled.load(Ordering::Relaxed), 2);
    assert_eq!(metrics.wagers_won.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.payout_total.load(Ordering::Relaxed), 500);
    assert_eq!(metrics.games_settled.load(Ordering::Relaxed), 1);

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.game_id(), game.id);
        if let Some(state) = event.resulting_state() {
            states.push(state);
        }
    }
    assert_eq!(states.last(), Some(&GameState::Completed));
}

#[tokio::test]
async fn test_ledger_records_one_payout_key_per_wager() {
    let h = harness(Arc::new(FixedOutcomeSource::new(low_draw()))).await;
    let game = h.open_game().await;
    let jo = h.funded_owner("jo");
    let wager = h.place(&jo, game.id, WagerKind::Even, &[], 1_000).await.unwrap();
    h.close(&game);
    h.engine.trigger_settlement(game.id).await.unwrap();

    let key = drawhouse::ledger::payout_key(&wager.id);
    assert!(h.ledger.has_applied(&jo, &key));
    // Replaying the payout by hand does not move the balance
    let before = h.balance(&jo).await;
    h.ledger.credit(&jo, 1_950, &key).await.unwrap();
    assert_eq!(h.balance(&jo).await, before);

    let store = h.engine.services().store();
    assert!(store.pending_wagers_for_game(&game.id).await.unwrap().is_empty());
    assert_eq!(h.engine.services().config().storage.backend, StorageBackend::Memory);
}
