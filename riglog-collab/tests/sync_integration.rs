//! Sync engine integration tests.
//!
//! Verifies:
//! - Debounce coalescing: a burst of edits becomes one ledger write
//! - Queue replay: only the newest leftover snapshot is flushed
//! - Last write wins across two editors, including the lost edit
//! - Offline edits survive and flush when the link comes back
//! - Scenario edits never leak into the primary layout
//! - Deleting a deck ends the scenario session keyed to it

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use riglog_collab::ledger::{Ledger, LedgerConfig};
use riglog_collab::protocol::EditorInfo;
use riglog_collab::scenario::ScenarioSession;
use riglog_collab::storage::MemoryStore;
use riglog_collab::sync::{
    LocalLink, MemoryQueueStore, PendingOperation, QueueStore, SyncClient, SyncConfig, SyncEffect,
    SyncEngine, SyncInput, SyncState, ViewChange,
};
use riglog_core::{
    apply_mutation, ItemEdit, Mutation, NewItem, Origin, PlacementEdit, StateEnvelope,
};
use tokio::time::timeout;

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn memory_ledger() -> Arc<Ledger> {
    Arc::new(
        Ledger::open(Arc::new(MemoryStore::new()), LedgerConfig::for_testing())
            .await
            .unwrap(),
    )
}

async fn start_client(ledger: &Arc<Ledger>, name: &str) -> (SyncClient, Arc<LocalLink>, Arc<MemoryQueueStore>) {
    let link = Arc::new(LocalLink::connect(ledger.clone(), EditorInfo::new(name)).await);
    let queue = Arc::new(MemoryQueueStore::new());
    let client = SyncClient::start(SyncConfig::for_testing(), link.clone(), queue.clone()).await;
    (client, link, queue)
}

fn rename(deck: &str, name: &str) -> Mutation {
    Mutation::RenameDeck {
        deck: deck.to_string(),
        name: name.to_string(),
    }
}

/// Fire the debounce armed by `effects` and return the resulting submission.
fn flush(engine: &mut SyncEngine, effects: &[SyncEffect]) -> (u64, StateEnvelope) {
    let token = effects
        .iter()
        .find_map(|e| match e {
            SyncEffect::Schedule { token, .. } => Some(*token),
            _ => None,
        })
        .expect("debounce scheduled");
    engine
        .handle(SyncInput::TimerFired(token))
        .into_iter()
        .find_map(|e| match e {
            SyncEffect::Submit { request, candidate } => Some((request, candidate)),
            _ => None,
        })
        .expect("submission")
}

// ─── Debounce ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_burst_of_edits_becomes_one_write() {
    let ledger = memory_ledger().await;
    let (client, _link, queue) = start_client(&ledger, "Alice").await;
    let handle = client.handle();
    let deck = ledger.read().await.decks[0].id.clone();
    let before = ledger.version().await;

    for i in 0..10 {
        handle
            .mutate(rename(&deck, &format!("Drag step {i}")), Origin::Gesture)
            .await
            .unwrap();
    }

    assert!(handle.settle(Duration::from_secs(3)).await);
    assert_eq!(ledger.version().await, before + 1);
    assert_eq!(ledger.read().await.deck(&deck).unwrap().name, "Drag step 9");
    assert!(queue.snapshot().is_empty());

    let snap = handle.snapshot().await.unwrap();
    assert_eq!(snap.ledger_version, before + 1);
    assert_eq!(snap.state, SyncState::Idle);
}

// ─── Queue replay ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_restart_flushes_only_latest_pending() {
    let ledger = memory_ledger().await;
    let base = ledger.read().await;
    let now = Utc::now();

    let mut older = base.clone();
    older.decks[0].name = "Half-finished".into();
    let mut newer = base.clone();
    newer.decks[0].name = "Finished".into();
    newer.decks.truncate(2);

    let queue = Arc::new(MemoryQueueStore::with_operations(vec![
        PendingOperation { version: base.version + 1, timestamp: now, state: older },
        PendingOperation { version: base.version + 2, timestamp: now, state: newer },
    ]));
    let link = Arc::new(LocalLink::connect(ledger.clone(), EditorInfo::new("Restarted")).await);
    let client = SyncClient::start(SyncConfig::for_testing(), link, queue.clone()).await;

    assert!(client.handle().settle(Duration::from_secs(3)).await);
    assert_eq!(ledger.version().await, base.version + 1);
    let state = ledger.read().await;
    assert_eq!(state.decks.len(), 2);
    assert_eq!(state.decks[0].name, "Finished");
    assert!(queue.load().unwrap().is_empty());
}

// ─── Last write wins ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stale_snapshot_overwrites_concurrent_edit() {
    let ledger = memory_ledger().await;
    for _ in 0..4 {
        let current = ledger.read().await;
        ledger.apply_envelope(&current).await.unwrap();
    }
    let shared = ledger.read().await;
    assert_eq!(shared.version, 5);

    let deck_a = shared.decks[0].id.clone();
    let deck_b = shared.decks[1].id.clone();
    let mut alice = SyncEngine::new(SyncConfig::default(), shared.clone());
    let mut bob = SyncEngine::new(SyncConfig::default(), shared.clone());

    // Alice edits deck A and gets version 6.
    let (_, effects) = alice.mutate(rename(&deck_a, "Alice's deck"), Origin::Gesture, Utc::now()).unwrap();
    let (request, candidate) = flush(&mut alice, &effects);
    let accepted = ledger.apply_envelope(&candidate).await.unwrap();
    assert_eq!(accepted.version, 6);
    alice.handle(SyncInput::SubmitSucceeded { request, accepted });

    // Bob never saw version 6 and edits deck B.
    let (_, effects) = bob.mutate(rename(&deck_b, "Bob's deck"), Origin::Gesture, Utc::now()).unwrap();
    let (_, candidate) = flush(&mut bob, &effects);
    assert_eq!(candidate.deck(&deck_a).unwrap().name, shared.decks[0].name);
    let accepted = ledger.apply_envelope(&candidate).await.unwrap();
    assert_eq!(accepted.version, 7);

    // Alice's edit to deck A is gone from the ledger.
    let state = ledger.read().await;
    assert_eq!(state.deck(&deck_b).unwrap().name, "Bob's deck");
    assert_eq!(state.deck(&deck_a).unwrap().name, shared.decks[0].name);

    // And from Alice once the push arrives.
    let effects = alice.handle(SyncInput::RemoteState(state));
    assert!(effects.contains(&SyncEffect::View(ViewChange::DecksReplaced { version: 7 })));
    assert_eq!(alice.context().deck(&deck_a).unwrap().name, shared.decks[0].name);
}

#[tokio::test]
async fn test_editors_converge_on_pushed_state() {
    let ledger = memory_ledger().await;
    let (alice, _alice_link, _) = start_client(&ledger, "Alice").await;
    let (bob, _bob_link, _) = start_client(&ledger, "Bob").await;
    let deck = ledger.read().await.decks[2].id.clone();
    let mut bob_views = bob.handle().views();

    alice
        .handle()
        .mutate(
            Mutation::AddItem {
                deck: deck.clone(),
                item: NewItem::new("Crane", 4.0, 2.0).at(100.0, 50.0),
            },
            Origin::Gesture,
        )
        .await
        .unwrap();
    assert!(alice.handle().settle(Duration::from_secs(3)).await);

    let change = timeout(Duration::from_secs(2), bob_views.recv()).await.unwrap().unwrap();
    assert!(matches!(change, ViewChange::DecksReplaced { .. }));
    let snap = bob.handle().snapshot().await.unwrap();
    assert_eq!(snap.ledger_version, ledger.version().await);
    let bob_deck = snap.decks.iter().find(|d| d.id == deck).unwrap();
    assert_eq!(bob_deck.items().next().unwrap().base.label, "Crane");
}

#[tokio::test]
async fn test_deleted_open_deck_closes_on_other_editor() {
    let ledger = memory_ledger().await;
    let (alice, _alice_link, _) = start_client(&ledger, "Alice").await;
    let (bob, _bob_link, _) = start_client(&ledger, "Bob").await;
    let deck = ledger.read().await.decks[0].id.clone();
    assert!(bob.handle().open_deck(deck.clone()).await.unwrap());
    let mut bob_views = bob.handle().views();

    alice
        .handle()
        .mutate(Mutation::DeleteDeck { deck: deck.clone() }, Origin::Gesture)
        .await
        .unwrap();

    let mut closed = false;
    while let Ok(Ok(change)) = timeout(Duration::from_secs(2), bob_views.recv()).await {
        if change == ViewChange::DeckClosed(deck.clone()) {
            closed = true;
            break;
        }
    }
    assert!(closed);
    assert_eq!(bob.handle().snapshot().await.unwrap().open_deck, None);
}

// ─── Offline ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_offline_edits_flush_when_back_online() {
    let ledger = memory_ledger().await;
    let (client, link, queue) = start_client(&ledger, "Field editor").await;
    let handle = client.handle();
    let deck = ledger.read().await.decks[1].id.clone();
    let before = ledger.version().await;

    link.set_online(false).await;
    handle.mutate(rename(&deck, "Offline rename"), Origin::Gesture).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snap = handle.snapshot().await.unwrap();
    assert_eq!(snap.state, SyncState::Retrying);
    assert!(!snap.online);
    assert_eq!(queue.snapshot().len(), 1);
    assert_eq!(ledger.version().await, before);

    link.set_online(true).await;
    assert!(handle.settle(Duration::from_secs(3)).await);
    assert_eq!(ledger.version().await, before + 1);
    assert_eq!(ledger.read().await.deck(&deck).unwrap().name, "Offline rename");
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_scenario_edits_never_reach_primary_layout() {
    let ledger = memory_ledger().await;
    let (client, _link, _) = start_client(&ledger, "Planner").await;
    let handle = client.handle();
    let deck = ledger.read().await.decks[0].id.clone();

    handle
        .mutate(
            Mutation::AddItem { deck: deck.clone(), item: NewItem::new("Fixed skid", 3.0, 3.0) },
            Origin::Gesture,
        )
        .await
        .unwrap();
    let scenario = handle
        .mutate(
            Mutation::CreateScenario { deck: deck.clone(), label: "Lift plan".into() },
            Origin::Gesture,
        )
        .await
        .unwrap()
        .created
        .unwrap();
    assert!(handle.settle(Duration::from_secs(3)).await);
    let primary_before = ledger.read().await.deck(&deck).unwrap().layout.clone();

    let decks = handle.snapshot().await.unwrap().decks;
    let mut session = ScenarioSession::new();
    session.begin_edit(&decks, &deck, &scenario).unwrap();
    let crane = session.add_item(NewItem::new("Crawler crane", 8.0, 6.0), Utc::now()).unwrap();
    session
        .edit_item(
            &crane,
            ItemEdit::Placement(PlacementEdit::Move { dx: 250.0, dy: 0.0 }),
            Origin::Gesture,
            Utc::now(),
        )
        .unwrap();

    let store = session.end_edit().unwrap();
    handle.mutate(store, Origin::Programmatic).await.unwrap();
    assert!(handle.settle(Duration::from_secs(3)).await);

    let state = ledger.read().await;
    let stored = state.deck(&deck).unwrap();
    assert_eq!(stored.layout, primary_before);
    assert_eq!(stored.scenario(&scenario).unwrap().items[0].base.label, "Crawler crane");

    let layout_json = serde_json::to_string(&stored.layout).unwrap();
    assert!(!layout_json.contains("Crawler crane"));
    assert!(!layout_json.contains(&crane));
}

#[tokio::test]
async fn test_deck_deletion_ends_scenario_session() {
    let ledger = memory_ledger().await;
    let (client, _link, _) = start_client(&ledger, "Planner").await;
    let handle = client.handle();
    let deck = ledger.read().await.decks[2].id.clone();

    let scenario = handle
        .mutate(
            Mutation::CreateScenario { deck: deck.clone(), label: "Tow-out".into() },
            Origin::Gesture,
        )
        .await
        .unwrap()
        .created
        .unwrap();
    let decks = handle.snapshot().await.unwrap().decks;
    let mut session = ScenarioSession::new();
    session.begin_edit(&decks, &deck, &scenario).unwrap();
    session.add_item(NewItem::new("Anchor winch", 4.0, 3.0), Utc::now()).unwrap();

    let delete = Mutation::DeleteDeck { deck: deck.clone() };
    handle.mutate(delete.clone(), Origin::Gesture).await.unwrap();
    session.observe(&delete);
    assert!(session.editing().is_none());
    assert!(!session.is_active(&deck, &scenario));
    assert_eq!(session.end_edit(), None);

    assert!(handle.settle(Duration::from_secs(3)).await);
    assert!(ledger.read().await.deck(&deck).is_none());
}

#[test]
fn test_scenario_store_only_touches_its_record() {
    let now = Utc::now();
    let mut decks = StateEnvelope::with_default_decks(1, now).decks;
    let deck = decks[0].id.clone();
    let scenario = apply_mutation(
        &mut decks,
        Mutation::CreateScenario { deck: deck.clone(), label: "Plan".into() },
        Origin::Programmatic,
        now,
    )
    .unwrap()
    .created
    .unwrap();

    let mut session = ScenarioSession::new();
    session.begin_edit(&decks, &deck, &scenario).unwrap();
    session.add_item(NewItem::new("Container", 6.0, 2.5), now).unwrap();
    let store = session.end_edit().unwrap();
    apply_mutation(&mut decks, store, Origin::Programmatic, now).unwrap();

    assert!(decks[0].layout.is_empty());
    assert_eq!(decks[0].scenarios[0].items.len(), 1);
}
