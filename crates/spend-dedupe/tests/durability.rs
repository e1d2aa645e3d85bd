//! Persistence, restart and concurrency behaviour of the idempotency store

use pretty_assertions::assert_eq;
use spend_dedupe::{
    lookup_by_content, rebuild_from_ledger, ContentQuery, DedupeError, DedupeStatus, DedupeStore,
    ReserveOutcome,
};
use spend_ledger::{LedgerPort, LedgerStore, MemoryLedger};
use spend_record::{Category, Decimal, EventKey, LedgerRow, Receipt};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn key(id: &str) -> EventKey {
    EventKey::from_message("-100371", id)
}

#[test]
fn committed_keys_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dedupe.json");
    {
        let store = DedupeStore::open(&path).unwrap();
        store.reserve(&key("1"), None).unwrap();
        store.commit(&key("1"), &Receipt::from_raw("spend:msg:-100371:1@row1")).unwrap();
        store.reserve(&key("2"), None).unwrap();
        store.fail(&key("2"), "HTTP 400").unwrap();
    }

    let store = DedupeStore::open(&path).unwrap();
    assert_eq!(store.len(), 2);
    assert!(matches!(
        store.reserve(&key("1"), None).unwrap(),
        ReserveOutcome::AlreadyCommitted { .. }
    ));
    assert_eq!(store.reserve(&key("2"), None).unwrap(), ReserveOutcome::Reserved);
    assert!(store.stale_reservations().is_empty());
}

#[test]
fn reservations_left_by_a_crash_are_reported_stale() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dedupe.json");
    {
        let store = DedupeStore::open(&path).unwrap();
        store.reserve(&key("1"), None).unwrap();
    }
    let store = DedupeStore::open(&path).unwrap();
    assert_eq!(store.stale_reservations(), &[key("1")]);
    assert_eq!(store.status(&key("1")), Some(DedupeStatus::Reserved));
}

#[test]
fn corrupted_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dedupe.json");
    std::fs::write(&path, b"{\"version\": 1, \"records\": {").unwrap();

    let err = DedupeStore::open(&path).unwrap_err();
    assert!(matches!(err, DedupeError::Corrupted { .. }));
    assert!(err.is_fatal());
}

#[test]
fn missing_parent_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("dedupe.json");
    let store = DedupeStore::open(&path).unwrap();
    store.reserve(&key("1"), None).unwrap();
    assert!(path.exists());
}

#[test]
fn concurrent_reservations_have_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DedupeStore::open(dir.path().join("dedupe.json")).unwrap());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.reserve(&key("42"), None).unwrap())
        })
        .collect();
    let outcomes: Vec<ReserveOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = outcomes.iter().filter(|o| **o == ReserveOutcome::Reserved).count();
    assert_eq!(winners, 1);
    assert_eq!(
        outcomes.iter().filter(|o| **o == ReserveOutcome::AlreadyReserved).count(),
        15
    );
}

fn ledger_row(id: &str) -> LedgerRow {
    LedgerRow {
        ts: chrono::DateTime::from_timestamp(1_769_756_340, 0).unwrap(),
        chat_id: "-100371".into(),
        message_id: Some(id.into()),
        author_id: "999".into(),
        author_name: "Haowei Zhang".into(),
        item: "gloves".into(),
        price: Decimal::new(13278, 2),
        currency: "AUD".into(),
        category: Category::Consumables,
        project_code: "Pursuit".into(),
        quantity: None,
        vendor: None,
        notes: None,
        raw_text: "buy gloves 132.78 AUD Pursuit consumables".into(),
        receipt: Receipt::token_for(&key(id)).as_str().to_string(),
    }
}

#[tokio::test]
async fn lookup_finds_row_by_embedded_key() {
    let ledger = Arc::new(MemoryLedger::new());
    ledger.append_row("Spend", &ledger_row("1")).await.unwrap();
    let port = LedgerPort::new(ledger, "Spend");

    let receipt = lookup_by_content(&port, &key("1"), None, 100).await.unwrap();
    assert_eq!(receipt, Some(Receipt::from_raw("spend:msg:-100371:1@row1")));
    assert_eq!(lookup_by_content(&port, &key("2"), None, 100).await.unwrap(), None);
}

#[tokio::test]
async fn content_lookup_matches_other_fingerprints_only() {
    let ledger = Arc::new(MemoryLedger::new());
    let row = ledger_row("1");
    let earlier = EventKey::fingerprint("-100371", "999", &row.raw_text, row.ts, Duration::from_secs(120));
    let mut fingerprinted = row.clone();
    fingerprinted.message_id = None;
    fingerprinted.receipt = Receipt::token_for(&earlier).as_str().to_string();
    ledger.append_row("Spend", &fingerprinted).await.unwrap();
    let port = LedgerPort::new(ledger, "Spend");

    let query = ContentQuery::around(
        "-100371",
        "999",
        "Gloves",
        Decimal::new(13278, 2),
        Decimal::ZERO,
        row.ts + chrono::Duration::seconds(90),
        Duration::from_secs(300),
    );
    let later = EventKey::fingerprint(
        "-100371",
        "999",
        &row.raw_text,
        row.ts + chrono::Duration::seconds(600),
        Duration::from_secs(120),
    );
    assert_ne!(earlier, later);
    let found = lookup_by_content(&port, &later, Some(&query), 100).await.unwrap();
    assert_eq!(found, Some(Receipt::at(&fingerprinted.receipt, "row1")));

    // A channel message is a distinct event even with identical content
    let found = lookup_by_content(&port, &key("77"), Some(&query), 100).await.unwrap();
    assert_eq!(found, None);

    let mut pricier = query.clone();
    pricier.amount_min = Decimal::new(200, 0);
    pricier.amount_max = Decimal::new(300, 0);
    assert_eq!(lookup_by_content(&port, &later, Some(&pricier), 100).await.unwrap(), None);
}

#[tokio::test]
async fn lost_store_is_rebuilt_from_ledger() {
    let ledger = Arc::new(MemoryLedger::new());
    ledger.append_row("Spend", &ledger_row("1")).await.unwrap();
    ledger.append_row("Spend", &ledger_row("2")).await.unwrap();
    let mut foreign = ledger_row("3");
    foreign.receipt = "telegram:-100371:message:3".into();
    ledger.append_row("Spend", &foreign).await.unwrap();
    let port = LedgerPort::new(ledger, "Spend");

    let store = DedupeStore::in_memory();
    let report = rebuild_from_ledger(&store, &port, 100).await.unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.foreign, 1);
    assert_eq!(report.restored, vec![key("1"), key("2")]);

    assert!(matches!(
        store.reserve(&key("2"), None).unwrap(),
        ReserveOutcome::AlreadyCommitted { .. }
    ));

    let again = rebuild_from_ledger(&store, &port, 100).await.unwrap();
    assert!(again.restored.is_empty());
    assert_eq!(again.known, 2);
}
