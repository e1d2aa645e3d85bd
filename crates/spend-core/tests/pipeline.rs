use futures::future::join_all;
use pretty_assertions::assert_eq;
use spend_core::{Orchestrator, Outcome};
use spend_dedupe::{DedupeStatus, DedupeStore};
use spend_ledger::{AppendError, LedgerPort};
use spend_record::{Category, RequiredField};
use spend_test_utils::{
    message, message_from, test_config, unkeyed, Harness, RecordingChannel, ScriptedLedger, CHAT, TABLE,
};
use std::sync::Arc;
use std::time::Duration;

const GLOVES: &str = "buy gloves 132.78 AUD Pursuit consumables";

#[tokio::test(start_paused = true)]
async fn complete_message_is_logged_without_question() {
    let h = Harness::new(ScriptedLedger::new());

    let outcome = h.pipeline.handle_event(message("1", GLOVES)).await.unwrap();

    let Outcome::Logged { receipt, summary } = outcome else {
        panic!("expected logged, got {outcome:?}");
    };
    assert_eq!(receipt.as_str(), format!("spend:msg:{CHAT}:1@row1"));
    assert_eq!(summary.to_string(), "gloves, 132.78 AUD, project Pursuit");
    assert_eq!(
        h.channel.texts(),
        vec![format!("Logged: gloves, 132.78 AUD, project Pursuit (receipt spend:msg:{CHAT}:1@row1)")]
    );

    let rows = h.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].item, "gloves");
    assert_eq!(rows[0].category, Category::Consumables);
    assert_eq!(rows[0].author_name, "Haowei Zhang");
}

#[tokio::test(start_paused = true)]
async fn incomplete_message_asks_once_then_logs_after_reply() {
    let h = Harness::new(ScriptedLedger::new());

    let outcome = h
        .pipeline
        .handle_event(message("1", "bought electrodes $320"))
        .await
        .unwrap();
    let Outcome::ClarificationRequested(handle) = outcome else {
        panic!("expected a question, got {outcome:?}");
    };
    assert_eq!(handle.missing, vec![RequiredField::Category, RequiredField::ProjectCode]);
    assert_eq!(h.channel.texts(), vec![handle.question.clone()]);
    assert!(h.rows().is_empty());

    let outcome = h.pipeline.handle_event(message("2", "equipment DE")).await.unwrap();
    let Outcome::Logged { receipt, summary } = outcome else {
        panic!("expected logged, got {outcome:?}");
    };
    assert_eq!(receipt.as_str(), format!("spend:msg:{CHAT}:1@row1"));
    assert_eq!(summary.to_string(), "electrodes, 320 AUD, project DE");

    let rows = h.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].message_id.as_deref(), Some("1"));
    assert_eq!(rows[0].currency, "AUD");
    assert_eq!(rows[0].category, Category::Equipment);
    assert_eq!(rows[0].raw_text, "bought electrodes $320 equipment DE");
    assert!(h.pipeline.tracker().is_empty());
}

#[tokio::test(start_paused = true)]
async fn partial_reply_asks_again() {
    let h = Harness::new(ScriptedLedger::new());
    h.pipeline.handle_event(message("1", "bought electrodes $320")).await.unwrap();

    let outcome = h.pipeline.handle_event(message("2", "equipment")).await.unwrap();
    let Outcome::ClarificationRequested(handle) = outcome else {
        panic!("expected a question, got {outcome:?}");
    };
    assert_eq!(handle.missing, vec![RequiredField::ProjectCode]);

    // "order" is a trigger word, but with no price it reads as a reply
    let outcome = h.pipeline.handle_event(message("3", "order for DE")).await.unwrap();
    assert!(matches!(outcome, Outcome::Logged { .. }), "{outcome:?}");
    assert_eq!(h.rows().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn new_purchase_supersedes_pending_question() {
    let h = Harness::new(ScriptedLedger::new());
    h.pipeline.handle_event(message("1", "bought electrodes $320")).await.unwrap();

    let outcome = h.pipeline.handle_event(message("2", GLOVES)).await.unwrap();
    assert!(matches!(outcome, Outcome::Logged { .. }));
    assert!(h.pipeline.tracker().is_empty());

    let outcome = h.pipeline.handle_event(message("3", "equipment DE")).await.unwrap();
    assert_eq!(outcome, Outcome::Ignored);
    assert_eq!(h.rows().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn redelivered_question_is_not_asked_twice() {
    let h = Harness::new(ScriptedLedger::new());
    h.pipeline.handle_event(message("1", "bought electrodes $320")).await.unwrap();

    let outcome = h.pipeline.handle_event(message("1", "bought electrodes $320")).await.unwrap();

    assert_eq!(outcome, Outcome::AwaitingReply);
    assert_eq!(h.channel.texts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn chatter_is_ignored() {
    let h = Harness::new(ScriptedLedger::new());
    let outcome = h.pipeline.handle_event(message("1", "lunch anyone?")).await.unwrap();
    assert_eq!(outcome, Outcome::Ignored);
    assert!(h.channel.texts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn replays_commit_once_and_repeat_the_summary() {
    let h = Harness::new(ScriptedLedger::new());

    let first = h.pipeline.handle_event(message("1", GLOVES)).await.unwrap();
    let Outcome::Logged { receipt, summary } = first else {
        panic!("expected logged");
    };
    for _ in 0..5 {
        let replay = h.pipeline.handle_event(message("1", GLOVES)).await.unwrap();
        assert_eq!(
            replay,
            Outcome::AlreadyLogged {
                receipt: receipt.clone(),
                summary: Some(summary.clone()),
            }
        );
    }

    assert_eq!(h.rows().len(), 1);
    assert_eq!(h.ledger.attempts(), 1);
    assert_eq!(h.channel.count_prefixed("Logged:"), 1);
    assert_eq!(h.channel.count_prefixed("Already logged: gloves, 132.78 AUD"), 5);
}

#[tokio::test(start_paused = true)]
async fn unkeyed_resend_is_recognised() {
    let h = Harness::new(ScriptedLedger::new());
    assert!(matches!(
        h.pipeline.handle_event(unkeyed(0, GLOVES)).await.unwrap(),
        Outcome::Logged { .. }
    ));

    // Same fingerprint bucket
    assert!(matches!(
        h.pipeline.handle_event(unkeyed(30, GLOVES)).await.unwrap(),
        Outcome::AlreadyLogged { .. }
    ));

    // Next bucket: found in the ledger by content
    let outcome = h.pipeline.handle_event(unkeyed(90, GLOVES)).await.unwrap();
    let Outcome::AlreadyLogged { summary, .. } = outcome else {
        panic!("expected already logged, got {outcome:?}");
    };
    assert_eq!(summary.map(|s| s.item), Some("gloves".to_string()));
    assert_eq!(h.rows().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_to_one_commit() {
    let ledger = ScriptedLedger::failing_with([
        AppendError::transient("HTTP 503"),
        AppendError::transient("timeout"),
    ]);
    let h = Harness::new(ledger);

    let outcome = h.pipeline.handle_event(message("1", GLOVES)).await.unwrap();

    assert!(matches!(outcome, Outcome::Logged { .. }), "{outcome:?}");
    assert_eq!(h.ledger.attempts(), 3);
    assert_eq!(h.rows().len(), 1);
    assert_eq!(h.channel.texts().len(), 1);
    assert_eq!(h.channel.count_prefixed("Logged:"), 1);
    let record = h.store.get(&message("1", GLOVES).key(Duration::from_secs(120))).unwrap();
    assert_eq!(record.status, DedupeStatus::Committed);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_transient_failure() {
    let h = Harness::new(ScriptedLedger::always_failing(AppendError::transient("HTTP 429"), 3));

    let outcome = h.pipeline.handle_event(message("1", GLOVES)).await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Failed {
            class: "transient failure".into(),
            reason: "HTTP 429".into(),
        }
    );
    assert_eq!(h.ledger.attempts(), 3);
    assert!(h.rows().is_empty());
    let texts = h.channel.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("Not logged (transient failure): HTTP 429"));
    assert!(texts[0].contains(GLOVES));
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_is_not_retried_and_can_be_redelivered() {
    let h = Harness::new(ScriptedLedger::failing_with([AppendError::permanent("HTTP 400: bad row")]));
    let key = message("1", GLOVES).key(Duration::from_secs(120));

    let outcome = h.pipeline.handle_event(message("1", GLOVES)).await.unwrap();
    assert!(matches!(outcome, Outcome::Failed { ref class, .. } if class == "permanent failure"));
    assert_eq!(h.ledger.attempts(), 1);
    assert_eq!(h.store.status(&key), Some(DedupeStatus::Failed));
    assert_eq!(h.channel.count_prefixed("Logged"), 0);

    let outcome = h.pipeline.handle_event(message("1", GLOVES)).await.unwrap();
    assert!(matches!(outcome, Outcome::Logged { .. }));
    assert_eq!(h.store.get(&key).unwrap().attempts, 2);
    assert_eq!(h.rows().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn append_that_lands_after_the_timeout_is_logged_once() {
    // Row is written, then the acknowledgement outlives the 500ms timeout
    let h = Harness::new(ScriptedLedger::new().with_ack_delay(Duration::from_secs(2)));
    let key = message("1", GLOVES).key(Duration::from_secs(120));

    let outcome = h.pipeline.handle_event(message("1", GLOVES)).await.unwrap();

    let Outcome::Logged { receipt, .. } = outcome else {
        panic!("expected logged, got {outcome:?}");
    };
    assert_eq!(receipt.event_key(), Some(key.clone()));
    assert_eq!(h.ledger.attempts(), 1);
    assert_eq!(h.rows().len(), 1);
    assert_eq!(h.store.status(&key), Some(DedupeStatus::Committed));
    assert_eq!(h.channel.count_prefixed("Logged:"), 1);
    assert_eq!(h.channel.count_prefixed("Not logged"), 0);

    let again = h.pipeline.handle_event(message("1", GLOVES)).await.unwrap();
    assert!(matches!(again, Outcome::AlreadyLogged { .. }), "{again:?}");
    assert_eq!(h.rows().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_deliveries_append_once() {
    let h = Harness::new(ScriptedLedger::new().with_append_delay(Duration::from_millis(50)));

    let outcomes = join_all((0..8).map(|_| h.pipeline.handle_event(message("1", GLOVES)))).await;

    let logged = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(Outcome::Logged { .. })))
        .count();
    let already = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(Outcome::AlreadyLogged { .. })))
        .count();
    assert_eq!(logged, 1);
    assert_eq!(already, 7);
    assert_eq!(h.rows().len(), 1);
    assert_eq!(h.ledger.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn in_flight_duplicate_gives_up_after_bounded_wait() {
    let h = Harness::new(ScriptedLedger::new().with_append_delay(Duration::from_millis(400)));

    let (first, second) = tokio::join!(
        h.pipeline.handle_event(message("1", GLOVES)),
        h.pipeline.handle_event(message("1", GLOVES)),
    );

    assert!(matches!(first.unwrap(), Outcome::Logged { .. }));
    assert_eq!(second.unwrap(), Outcome::DuplicateInFlight);
    assert_eq!(h.rows().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn clarification_expires_silently() {
    let h = Harness::new(ScriptedLedger::new());
    h.pipeline.handle_event(message("1", "bought electrodes $320")).await.unwrap();

    tokio::time::advance(Duration::from_secs(15 * 60 + 1)).await;

    let outcome = h.pipeline.handle_event(message("2", "equipment DE")).await.unwrap();
    assert_eq!(outcome, Outcome::Ignored);
    assert_eq!(h.pipeline.expire_clarifications(), 1);
    assert_eq!(h.channel.texts().len(), 1);
    assert!(h.rows().is_empty());
}

#[tokio::test(start_paused = true)]
async fn channel_failure_does_not_change_outcome() {
    let ledger = Arc::new(ScriptedLedger::new());
    let channel = Arc::new(RecordingChannel::failing());
    let config = test_config();
    let port = LedgerPort::new(ledger.clone(), TABLE).with_retry(config.retry.clone());
    let pipeline = Orchestrator::new(
        config,
        Arc::new(DedupeStore::in_memory()),
        port,
        channel.clone(),
    )
    .unwrap();

    let outcome = pipeline.handle_event(message("1", GLOVES)).await.unwrap();

    assert!(matches!(outcome, Outcome::Logged { .. }));
    assert_eq!(channel.texts().len(), 1);
    assert_eq!(ledger.rows(TABLE).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn batch_keeps_each_author_in_order() {
    let h = Harness::new(ScriptedLedger::new());
    let events = vec![
        message_from("alice", "1", "bought electrodes $320"),
        message_from("bob", "2", GLOVES),
        message_from("alice", "3", "equipment DE"),
        message_from("bob", "2", GLOVES),
        message_from("carol", "4", "see you at lunch"),
    ];

    let results = h.pipeline.ingest_all(events, 4).await;

    let outcomes: Vec<Outcome> = results.into_iter().map(Result::unwrap).collect();
    assert!(matches!(outcomes[0], Outcome::ClarificationRequested(_)));
    assert!(matches!(outcomes[1], Outcome::Logged { .. }));
    assert!(matches!(outcomes[2], Outcome::Logged { .. }));
    assert!(matches!(outcomes[3], Outcome::AlreadyLogged { .. }));
    assert_eq!(outcomes[4], Outcome::Ignored);
    assert_eq!(h.rows().len(), 2);
}
