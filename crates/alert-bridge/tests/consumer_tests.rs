//! Integration tests for batch consumption.

mod common;

use std::time::Duration;

use alert_bridge::compose::ProjectIndex;
use alert_bridge::consumer::Stage;
use alert_bridge::events::Source;
use alert_bridge::queue::{BatchEvent, QueueRecord};
use serde_json::json;

use common::{
    fixture, harness, sentry_body, sentry_record, sprint_index, FakeLinks, FakeTracker,
};

#[tokio::test]
async fn test_batch_reports_only_failed_message() {
    let h = harness(
        FakeLinks::default(),
        FakeLinks::default(),
        FakeTracker::failing(&["alert-3"]),
        sprint_index(),
    );

    let records: Vec<QueueRecord> = (1..=5)
        .map(|i| {
            sentry_record(
                &format!("msg-{i}"),
                sentry_body(&i.to_string(), &format!("alert-{i}"), "error", "log-router"),
            )
        })
        .collect();

    let response = h.consumer.handle_batch(BatchEvent { records }).await;

    let failed: Vec<&str> = response.failed_ids().collect();
    assert_eq!(failed, vec!["msg-3"]);
    assert_eq!(h.tracker.created().len(), 4);
    assert_eq!(h.sentry.writes.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_empty_batch() {
    let h = harness(
        FakeLinks::default(),
        FakeLinks::default(),
        FakeTracker::default(),
        sprint_index(),
    );
    let response = h.consumer.handle_batch(BatchEvent::default()).await;
    assert!(response.batch_item_failures.is_empty());
}

#[tokio::test]
async fn test_production_high_without_sprint_files_to_default_project() {
    let h = harness(
        FakeLinks::default(),
        FakeLinks::default(),
        FakeTracker::default(),
        ProjectIndex::new(),
    );

    let record = sentry_record("m-1", sentry_body("9", "boom", "error", "log-router"));
    h.consumer.process(&record).await.unwrap();

    let created = h.tracker.created();
    assert_eq!(created[0].projects, vec!["p-default"]);
    assert!(created[0]
        .notes
        .contains("Degraded: No current sprint project resolved for Ingestion"));
}

#[tokio::test]
async fn test_production_warning_files_to_backlog() {
    let h = harness(
        FakeLinks::default(),
        FakeLinks::default(),
        FakeTracker::default(),
        sprint_index(),
    );
    let record = sentry_record("m-1", sentry_body("9", "boom", "warning", "log-router"));
    h.consumer.process(&record).await.unwrap();

    let created = h.tracker.created();
    assert_eq!(created[0].projects, vec!["p-ing-backlog"]);
    assert_eq!(created[0].custom_fields["f-priority"], json!("o-medium"));
}

#[tokio::test]
async fn test_root_link_carried_from_previous_task() {
    let h = harness(
        FakeLinks::with_link("7", "https://app.asana.com/0/0/100"),
        FakeLinks::default(),
        FakeTracker::default(),
        sprint_index(),
    );
    h.tracker.notes.lock().unwrap().insert(
        "100".into(),
        "Previous Task: https://app.asana.com/0/0/60\n\nRoot Task: https://app.asana.com/0/0/50\n\nSource URL: x".into(),
    );

    let record = sentry_record("m-1", sentry_body("7", "again", "error", "log-router"));
    let filed = h.consumer.process(&record).await.unwrap();

    assert_eq!(filed.chain.previous.as_deref(), Some("https://app.asana.com/0/0/100"));
    assert_eq!(filed.chain.root.as_deref(), Some("https://app.asana.com/0/0/50"));

    let notes = &h.tracker.created()[0].notes;
    assert!(notes.starts_with(
        "Previous Task: https://app.asana.com/0/0/100\n\nRoot Task: https://app.asana.com/0/0/50\n\n"
    ));
}

#[tokio::test]
async fn test_previous_task_becomes_root_without_marker() {
    let h = harness(
        FakeLinks::with_link("7", "https://app.asana.com/0/0/100"),
        FakeLinks::default(),
        FakeTracker::default(),
        sprint_index(),
    );
    h.tracker
        .notes
        .lock()
        .unwrap()
        .insert("100".into(), "Source URL: x".into());

    let record = sentry_record("m-1", sentry_body("7", "again", "error", "log-router"));
    let filed = h.consumer.process(&record).await.unwrap();
    assert_eq!(filed.chain.root.as_deref(), Some("https://app.asana.com/0/0/100"));

    // A deleted previous task also becomes the root
    let h = harness(
        FakeLinks::with_link("7", "https://app.asana.com/0/0/404"),
        FakeLinks::default(),
        FakeTracker::default(),
        sprint_index(),
    );
    let filed = h.consumer.process(&record).await.unwrap();
    assert_eq!(filed.chain.root.as_deref(), Some("https://app.asana.com/0/0/404"));
}

#[tokio::test]
async fn test_chain_survives_repeated_filing() {
    let h = harness(
        FakeLinks::default(),
        FakeLinks::default(),
        FakeTracker::default(),
        sprint_index(),
    );
    let record = sentry_record("m-1", sentry_body("7", "again", "error", "log-router"));

    let first = h.consumer.process(&record).await.unwrap();
    assert_eq!(first.chain.root, None);
    let second = h.consumer.process(&record).await.unwrap();
    let third = h.consumer.process(&record).await.unwrap();

    assert_eq!(second.chain.root, Some(first.task.link()));
    assert_eq!(third.chain.root, Some(first.task.link()));
    assert_eq!(third.chain.previous, Some(second.task.link()));
}

#[tokio::test]
async fn test_enum_rejection_retries_with_reduced_fields() {
    let h = harness(
        FakeLinks::default(),
        FakeLinks::default(),
        FakeTracker::rejecting_team_field(),
        sprint_index(),
    );

    let record = sentry_record("m-1", sentry_body("1", "boom", "error", "log-router"));
    h.consumer.process(&record).await.unwrap();

    let created = h.tracker.created();
    assert_eq!(created.len(), 1);
    assert!(!created[0].custom_fields.contains_key("f-team"));
    assert!(created[0].custom_fields.contains_key("f-priority"));
    assert!(created[0].notes.contains("Degraded: team-specific fields were dropped"));
}

#[tokio::test]
async fn test_link_write_failure_keeps_task() {
    let links = FakeLinks {
        fail_write: true,
        ..FakeLinks::default()
    };
    let h = harness(links, FakeLinks::default(), FakeTracker::default(), sprint_index());

    let record = sentry_record("m-1", sentry_body("1", "boom", "error", "log-router"));
    let err = h.consumer.process(&record).await.unwrap_err();
    assert_eq!(err.stage, Stage::LinkWrite);
    assert_eq!(h.tracker.created().len(), 1);

    let response = h
        .consumer
        .handle_batch(BatchEvent {
            records: vec![record],
        })
        .await;
    assert_eq!(response.failed_ids().collect::<Vec<_>>(), vec!["m-1"]);
}

#[tokio::test]
async fn test_stage_tagging() {
    let lookup_fails = FakeLinks {
        fail_find: true,
        ..FakeLinks::default()
    };
    let h = harness(lookup_fails, FakeLinks::default(), FakeTracker::default(), sprint_index());
    let record = sentry_record("m-1", sentry_body("1", "boom", "error", "log-router"));
    assert_eq!(
        h.consumer.process(&record).await.unwrap_err().stage,
        Stage::LinkLookup
    );

    let h = harness(
        FakeLinks::default(),
        FakeLinks::default(),
        FakeTracker::failing(&["boom"]),
        sprint_index(),
    );
    assert_eq!(
        h.consumer.process(&record).await.unwrap_err().stage,
        Stage::TaskCreate
    );
}

#[tokio::test]
async fn test_invalid_messages_fail_at_received() {
    let h = harness(
        FakeLinks::default(),
        FakeLinks::default(),
        FakeTracker::default(),
        sprint_index(),
    );

    let not_json = sentry_record("a", "not json".into());
    let no_issue = sentry_record("b", json!({"data": {"event": {"title": "x"}}}).to_string());
    let no_source: QueueRecord =
        serde_json::from_value(json!({"messageId": "c", "body": "{}"})).unwrap();

    for record in [&not_json, &no_issue, &no_source] {
        let err = h.consumer.process(record).await.unwrap_err();
        assert_eq!(err.stage, Stage::Received);
    }

    let response = h
        .consumer
        .handle_batch(BatchEvent {
            records: vec![not_json, no_issue, no_source],
        })
        .await;
    assert_eq!(response.batch_item_failures.len(), 3);
    assert!(h.tracker.created().is_empty());
}

#[tokio::test]
async fn test_datadog_message_uses_datadog_links() {
    let h = harness(
        FakeLinks::default(),
        FakeLinks::default(),
        FakeTracker::default(),
        sprint_index(),
    );

    let record = QueueRecord::new("dd-1", fixture("datadog_event.json"), Source::Datadog);
    let filed = h.consumer.process(&record).await.unwrap();

    assert_eq!(filed.team, "Detections");
    assert!(h.sentry.writes.lock().unwrap().is_empty());
    assert_eq!(
        h.datadog.writes.lock().unwrap().as_slice(),
        &[("81234567".to_string(), filed.task.gid.clone())]
    );

    // P3 in production goes to the backlog
    let created = h.tracker.created();
    assert_eq!(created[0].projects, vec!["p-det-backlog"]);
    assert!(created[0].notes.contains("Incident History: "));
    assert!(created[0].notes.contains("Customer Impacted: Globex"));
}

#[tokio::test]
async fn test_sentry_fixture_routes_by_service() {
    let h = harness(
        FakeLinks::default(),
        FakeLinks::default(),
        FakeTracker::default(),
        sprint_index(),
    );
    let record = sentry_record("s-1", fixture("sentry_event.json"));
    let filed = h.consumer.process(&record).await.unwrap();

    assert_eq!(filed.team, "Ingestion");
    let created = h.tracker.created();
    assert_eq!(created[0].projects, vec!["p-ing-sprint"]);
    assert_eq!(created[0].custom_fields["f-team"], json!("t-ing"));
    assert!(created[0]
        .notes
        .contains("Log Search Link: https://app.datadoghq.com/logs?query=service%3Apanther-log-router"));
    assert!(created[0].notes.ends_with(
        "Routing: assigned to Ingestion by matcher [service:log-router] (precedence 2, 1 of 1 tags matched, 1 candidate)"
    ));
}

#[tokio::test]
async fn test_slow_message_does_not_block_batch() {
    let h = harness(
        FakeLinks::default(),
        FakeLinks::default(),
        FakeTracker::holding("slow", &["slow"]),
        sprint_index(),
    );

    let records = vec![
        sentry_record("msg-1", sentry_body("1", "alert-1", "error", "log-router")),
        sentry_record("msg-slow", sentry_body("2", "slow", "error", "log-router")),
        sentry_record("msg-3", sentry_body("3", "alert-3", "error", "log-router")),
    ];
    let consumer = h.consumer.clone();
    let batch = tokio::spawn(async move { consumer.handle_batch(BatchEvent { records }).await });

    // Both fast messages complete while the slow one is still held
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.tracker.created().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("fast messages were blocked by the slow one");
    assert!(!batch.is_finished());

    h.tracker.release();
    let response = batch.await.unwrap();
    assert_eq!(response.failed_ids().collect::<Vec<_>>(), vec!["msg-slow"]);
    assert_eq!(h.sentry.writes.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_panicking_message_is_reported_failed() {
    let h = harness(
        FakeLinks::default(),
        FakeLinks::default(),
        FakeTracker::panicking(&["alert-2"]),
        sprint_index(),
    );

    let records: Vec<QueueRecord> = (1..=3)
        .map(|i| {
            sentry_record(
                &format!("msg-{i}"),
                sentry_body(&i.to_string(), &format!("alert-{i}"), "error", "log-router"),
            )
        })
        .collect();

    let response = h.consumer.handle_batch(BatchEvent { records }).await;
    assert_eq!(response.failed_ids().collect::<Vec<_>>(), vec!["msg-2"]);
    assert_eq!(h.tracker.created().len(), 2);
}
