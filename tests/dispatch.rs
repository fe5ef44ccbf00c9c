mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{Harness, T0, valid_application, valid_quote};
use leadform::dispatch::{
    APPLICATION_FAILED, APPLICATION_SUCCEEDED, APPLICATION_TABLE, QUOTE_FAILED, QUOTE_SUCCEEDED,
    QUOTE_TABLE, SUCCESS_DISPLAY_MS,
};
use leadform::{
    ApplicationForm, ApplicationRecord, NoticeKind, NoticeStyle, QuoteForm, QuoteRecord,
    RelayPolicy, SubmissionStatus, SubmitOutcome,
};
use serde_json::json;

#[tokio::test]
async fn quote_success_writes_both_sinks_and_resets() {
    let harness = Harness::new();
    let mut form = QuoteForm::with_record(harness.backends.clone(), valid_quote());

    let outcome = form.submit().await;

    assert_eq!(outcome, SubmitOutcome::Submitted);
    assert_eq!(form.status(), &SubmissionStatus::Succeeded { at: T0 });
    assert_eq!(form.record(), &QuoteRecord::default());
    assert_eq!(harness.calls(), vec![format!("primary:{QUOTE_TABLE}"), "relay".to_string()]);
    assert_eq!(harness.last_submit(), Some(T0.to_string()));

    let notice = form.notice().unwrap();
    assert_eq!(notice.kind, NoticeKind::Success);
    assert_eq!(notice.style, NoticeStyle::Inline);
    assert_eq!(notice.message, QUOTE_SUCCEEDED);
}

#[tokio::test]
async fn quote_rows_keep_ids_and_relay_gets_names() {
    let harness = Harness::new();
    let mut form = QuoteForm::with_record(harness.backends.clone(), valid_quote());
    form.submit().await;

    let rows = harness.primary.rows.lock().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, QUOTE_TABLE);
    assert_eq!(rows[0].1["services"], json!(["customer-satisfaction", "other"]));
    assert_eq!(rows[0].1["company"], "Örnek A.Ş.");

    let payloads = harness.relay.payloads.lock().unwrap();
    assert_eq!(
        payloads[0]["services"],
        "Belediye Memnuniyeti Araştırması, Diğer"
    );
    assert_eq!(payloads[0]["email"], "ayse@example.com");
}

#[tokio::test]
async fn relay_failure_after_primary_write_fails_the_submission() {
    let harness = Harness::with(false, 500, RelayPolicy::Required);
    let record = valid_quote();
    let mut form = QuoteForm::with_record(harness.backends.clone(), record.clone());

    let outcome = form.submit().await;

    assert_eq!(outcome, SubmitOutcome::Failed);
    assert_eq!(form.status(), &SubmissionStatus::Errored(QUOTE_FAILED.to_string()));
    assert_eq!(form.record(), &record);
    assert_eq!(harness.last_submit(), None);
    // the primary row is not rolled back
    assert_eq!(harness.primary.rows.lock().unwrap().len(), 1);

    let notice = form.notice().unwrap();
    assert_eq!(notice.kind, NoticeKind::Error);
    assert_eq!(notice.message, QUOTE_FAILED);
}

#[tokio::test]
async fn best_effort_relay_tolerates_relay_failure() {
    let harness = Harness::with(false, 503, RelayPolicy::BestEffort);
    let mut form = QuoteForm::with_record(harness.backends.clone(), valid_quote());

    assert_eq!(form.submit().await, SubmitOutcome::Submitted);
    assert_eq!(harness.last_submit(), Some(T0.to_string()));
}

#[tokio::test]
async fn primary_failure_skips_the_relay() {
    let harness = Harness::with(true, 200, RelayPolicy::Required);
    let mut form = QuoteForm::with_record(harness.backends.clone(), valid_quote());

    assert_eq!(form.submit().await, SubmitOutcome::Failed);
    assert_eq!(harness.calls(), vec![format!("primary:{QUOTE_TABLE}")]);
    assert_eq!(form.status().error(), Some(QUOTE_FAILED));
}

#[tokio::test]
async fn invalid_quote_makes_no_calls() {
    let harness = Harness::new();
    let mut form = QuoteForm::new(harness.backends.clone());
    form.record_mut().email = "ayse@example.com".into();

    let outcome = form.submit().await;

    let SubmitOutcome::Invalid(report) = outcome else {
        panic!("expected validation failure, got {outcome:?}");
    };
    assert_eq!(report.errors.len(), 4);
    assert!(harness.calls().is_empty());
    assert_eq!(form.status(), &SubmissionStatus::Errored(report.joined()));
}

#[tokio::test]
async fn cooldown_is_checked_before_validation() {
    let harness = Harness::new();
    let mut first = QuoteForm::with_record(harness.backends.clone(), valid_quote());
    assert_eq!(first.submit().await, SubmitOutcome::Submitted);

    harness.clock.advance(59_999);
    let mut second = QuoteForm::new(harness.backends.clone());
    let outcome = second.submit().await;

    assert!(matches!(outcome, SubmitOutcome::RateLimited(ref limited) if limited.retry_after_ms == 1));
    assert_eq!(
        second.status().error(),
        Some("Çok fazla deneme yaptınız. Lütfen bir dakika bekleyin.")
    );
    assert_eq!(harness.calls().len(), 2);

    harness.clock.advance(1);
    second.record_mut().clone_from(&valid_quote());
    assert_eq!(second.submit().await, SubmitOutcome::Submitted);
    assert_eq!(harness.last_submit(), Some((T0 + 60_000).to_string()));
}

#[tokio::test]
async fn failed_submission_can_be_retried_immediately() {
    let harness = Harness::with(true, 200, RelayPolicy::Required);
    let mut form = QuoteForm::with_record(harness.backends.clone(), valid_quote());

    assert_eq!(form.submit().await, SubmitOutcome::Failed);
    // still not rate limited: the failure never set the timestamp
    assert_eq!(form.submit().await, SubmitOutcome::Failed);
    assert_eq!(harness.calls().len(), 2);
}

#[tokio::test]
async fn success_panel_clears_after_five_seconds() {
    let harness = Harness::new();
    let mut form = QuoteForm::with_record(harness.backends.clone(), valid_quote());
    form.submit().await;

    harness.clock.advance(SUCCESS_DISPLAY_MS - 1);
    form.tick();
    assert!(matches!(form.status(), SubmissionStatus::Succeeded { .. }));

    harness.clock.advance(1);
    form.tick();
    assert_eq!(form.status(), &SubmissionStatus::Idle);
    assert!(form.notice().is_none());
}

#[tokio::test]
async fn success_panel_time_starts_when_the_sinks_answer() {
    let harness = Harness::new();
    harness.primary.takes_ms.store(SUCCESS_DISPLAY_MS, Ordering::SeqCst);
    let mut form = QuoteForm::with_record(harness.backends.clone(), valid_quote());

    assert_eq!(form.submit().await, SubmitOutcome::Submitted);
    assert_eq!(
        form.status(),
        &SubmissionStatus::Succeeded {
            at: T0 + SUCCESS_DISPLAY_MS
        }
    );
    // the cooldown still starts at the submit time
    assert_eq!(harness.last_submit(), Some(T0.to_string()));

    form.tick();
    assert!(matches!(form.status(), SubmissionStatus::Succeeded { .. }));

    harness.clock.advance(SUCCESS_DISPLAY_MS);
    form.tick();
    assert_eq!(form.status(), &SubmissionStatus::Idle);
}

#[tokio::test]
async fn cancelled_quote_submission_can_be_retried() {
    let harness = Harness::new();
    harness.primary.hang.store(true, Ordering::SeqCst);
    let mut form = QuoteForm::with_record(harness.backends.clone(), valid_quote());

    let cancelled = tokio::time::timeout(Duration::from_millis(50), form.submit()).await;
    assert!(cancelled.is_err());
    assert_eq!(form.status(), &SubmissionStatus::Idle);
    assert_eq!(form.record(), &valid_quote());
    assert_eq!(harness.last_submit(), None);

    harness.primary.hang.store(false, Ordering::SeqCst);
    assert_eq!(form.submit().await, SubmitOutcome::Submitted);
}

#[tokio::test]
async fn cancelled_application_submission_returns_to_idle() {
    let harness = Harness::new();
    harness.primary.hang.store(true, Ordering::SeqCst);
    let mut form = ApplicationForm::with_record(harness.backends.clone(), valid_application());

    let cancelled = tokio::time::timeout(Duration::from_millis(50), form.submit()).await;
    assert!(cancelled.is_err());
    assert_eq!(form.status(), &SubmissionStatus::Idle);

    harness.primary.hang.store(false, Ordering::SeqCst);
    assert_eq!(form.submit().await, SubmitOutcome::Submitted);
}

#[tokio::test]
async fn tick_leaves_errors_alone() {
    let harness = Harness::new();
    let mut form = QuoteForm::new(harness.backends.clone());
    form.submit().await;

    harness.clock.advance(SUCCESS_DISPLAY_MS * 2);
    form.tick();
    assert!(form.status().error().is_some());
}

#[tokio::test]
async fn quote_new_submission_leaves_success_early() {
    let harness = Harness::new();
    let mut form = QuoteForm::with_record(harness.backends.clone(), valid_quote());
    form.submit().await;

    form.new_submission();
    assert_eq!(form.status(), &SubmissionStatus::Idle);
}

#[tokio::test]
async fn services_toggle_through_the_form() {
    let harness = Harness::new();
    let mut form = QuoteForm::new(harness.backends.clone());

    form.record_mut().toggle_service("market-research");
    form.record_mut().toggle_service("brand-research");
    form.record_mut().toggle_service("market-research");

    assert_eq!(form.record().services, vec!["brand-research"]);
}

#[tokio::test]
async fn application_success_shows_toast_and_resets() {
    let harness = Harness::new();
    let mut form = ApplicationForm::with_record(harness.backends.clone(), valid_application());

    assert_eq!(form.submit().await, SubmitOutcome::Submitted);
    assert_eq!(form.record(), &ApplicationRecord::default());
    assert_eq!(harness.calls(), vec![format!("primary:{APPLICATION_TABLE}")]);
    // the application form has no cooldown
    assert_eq!(harness.last_submit(), None);

    let notice = form.notice().unwrap();
    assert_eq!(notice.style, NoticeStyle::Toast);
    assert_eq!(notice.message, APPLICATION_SUCCEEDED);

    let rows = harness.primary.rows.lock().unwrap();
    assert_eq!(rows[0].1["full_name"], "Mehmet Demir");
    assert_eq!(rows[0].1["district"], "Çankaya");
}

#[tokio::test]
async fn application_stays_succeeded_until_new_submission() {
    let harness = Harness::new();
    let mut form = ApplicationForm::with_record(harness.backends.clone(), valid_application());
    form.submit().await;

    harness.clock.advance(60_000);
    assert!(matches!(form.status(), SubmissionStatus::Succeeded { .. }));

    form.new_submission();
    assert_eq!(form.status(), &SubmissionStatus::Idle);
    assert!(form.notice().is_none());
}

#[tokio::test]
async fn invalid_application_keeps_status_and_raises_no_toast() {
    let harness = Harness::new();
    let mut form = ApplicationForm::with_record(
        harness.backends.clone(),
        ApplicationRecord {
            agreement: false,
            ..valid_application()
        },
    );

    let outcome = form.submit().await;

    let SubmitOutcome::Invalid(report) = outcome else {
        panic!("expected validation failure, got {outcome:?}");
    };
    assert_eq!(report.errors.len(), 1);
    assert_eq!(form.status(), &SubmissionStatus::Idle);
    assert!(form.notice().is_none());
    assert!(harness.calls().is_empty());
}

#[tokio::test]
async fn application_sink_failure_shows_generic_toast() {
    let harness = Harness::with(true, 200, RelayPolicy::Required);
    let record = valid_application();
    let mut form = ApplicationForm::with_record(harness.backends.clone(), record.clone());

    assert_eq!(form.submit().await, SubmitOutcome::Failed);
    assert_eq!(form.record(), &record);
    assert_eq!(form.status().error(), Some(APPLICATION_FAILED));

    let notice = form.notice().unwrap();
    assert_eq!(notice.kind, NoticeKind::Error);
    assert_eq!(notice.style, NoticeStyle::Toast);
    assert!(!notice.message.contains("duplicate"));
}
