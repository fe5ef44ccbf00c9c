//! Submission flow for both forms.
//!
//! A form owns its record and a [`SubmissionStatus`]. Submitting runs the
//! guards first (cooldown, then validation), and only when both pass does the
//! status move to `Submitting` and the sinks get called, one after the other:
//!
//! ```text
//! Idle | Errored --submit--> Submitting --ok--> Succeeded --(5s | new_submission)--> Idle
//!                                       \--err-> Errored
//! ```
//!
//! A failed guard never reaches `Submitting`. Sink errors are logged and the
//! user only sees a generic message. If the submit future is dropped while
//! the sinks are awaited, the form goes back to `Idle`.
//!
//! When the primary write succeeds but the relay fails, the row stays in the
//! primary store while the submission is reported as failed. Nothing is
//! rolled back or retried; the partial write is logged as a warning.

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::rate_limit::{RateLimited, RateLimiter};
use crate::record::{ApplicationRecord, QuoteRecord};
use crate::sink::{PrimarySink, RelaySink, SinkError};
use crate::storage::KeyValueStore;
use crate::validation::{APPLICATION_SCHEMA, QuoteValidator, ValidationReport, Validator};

pub const QUOTE_TABLE: &str = "quote_requests";
pub const APPLICATION_TABLE: &str = "anketor_applications";

/// How long the quote form shows its success panel
pub const SUCCESS_DISPLAY_MS: i64 = 5_000;

pub const QUOTE_SUCCEEDED: &str =
    "Teklif talebiniz başarıyla alındı. En kısa sürede sizinle iletişime geçeceğiz.";
pub const QUOTE_FAILED: &str =
    "Form gönderilirken bir hata oluştu. Lütfen daha sonra tekrar deneyin.";
pub const APPLICATION_SUCCEEDED: &str =
    "Başvurunuz başarıyla gönderildi. En kısa sürede sizinle iletişime geçeceğiz.";
pub const APPLICATION_FAILED: &str =
    "Başvuru gönderilirken bir hata oluştu. Lütfen tekrar deneyin.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SubmissionStatus {
    Idle,
    Submitting,
    /// Accepted by every required sink at `at` (epoch millis)
    Succeeded { at: i64 },
    /// Idle again, showing why the last attempt did not go through
    Errored(String),
}

impl SubmissionStatus {
    /// Message of an `Errored` status
    pub fn error(&self) -> Option<&str> {
        match self {
            SubmissionStatus::Errored(message) => Some(message),
            _ => None,
        }
    }
}

/// Field values together with the submission status
#[derive(Debug, Clone)]
pub struct FormState<R> {
    record: R,
    status: SubmissionStatus,
}

impl<R: Default> FormState<R> {
    pub fn new() -> Self {
        Self::with_record(R::default())
    }

    pub fn with_record(record: R) -> Self {
        Self {
            record,
            status: SubmissionStatus::Idle,
        }
    }

    /// Current field values
    pub fn record(&self) -> &R {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut R {
        &mut self.record
    }

    pub fn status(&self) -> &SubmissionStatus {
        &self.status
    }

    fn set_status(&mut self, status: SubmissionStatus) {
        self.status = status;
    }

    fn reset_record(&mut self) {
        self.record = R::default();
    }
}

impl<R: Default> Default for FormState<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a form in `Submitting` while its sinks are awaited.
///
/// Dropped without [`InFlight::finish`], i.e. when the submit future was
/// cancelled, it puts the form back to `Idle`.
struct InFlight<'a, R: Default> {
    state: &'a mut FormState<R>,
    finished: bool,
}

impl<'a, R: Default> InFlight<'a, R> {
    fn start(state: &'a mut FormState<R>) -> Self {
        state.set_status(SubmissionStatus::Submitting);
        Self {
            state,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl<R: Default> Drop for InFlight<'_, R> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Submission cancelled while in flight");
            self.state.set_status(SubmissionStatus::Idle);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeStyle {
    /// Panel rendered inside the form
    Inline,
    /// Transient popup
    Toast,
}

/// Message shown to the user after a submit attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub style: NoticeStyle,
    pub message: String,
}

impl Notice {
    fn inline(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            style: NoticeStyle::Inline,
            message: message.into(),
        }
    }

    fn toast(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            style: NoticeStyle::Toast,
            message: message.into(),
        }
    }
}

/// Whether a failing relay fails the whole submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelayPolicy {
    #[default]
    Required,
    BestEffort,
}

impl FromStr for RelayPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(RelayPolicy::Required),
            "best-effort" | "best_effort" => Ok(RelayPolicy::BestEffort),
            other => Err(format!("unknown relay policy '{other}'")),
        }
    }
}

/// Outcome of writing to the primary sink
#[derive(Debug)]
pub enum PrimaryWriteResult {
    Written,
    Failed(SinkError),
}

impl PrimaryWriteResult {
    pub async fn attempt(sink: &dyn PrimarySink, table: &str, row: Value) -> Self {
        match sink.insert(table, vec![row]).await {
            Ok(()) => PrimaryWriteResult::Written,
            Err(e) => PrimaryWriteResult::Failed(e),
        }
    }
}

/// Outcome of forwarding to the relay
#[derive(Debug)]
pub enum RelayWriteResult {
    Relayed,
    /// Not attempted: the form has no relay or the primary write failed
    Skipped,
    Failed(SinkError),
}

impl RelayWriteResult {
    pub async fn attempt(sink: &dyn RelaySink, payload: Value) -> Self {
        match sink.relay(payload).await {
            Ok(()) => RelayWriteResult::Relayed,
            Err(e) => RelayWriteResult::Failed(e),
        }
    }
}

/// Both write results of one submission
#[derive(Debug)]
pub struct Delivery {
    pub primary: PrimaryWriteResult,
    pub relay: RelayWriteResult,
}

impl Delivery {
    /// Write `row` to the primary sink and, only if that worked and a relay
    /// is given, post `payload` to the relay.
    pub async fn run(
        primary: &dyn PrimarySink,
        table: &str,
        row: Value,
        relay: Option<(&dyn RelaySink, Value)>,
    ) -> Self {
        let primary = PrimaryWriteResult::attempt(primary, table, row).await;

        let relay = match (&primary, relay) {
            (PrimaryWriteResult::Written, Some((sink, payload))) => {
                RelayWriteResult::attempt(sink, payload).await
            }
            _ => RelayWriteResult::Skipped,
        };

        Self { primary, relay }
    }

    /// The error that decides the submission, if any.
    pub fn failure(&self, policy: RelayPolicy) -> Option<&SinkError> {
        match (&self.primary, &self.relay) {
            (PrimaryWriteResult::Failed(e), _) => Some(e),
            (PrimaryWriteResult::Written, RelayWriteResult::Failed(e)) => match policy {
                RelayPolicy::Required => Some(e),
                RelayPolicy::BestEffort => None,
            },
            (PrimaryWriteResult::Written, _) => None,
        }
    }

    /// Primary row stored but the relay did not receive it
    pub fn is_partial(&self) -> bool {
        matches!(
            (&self.primary, &self.relay),
            (PrimaryWriteResult::Written, RelayWriteResult::Failed(_))
        )
    }
}

/// What a call to `submit` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// Another submission from the same client is still in flight
    Busy,
    RateLimited(RateLimited),
    Invalid(ValidationReport),
    /// A sink failed; details were logged
    Failed,
}

/// Everything a form needs from the outside world
#[derive(Clone)]
pub struct Backends {
    pub primary: Arc<dyn PrimarySink>,
    pub relay: Arc<dyn RelaySink>,
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub relay_policy: RelayPolicy,
}

/// Quote request form
///
/// Cooldown-limited, validated as a batch, written to [`QUOTE_TABLE`] and then
/// relayed. Results are shown in an inline panel.
pub struct QuoteForm {
    state: FormState<QuoteRecord>,
    notice: Option<Notice>,
    validator: QuoteValidator,
    limiter: RateLimiter,
    backends: Backends,
}

impl QuoteForm {
    /// Create an empty quote form.
    ///
    /// # Arguments
    /// * `backends` - Sinks, cooldown store and clock used by [`QuoteForm::submit`]
    pub fn new(backends: Backends) -> Self {
        Self::with_record(backends, QuoteRecord::default())
    }

    /// Create a quote form already filled with `record`, e.g. from a request body.
    pub fn with_record(backends: Backends, record: QuoteRecord) -> Self {
        Self {
            state: FormState::with_record(record),
            notice: None,
            validator: QuoteValidator,
            limiter: RateLimiter::new(backends.store.clone()),
            backends,
        }
    }

    pub fn record(&self) -> &QuoteRecord {
        self.state.record()
    }

    /// Field values for editing. Toggle services with [`QuoteRecord::toggle_service`].
    pub fn record_mut(&mut self) -> &mut QuoteRecord {
        self.state.record_mut()
    }

    pub fn status(&self) -> &SubmissionStatus {
        self.state.status()
    }

    /// Inline panel to show, if any.
    ///
    /// # Returns
    /// The success panel after a submission, or the error panel after a
    /// refused or failed one
    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    fn fail_with(&mut self, message: String) {
        self.notice = Some(Notice::inline(NoticeKind::Error, message.clone()));
        self.state.set_status(SubmissionStatus::Errored(message));
    }

    /// Run the full submission pipeline for the current record.
    ///
    /// # Returns
    /// * `RateLimited` - inside the cooldown window, nothing was sent
    /// * `Invalid` - validation failed, nothing was sent
    /// * `Failed` - a sink failed; the record is kept for another try
    /// * `Submitted` - stored (and relayed); the record is cleared
    pub async fn submit(&mut self) -> SubmitOutcome {
        let now = self.backends.clock.now_millis();

        if let Err(limited) = self.limiter.check(now) {
            info!(retry_after_ms = limited.retry_after_ms, "Quote request rate limited");
            self.fail_with(limited.to_string());
            return SubmitOutcome::RateLimited(limited);
        }

        let report = self.validator.validate(self.state.record());
        if !report.valid {
            self.fail_with(report.joined());
            return SubmitOutcome::Invalid(report);
        }

        let row = self.state.record().to_row();
        let payload = self.state.record().to_relay_payload();
        self.notice = None;

        let in_flight = InFlight::start(&mut self.state);
        let delivery = Delivery::run(
            self.backends.primary.as_ref(),
            QUOTE_TABLE,
            row,
            Some((self.backends.relay.as_ref(), payload)),
        )
        .await;
        in_flight.finish();

        if delivery.is_partial() {
            warn!(
                table = QUOTE_TABLE,
                "Quote request stored but not relayed; the row was kept"
            );
        }

        if let Some(e) = delivery.failure(self.backends.relay_policy) {
            error!("Quote request submission failed: {e}");
            self.fail_with(QUOTE_FAILED.to_string());
            return SubmitOutcome::Failed;
        }

        info!("Quote request submitted");
        let succeeded_at = self.backends.clock.now_millis();
        self.state
            .set_status(SubmissionStatus::Succeeded { at: succeeded_at });
        self.state.reset_record();
        self.notice = Some(Notice::inline(NoticeKind::Success, QUOTE_SUCCEEDED));
        self.limiter.record(now);

        SubmitOutcome::Submitted
    }

    /// Hide the success panel once it has been shown for [`SUCCESS_DISPLAY_MS`].
    pub fn tick(&mut self) {
        if let SubmissionStatus::Succeeded { at } = *self.state.status() {
            if self.backends.clock.now_millis() - at >= SUCCESS_DISPLAY_MS {
                self.new_submission();
            }
        }
    }

    /// Leave the success panel and show an empty form again.
    pub fn new_submission(&mut self) {
        if matches!(self.state.status(), SubmissionStatus::Succeeded { .. }) {
            self.state.set_status(SubmissionStatus::Idle);
            self.notice = None;
        }
    }
}

/// Surveyor application form
///
/// Validated field by field, written to [`APPLICATION_TABLE`] only, results
/// shown as toasts. Stays in `Succeeded` until [`ApplicationForm::new_submission`].
pub struct ApplicationForm {
    state: FormState<ApplicationRecord>,
    notice: Option<Notice>,
    backends: Backends,
}

impl ApplicationForm {
    /// Create an empty application form. Only the primary sink and the clock are used.
    pub fn new(backends: Backends) -> Self {
        Self::with_record(backends, ApplicationRecord::default())
    }

    /// Create an application form already filled with `record`.
    pub fn with_record(backends: Backends, record: ApplicationRecord) -> Self {
        Self {
            state: FormState::with_record(record),
            notice: None,
            backends,
        }
    }

    pub fn record(&self) -> &ApplicationRecord {
        self.state.record()
    }

    pub fn record_mut(&mut self) -> &mut ApplicationRecord {
        self.state.record_mut()
    }

    pub fn status(&self) -> &SubmissionStatus {
        self.state.status()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// Validate the record and write it to the primary sink.
    ///
    /// Validation errors are returned for display under each field; they do
    /// not change the status or raise a toast.
    pub async fn submit(&mut self) -> SubmitOutcome {
        let report = APPLICATION_SCHEMA.validate(self.state.record());
        if !report.valid {
            return SubmitOutcome::Invalid(report);
        }

        let row = self.state.record().to_row();
        self.notice = None;

        let in_flight = InFlight::start(&mut self.state);
        let delivery = Delivery::run(
            self.backends.primary.as_ref(),
            APPLICATION_TABLE,
            row,
            None,
        )
        .await;
        in_flight.finish();

        if let Some(e) = delivery.failure(self.backends.relay_policy) {
            error!("Surveyor application submission failed: {e}");
            self.state
                .set_status(SubmissionStatus::Errored(APPLICATION_FAILED.to_string()));
            self.notice = Some(Notice::toast(NoticeKind::Error, APPLICATION_FAILED));
            return SubmitOutcome::Failed;
        }

        info!("Surveyor application submitted");
        let now = self.backends.clock.now_millis();
        self.state.set_status(SubmissionStatus::Succeeded { at: now });
        self.state.reset_record();
        self.notice = Some(Notice::toast(NoticeKind::Success, APPLICATION_SUCCEEDED));

        SubmitOutcome::Submitted
    }

    /// Return from the confirmation screen to an empty form.
    pub fn new_submission(&mut self) {
        if matches!(self.state.status(), SubmissionStatus::Succeeded { .. }) {
            self.state.set_status(SubmissionStatus::Idle);
            self.notice = None;
        }
    }
}
