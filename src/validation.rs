//! Form validation.
//!
//! Both forms go through the [`Validator`] trait and produce a
//! [`ValidationReport`]. The quote form checks imperatively and reports a
//! batch of messages; the application form is described as a list of
//! per-field rules and reports at most one message per field.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::record::{ApplicationRecord, QuoteRecord};

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();

    /// Markup and URI fragments refused in free-text messages.
    /// Case folding and `\w` are ASCII-only, so `ſ` or `ü` never complete a match.
    static ref UNSAFE_CONTENT: [Regex; 4] = [
        Regex::new(r"(?i-u)<script").unwrap(),
        Regex::new(r"(?i-u)javascript:").unwrap(),
        Regex::new(r"(?i-u)on\w+=").unwrap(),
        Regex::new(r"(?i-u)data:").unwrap(),
    ];
}

pub const INVALID_EMAIL: &str = "Geçerli bir e-posta adresi giriniz";
pub const UNSAFE_MESSAGE: &str = "Mesajınızda geçersiz karakterler bulunmaktadır";

/// Check the `local@domain.tld` shape used by both forms.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

/// Whether free text contains any of the refused markup or URI fragments.
pub fn contains_unsafe_content(text: &str) -> bool {
    UNSAFE_CONTENT.iter().any(|pattern| pattern.is_match(text))
}

/// A single failed check, attached to the field it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Result of validating a record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// Failures in evaluation order
    pub errors: Vec<FieldError>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<FieldError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Messages in evaluation order, as shown in a batch error panel.
    pub fn messages(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.message.as_str()).collect()
    }

    /// Message shown under `field`, if any.
    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    /// All messages joined by newlines, one per line.
    pub fn joined(&self) -> String {
        self.messages().join("\n")
    }
}

/// Validates records of type `R`. Implementations hold no mutable state.
pub trait Validator<R> {
    fn validate(&self, record: &R) -> ValidationReport;
}

/// Quote request validation. Every check runs, in a fixed order.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuoteValidator;

impl Validator<QuoteRecord> for QuoteValidator {
    fn validate(&self, record: &QuoteRecord) -> ValidationReport {
        let mut errors = Vec::new();
        let mut fail = |field: &'static str, message: &str| {
            errors.push(FieldError {
                field,
                message: message.to_string(),
            })
        };

        if !is_valid_email(&record.email) {
            fail("email", INVALID_EMAIL);
        }
        if contains_unsafe_content(&record.message) {
            fail("message", UNSAFE_MESSAGE);
        }

        let required = [
            ("name", &record.name, "Ad Soyad alanı zorunludur"),
            ("phone", &record.phone, "Telefon numarası alanı zorunludur"),
            ("subject", &record.subject, "Konu alanı zorunludur"),
            ("message", &record.message, "Mesaj alanı zorunludur"),
        ];
        for (field, value, message) in required {
            if value.trim().is_empty() {
                fail(field, message);
            }
        }

        ValidationReport::from_errors(errors)
    }
}

/// A check on one value of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Text must not be empty
    Required,
    /// Non-empty text must look like an email address
    Email,
    /// Checkbox must be ticked
    Accepted,
}

/// Value extracted from a record for checking
pub enum FieldValue<'a> {
    Text(&'a str),
    Flag(bool),
}

impl Check {
    fn passes(self, value: &FieldValue<'_>) -> bool {
        match (self, value) {
            (Check::Required, FieldValue::Text(text)) => !text.is_empty(),
            (Check::Email, FieldValue::Text(text)) => text.is_empty() || is_valid_email(text),
            (Check::Accepted, FieldValue::Flag(flag)) => *flag,
            (Check::Required | Check::Email, FieldValue::Flag(_)) => true,
            (Check::Accepted, FieldValue::Text(_)) => false,
        }
    }
}

/// Rules for one field, tried in order. The first failing rule reports.
pub struct FieldRule<R> {
    pub field: &'static str,
    pub value: fn(&R) -> FieldValue<'_>,
    pub checks: &'static [(Check, &'static str)],
}

/// Declarative rule list over a record type.
pub struct Schema<R: 'static> {
    rules: &'static [FieldRule<R>],
}

impl<R: 'static> Schema<R> {
    pub const fn new(rules: &'static [FieldRule<R>]) -> Self {
        Self { rules }
    }
}

impl<R: 'static> Validator<R> for Schema<R> {
    fn validate(&self, record: &R) -> ValidationReport {
        let errors = self
            .rules
            .iter()
            .filter_map(|rule| {
                let value = (rule.value)(record);
                rule.checks
                    .iter()
                    .find(|(check, _)| !check.passes(&value))
                    .map(|(_, message)| FieldError {
                        field: rule.field,
                        message: message.to_string(),
                    })
            })
            .collect();

        ValidationReport::from_errors(errors)
    }
}

macro_rules! text_rule {
    ($field:literal, $member:ident, $($check:expr => $message:literal),+) => {
        FieldRule {
            field: $field,
            value: {
                fn value(record: &ApplicationRecord) -> FieldValue<'_> {
                    FieldValue::Text(&record.$member)
                }
                value
            },
            checks: &[$(($check, $message)),+],
        }
    };
}

const APPLICATION_RULES: &[FieldRule<ApplicationRecord>] = &[
    text_rule!("fullName", full_name, Check::Required => "Ad Soyad zorunludur"),
    text_rule!("email", email,
        Check::Required => "E-posta zorunludur",
        Check::Email => "Geçerli bir e-posta adresi giriniz"),
    text_rule!("phone", phone, Check::Required => "Telefon numarası zorunludur"),
    text_rule!("city", city, Check::Required => "Şehir zorunludur"),
    text_rule!("district", district, Check::Required => "İlçe zorunludur"),
    text_rule!("education", education, Check::Required => "Eğitim durumu zorunludur"),
    text_rule!("experience", experience, Check::Required => "Deneyim zorunludur"),
    text_rule!("availability", availability, Check::Required => "Uygunluk durumu zorunludur"),
    text_rule!("about", about, Check::Required => "Kendiniz hakkında bilgi zorunludur"),
    FieldRule {
        field: "agreement",
        value: |record| FieldValue::Flag(record.agreement),
        checks: &[(Check::Accepted, "Gizlilik politikasını kabul etmelisiniz")],
    },
];

/// Schema for the surveyor application form
pub const APPLICATION_SCHEMA: Schema<ApplicationRecord> = Schema::new(APPLICATION_RULES);
