/*!
# Lead Form Intake

Server-side handling of the two public forms of a market research agency's
website, built in Rust.

## Overview

Visitors fill in either a quote request ("Teklif Alın") or a surveyor
application ("Anketör Başvuru Formu"). Each submission is checked, stored in
a hosted table store and, for quote requests, forwarded to a form relay that
emails the team.

## Architecture

Every submission goes through the same linear pipeline:

1. **Rate Limiter** - one "last successful submit" timestamp per client,
   refusing quote requests for 60 seconds after a success
2. **Validator** - field checks producing ordered, localized messages
3. **Submission Dispatcher** - primary write, then relay write, then the
   status transition and the notice shown to the user

### Forms
- **Quote request**: email shape, unsafe-content scan of the message,
  required name/phone/subject/message, batch error panel, relay forwarding
- **Surveyor application**: declarative per-field rules, inline errors,
  success/error toasts, no relay

### Backends
- `PrimarySink` - hosted table inserts (`quote_requests`, `anketor_applications`)
- `RelaySink` - JSON form relay
- `KeyValueStore` - memory, JSON file, or per-client scoped view
- `Clock` - system or manual time

## Modules

- **record**: form records, service and option catalogs, row/payload mapping
- **validation**: `Validator` trait, quote validator, application schema
- **storage**: key-value stores
- **rate_limit**: cooldown window over a key-value store
- **sink**: primary and relay sinks, HTTP implementations
- **dispatch**: form state, submission state machine, notices
- **clock**: time sources
- **config**: environment configuration (web)
- **app**: HTTP routes and server (web)

## REST API Endpoints

- `GET /api/services` - quote service catalog
- `GET /api/options` - application select options
- `POST /api/quote` - submit a quote request
- `POST /api/applications` - submit a surveyor application
*/

pub mod clock;
pub mod dispatch;
pub mod rate_limit;
pub mod record;
pub mod sink;
pub mod storage;
pub mod validation;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod config;
#[cfg(feature = "web")]
pub mod error;

/// Re-export the core types to make them easier to use
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{
    ApplicationForm, Backends, Notice, NoticeKind, NoticeStyle, QuoteForm, RelayPolicy,
    SubmissionStatus, SubmitOutcome,
};
pub use rate_limit::{RateLimited, RateLimiter};
pub use record::{ApplicationRecord, QuoteRecord};
pub use sink::{PrimarySink, RelaySink, SinkError};
pub use storage::{FileStore, KeyValueStore, MemoryStore, ScopedStore, StoreError};
pub use validation::{APPLICATION_SCHEMA, QuoteValidator, ValidationReport, Validator};
