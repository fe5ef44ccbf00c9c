#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use leadform::{
    Backends, KeyValueStore, ManualClock, MemoryStore, PrimarySink, QuoteRecord, RelayPolicy,
    RelaySink, SinkError, ApplicationRecord,
};
use serde_json::Value;

pub const T0: i64 = 1_700_000_000_000;

/// Ordered log of every sink call, shared by the fakes of one test
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub struct FakePrimary {
    pub log: CallLog,
    pub rows: Mutex<Vec<(String, Value)>>,
    pub fail: bool,
    pub clock: Arc<ManualClock>,
    /// Moved forward on the clock by every insert
    pub takes_ms: AtomicI64,
    /// Real time every insert sleeps for
    pub delay_ms: AtomicU64,
    /// Never complete an insert
    pub hang: AtomicBool,
}

#[async_trait]
impl PrimarySink for FakePrimary {
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), SinkError> {
        self.log.lock().unwrap().push(format!("primary:{table}"));
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.clock.advance(self.takes_ms.load(Ordering::SeqCst));
        if self.fail {
            return Err(SinkError::Rejected {
                status: 409,
                body: "duplicate key value".into(),
            });
        }
        let mut stored = self.rows.lock().unwrap();
        for row in rows {
            stored.push((table.to_string(), row));
        }
        Ok(())
    }
}

pub struct FakeRelay {
    pub log: CallLog,
    pub payloads: Mutex<Vec<Value>>,
    pub status: u16,
}

#[async_trait]
impl RelaySink for FakeRelay {
    async fn relay(&self, payload: Value) -> Result<(), SinkError> {
        self.log.lock().unwrap().push("relay".into());
        if !(200..300).contains(&self.status) {
            return Err(SinkError::Rejected {
                status: self.status,
                body: String::new(),
            });
        }
        self.payloads.lock().unwrap().push(payload);
        Ok(())
    }
}

/// Fakes and the backends wired to them
pub struct Harness {
    pub log: CallLog,
    pub primary: Arc<FakePrimary>,
    pub relay: Arc<FakeRelay>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub backends: Backends,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(false, 200, RelayPolicy::Required)
    }

    pub fn with(primary_fails: bool, relay_status: u16, relay_policy: RelayPolicy) -> Self {
        let log: CallLog = Arc::default();
        let clock = Arc::new(ManualClock::new(T0));
        let primary = Arc::new(FakePrimary {
            log: log.clone(),
            rows: Mutex::new(Vec::new()),
            fail: primary_fails,
            clock: clock.clone(),
            takes_ms: AtomicI64::new(0),
            delay_ms: AtomicU64::new(0),
            hang: AtomicBool::new(false),
        });
        let relay = Arc::new(FakeRelay {
            log: log.clone(),
            payloads: Mutex::new(Vec::new()),
            status: relay_status,
        });
        let store = Arc::new(MemoryStore::new());

        let backends = Backends {
            primary: primary.clone(),
            relay: relay.clone(),
            store: store.clone(),
            clock: clock.clone(),
            relay_policy,
        };

        Self {
            log,
            primary,
            relay,
            store,
            clock,
            backends,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn last_submit(&self) -> Option<String> {
        self.store.get("lastFormSubmit").unwrap()
    }
}

pub fn valid_quote() -> QuoteRecord {
    QuoteRecord {
        name: "Ayşe Yılmaz".into(),
        email: "ayse@example.com".into(),
        phone: "+90 555 000 00 00".into(),
        company: "Örnek A.Ş.".into(),
        subject: "Memnuniyet anketi".into(),
        message: "Belediyemiz için bir memnuniyet araştırması planlıyoruz.".into(),
        services: vec!["customer-satisfaction".into(), "other".into()],
    }
}

pub fn valid_application() -> ApplicationRecord {
    ApplicationRecord {
        full_name: "Mehmet Demir".into(),
        email: "mehmet@example.com".into(),
        phone: "05550000000".into(),
        city: "Ankara".into(),
        district: "Çankaya".into(),
        education: "lisans".into(),
        experience: "1-3-yil".into(),
        availability: "hafta-sonu".into(),
        about: "Saha araştırmalarında iki yıl deneyimim var.".into(),
        agreement: true,
    }
}
