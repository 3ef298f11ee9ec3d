#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub trait Clock: Send + Sync {
    fn now_unix_sec(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_sec(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn at(unix_sec: i64) -> Self {
        Self {
            now: AtomicI64::new(unix_sec),
        }
    }

    pub fn set(&self, unix_sec: i64) {
        self.now.store(unix_sec, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix_sec(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// RFC 3339 rendering for log lines; falls back to the raw number.
pub fn format_unix(unix_sec: i64) -> String {
    OffsetDateTime::from_unix_timestamp(unix_sec)
        .ok()
        .and_then(|ts| ts.format(&Rfc3339).ok())
        .unwrap_or_else(|| unix_sec.to_string())
}
