#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};

const RANDOM_ID_LEN: usize = 16;

/// Source of fresh, URL-safe job id stems.
pub trait JobIdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// 16 lowercase hex characters from a v4 UUID.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomJobIds;

impl JobIdGenerator for RandomJobIds {
    fn next_id(&self) -> String {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(RANDOM_ID_LEN);
        id
    }
}

/// `<prefix>1`, `<prefix>2`, ...
#[derive(Debug)]
pub struct SequentialJobIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialJobIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl JobIdGenerator for SequentialJobIds {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{}{n}", self.prefix)
    }
}
