use chrono::{SecondsFormat, Utc};
use image::DynamicImage;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// One completed synthesis: the image plus the prompt that produced it.
/// Immutable once created.
#[derive(Clone)]
pub struct GenerationRecord {
    pub image: DynamicImage,
    pub prompt_used: String,
    pub model: String,
    pub created_at: String,
}

impl GenerationRecord {
    pub fn new(image: DynamicImage, prompt_used: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            image,
            prompt_used: prompt_used.into(),
            model: model.into(),
            created_at: now_utc_iso(),
        }
    }
}

/// Bounded, most-recent-first record of generation results. Session-local,
/// never persisted across process restarts.
pub struct HistoryLedger {
    capacity: usize,
    entries: Vec<GenerationRecord>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, record: GenerationRecord) {
        self.entries.insert(0, record);
        self.entries.truncate(self.capacity);
    }

    pub fn list(&self) -> &[GenerationRecord] {
        &self.entries
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HistoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
