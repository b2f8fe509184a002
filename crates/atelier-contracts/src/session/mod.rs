mod history;
mod references;

pub use history::{GenerationRecord, HistoryLedger, DEFAULT_HISTORY_CAPACITY};
pub use references::{merge_overlay, ReferenceImage, ReferenceLibrary};

/// Fallback access password, applied only when no configured value is set.
pub const DEFAULT_ACCESS_PASSWORD: &str = "amigo2026";

/// Mutable state owned by exactly one interactive session. Nothing here is
/// shared across sessions and nothing survives the process.
pub struct SessionState {
    pub references: ReferenceLibrary,
    pub history: HistoryLedger,
    unlocked: bool,
}

impl SessionState {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            references: ReferenceLibrary::new(),
            history: HistoryLedger::with_capacity(history_capacity),
            unlocked: false,
        }
    }

    pub fn unlock(&mut self, candidate: &str, expected: &str) -> bool {
        if candidate == expected {
            self.unlocked = true;
        }
        self.unlocked
    }

    pub fn lock(&mut self) {
        self.unlocked = false;
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionState, DEFAULT_HISTORY_CAPACITY};

    #[test]
    fn session_starts_locked() {
        let session = SessionState::new(DEFAULT_HISTORY_CAPACITY);
        assert!(!session.is_unlocked());
    }

    #[test]
    fn unlock_requires_exact_match() {
        let mut session = SessionState::new(DEFAULT_HISTORY_CAPACITY);
        assert!(!session.unlock("wrong", "secret"));
        assert!(!session.is_unlocked());
        assert!(session.unlock("secret", "secret"));
        assert!(session.is_unlocked());
    }

    #[test]
    fn failed_unlock_does_not_relock_session() {
        let mut session = SessionState::new(DEFAULT_HISTORY_CAPACITY);
        assert!(session.unlock("secret", "secret"));
        assert!(session.unlock("wrong", "secret"));
        assert!(session.is_unlocked());
    }
}
