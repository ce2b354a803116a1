use std::sync::atomic::{AtomicUsize, Ordering};

/// Ordered API keys with a shared rotation cursor.
///
/// The cursor is an atomic index and no lock is taken. Concurrent callers may
/// observe the same key or skip one; the worst outcome is a wasted retry.
pub struct CredentialPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Index the next call will use.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Key at the cursor together with its index, `None` for an empty pool.
    pub fn current(&self) -> Option<(usize, &str)> {
        if self.keys.is_empty() {
            return None;
        }
        let index = self.cursor() % self.keys.len();
        Some((index, self.keys[index].as_str()))
    }

    /// Moves the cursor past `observed`, wrapping at the end of the pool.
    ///
    /// If another caller already moved the cursor away from `observed`, the
    /// cursor is left where it is. Returns the cursor after the call.
    pub fn advance_from(&self, observed: usize) -> usize {
        if self.keys.is_empty() {
            return 0;
        }
        let next = (observed + 1) % self.keys.len();
        match self
            .cursor
            .compare_exchange(observed, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => next,
            Err(actual) => actual,
        }
    }
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("keys", &format!("[{} REDACTED]", self.keys.len()))
            .field("cursor", &self.cursor())
            .finish()
    }
}
