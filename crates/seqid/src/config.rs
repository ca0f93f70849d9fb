use crate::{DatePattern, Error, Result};
use core::time::Duration;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Largest supported `padding_length`; `10^18` still fits comfortably in a
/// `u64` cursor.
pub const MAX_PADDING_LENGTH: u32 = 18;

/// The persisted state of one allocation key.
///
/// One row exists per key. It is created lazily from [`SequenceOptions`] the
/// first time the key is allocated, and afterwards only mutated by whoever
/// holds the key's lease.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceConfig {
    pub key: String,
    pub prefix: String,
    pub date_format: String,
    pub padding_length: u32,
    pub batch_size: u32,
    /// Next numeric value to assign. Always `>= 1`.
    pub current_cursor: u64,
    /// Number of letters prepended to the numeric component once the day's
    /// numeric range has been exhausted.
    pub overflow_position: u32,
    /// Date stamp for which the cursor and overflow position are valid.
    pub last_rollover_date: String,
}

impl SequenceConfig {
    /// A fresh row for `key`, valid from `today`.
    pub fn from_options(key: &str, options: &SequenceOptions, today: String) -> Self {
        Self {
            key: key.to_owned(),
            prefix: options.prefix.clone(),
            date_format: options.date_format.clone(),
            padding_length: options.padding_length,
            batch_size: options.batch_size,
            current_cursor: 1,
            overflow_position: 0,
            last_rollover_date: today,
        }
    }

    /// The formatting parameters this row was created with.
    pub fn options(&self) -> SequenceOptions {
        SequenceOptions {
            prefix: self.prefix.clone(),
            date_format: self.date_format.clone(),
            padding_length: self.padding_length,
            batch_size: self.batch_size,
        }
    }
}

/// Caller-supplied formatting parameters for an allocation key.
///
/// These only take effect when the key's row is first created; an existing
/// row keeps the parameters it was created with.
///
/// # Example
///
/// ```
/// use seqid::SequenceOptions;
///
/// let options = SequenceOptions::new("ORD")
///     .with_date_format("yyyyMMdd")
///     .with_padding_length(6)
///     .with_batch_size(3);
/// assert!(options.validate("order").is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceOptions {
    pub prefix: String,
    pub date_format: String,
    pub padding_length: u32,
    pub batch_size: u32,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            date_format: "yyyyMMdd".to_owned(),
            padding_length: 6,
            batch_size: 100,
        }
    }
}

impl SequenceOptions {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn with_date_format(mut self, date_format: impl Into<String>) -> Self {
        self.date_format = date_format.into();
        self
    }

    pub fn with_padding_length(mut self, padding_length: u32) -> Self {
        self.padding_length = padding_length;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Checks the options for `key` without touching any store.
    pub fn validate(&self, key: &str) -> Result<()> {
        let reject = |reason: String| Error::InvalidOptions {
            key: key.to_owned(),
            reason,
        };

        if key.is_empty() {
            return Err(reject("key must not be empty".to_owned()));
        }
        if !(1..=MAX_PADDING_LENGTH).contains(&self.padding_length) {
            return Err(reject(format!(
                "padding_length must be within 1..={MAX_PADDING_LENGTH}, got {}",
                self.padding_length
            )));
        }
        if self.batch_size == 0 {
            return Err(reject("batch_size must be at least 1".to_owned()));
        }
        DatePattern::parse(&self.date_format)?;
        Ok(())
    }
}

/// Tunables for [`crate::LeaseLockManager`].
///
/// `poll_interval` trades acquisition latency against store load: every
/// waiter issues a cleanup, an insert and a retry-count update per poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockOptions {
    /// How long `lock` keeps polling before giving up.
    pub wait_timeout: Duration,
    /// How long a lease is valid after it is granted.
    pub lease_duration: Duration,
    /// Sleep between acquisition attempts.
    pub poll_interval: Duration,
    /// Failed attempts against one record before it may be force-released.
    pub max_retry_count: u32,
    /// Whether records over `max_retry_count` are force-released.
    pub force_release: bool,
    /// Diagnostic identity written to `holder_info`. Defaults to the process
    /// id when unset; the acquiring thread is always appended.
    pub holder: Option<String>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(10),
            lease_duration: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
            max_retry_count: 600,
            force_release: true,
            holder: None,
        }
    }
}

impl LockOptions {
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_retry_count(mut self, max_retry_count: u32) -> Self {
        self.max_retry_count = max_retry_count;
        self
    }

    pub fn with_force_release(mut self, force_release: bool) -> Self {
        self.force_release = force_release;
        self
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = Some(holder.into());
        self
    }
}

/// Per-key [`SequenceOptions`] registered once at startup.
///
/// This is the configuration provider consulted by
/// [`crate::SequenceAllocator::allocate`].
#[derive(Debug, Default)]
pub struct SequenceRegistry {
    entries: RwLock<HashMap<String, SequenceOptions>>,
}

impl SequenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and stores `options` for `key`, replacing any earlier entry.
    pub fn register(&self, key: impl Into<String>, options: SequenceOptions) -> Result<()> {
        let key = key.into();
        options.validate(&key)?;
        self.entries.write().insert(key, options);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<SequenceOptions> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_out_of_range_options() {
        let base = SequenceOptions::new("P");
        assert!(base.validate("k").is_ok());

        let bad = [
            base.clone().with_padding_length(0),
            base.clone().with_padding_length(MAX_PADDING_LENGTH + 1),
            base.clone().with_batch_size(0),
        ];
        for options in bad {
            assert!(matches!(
                options.validate("k"),
                Err(Error::InvalidOptions { .. })
            ));
        }
        assert!(matches!(
            base.clone().with_date_format("yyyyQQ").validate("k"),
            Err(Error::InvalidDatePattern { .. })
        ));
        assert!(matches!(base.validate(""), Err(Error::InvalidOptions { .. })));
    }

    #[test]
    fn registry_replaces_entries() {
        let registry = SequenceRegistry::new();
        registry.register("order", SequenceOptions::new("A")).unwrap();
        registry.register("order", SequenceOptions::new("B")).unwrap();

        assert_eq!(registry.get("order").unwrap().prefix, "B");
        assert!(registry.contains("order"));
        assert!(registry.get("invoice").is_none());
        assert!(
            registry
                .register("bad", SequenceOptions::new("X").with_batch_size(0))
                .is_err()
        );
        assert!(!registry.contains("bad"));
    }
}
