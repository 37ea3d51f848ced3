/// A single cooldown window anchored at the last triggering action.
///
/// A wallet with no recorded window behaves as `default()`: zero anchor,
/// zero duration, never on cooldown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CooldownWindow {
    pub last_timestamp: i64,
    pub duration_seconds: i64,
}

impl CooldownWindow {
    pub fn new(last_timestamp: i64, duration_seconds: i64) -> Self {
        Self {
            last_timestamp,
            duration_seconds,
        }
    }

    pub fn ends_at(&self) -> i64 {
        self.last_timestamp.saturating_add(self.duration_seconds)
    }

    pub fn remaining(&self, now: i64) -> i64 {
        (self.ends_at() - now).max(0)
    }

    pub fn is_active(&self, now: i64) -> bool {
        now < self.ends_at()
    }
}

/// Absolute-expiry windows (shields, steal protection) are active strictly
/// before their expiry timestamp.
pub fn expiry_active(expiry: i64, now: i64) -> bool {
    expiry > now
}
