//! Timer bookkeeping for the sync engine.
//!
//! The engine never sleeps.  It hands out tokens and the driver fires them
//! back; a token that was re-armed or cancelled in the meantime no longer
//! matches and its fire is ignored.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Trailing-edge coalescing of local mutations.
    Debounce,
    /// Fixed-interval resubmission after a failed flush.
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub kind: TimerKind,
    pub id: u64,
}

/// One slot per timer kind.
#[derive(Debug, Default)]
pub struct TimerSlots {
    next_id: u64,
    debounce: Option<TimerToken>,
    retry: Option<TimerToken>,
}

impl TimerSlots {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<TimerToken> {
        match kind {
            TimerKind::Debounce => &mut self.debounce,
            TimerKind::Retry => &mut self.retry,
        }
    }

    /// Arm `kind`, replacing any earlier token.  Returns the new token and
    /// the replaced one, which the driver must cancel.
    pub fn arm(&mut self, kind: TimerKind) -> (TimerToken, Option<TimerToken>) {
        self.next_id += 1;
        let token = TimerToken { kind, id: self.next_id };
        let previous = self.slot(kind).replace(token);
        (token, previous)
    }

    pub fn disarm(&mut self, kind: TimerKind) -> Option<TimerToken> {
        self.slot(kind).take()
    }

    /// Consume a fired token.  False when the token is stale.
    pub fn fire(&mut self, token: TimerToken) -> bool {
        let slot = self.slot(token.kind);
        if *slot == Some(token) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Debounce => self.debounce.is_some(),
            TimerKind::Retry => self.retry.is_some(),
        }
    }
}

/// Delay for a timer kind.
pub fn delay_for(kind: TimerKind, debounce: Duration, retry: Duration) -> Duration {
    match kind {
        TimerKind::Debounce => debounce,
        TimerKind::Retry => retry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rearm_makes_old_token_stale() {
        let mut slots = TimerSlots::new();
        let (first, replaced) = slots.arm(TimerKind::Debounce);
        assert!(replaced.is_none());

        let (second, replaced) = slots.arm(TimerKind::Debounce);
        assert_eq!(replaced, Some(first));
        assert!(!slots.fire(first));
        assert!(slots.fire(second));
        assert!(!slots.is_armed(TimerKind::Debounce));
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut slots = TimerSlots::new();
        let (debounce, _) = slots.arm(TimerKind::Debounce);
        let (retry, _) = slots.arm(TimerKind::Retry);
        assert_eq!(slots.disarm(TimerKind::Retry), Some(retry));
        assert!(!slots.fire(retry));
        assert!(slots.fire(debounce));
    }
}
