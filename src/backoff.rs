//! Exponential backoff for the reconciler loops (§4.8).

use std::time::Duration;

const INITIAL: Duration = Duration::from_millis(50);
const MAX: Duration = Duration::from_secs(5);

/// Doubles its delay on every failed attempt, capped at five seconds, with no limit on total
/// elapsed time: a reconciler backs off for as long as a flow stays unreconciled, there is no point
/// at which it gives up and drops the flow on the floor.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Backoff { next: INITIAL }
    }

    /// The delay to wait before the next attempt, doubling (capped at [`MAX`]) for the attempt
    /// after that.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(MAX);
        delay
    }

    /// Resets the delay back to its initial value, called after a successful reconciliation.
    pub fn reset(&mut self) {
        self.next = INITIAL;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
