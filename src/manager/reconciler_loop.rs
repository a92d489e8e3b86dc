//! The backoff-driven reconciler loop (§4.8).
//!
//! Transport and app reconciliation each run this same driver on their own thread: attempt every
//! dirty flow, and if at least one succeeded, assume reconciling might have unblocked something
//! else (an app flow whose transport parent just got a `ConnectionRecord`) and retry immediately
//! with the backoff reset. Only back off when a full pass attempted something and nothing
//! succeeded.

use crossbeam_channel::{select, Receiver};

use crate::backoff::Backoff;

/// The result of one reconciliation pass over a flow table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassOutcome {
    pub attempted: usize,
    pub succeeded: usize,
}

/// Runs `pass` repeatedly until `cancel` fires.
///
/// `pass` is expected to scan every dirty entry in its flow table, attempt reconciliation, and
/// report how many it tried and how many succeeded; this function only owns the scheduling between
/// passes.
pub fn run(cancel: &Receiver<()>, mut pass: impl FnMut() -> PassOutcome) {
    let mut backoff = Backoff::new();
    loop {
        let outcome = pass();

        if outcome.attempted == 0 {
            // Nothing to do; wait for the current backoff delay (left untouched) or cancellation.
            let timeout = backoff.next_delay();
            select! {
                recv(cancel) -> _ => return,
                default(timeout) => {}
            }
            continue;
        }

        if outcome.succeeded > 0 {
            backoff.reset();
            // Replay immediately: something just got unblocked, check for cancellation only.
            if cancel.try_recv().is_ok() {
                return;
            }
            continue;
        }

        let timeout = backoff.next_delay();
        select! {
            recv(cancel) -> _ => return,
            default(timeout) => {}
        }
    }
}
