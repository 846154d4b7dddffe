//! Periodic event source.
//!
//! A single loop owns a min-heap of scheduled spots. Each spot fires a thunk
//! (typically a `try_send` into some actor's mailbox), then reschedules at
//! `now + interval`. Granularity is a coarse second with no drift correction;
//! a slow consumer simply sees fewer ticks.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info};

/// Repeat count for spots that never retire.
pub const FOREVER: u64 = u64::MAX;

type Thunk = Box<dyn Fn() + Send>;

struct Spot {
    next: Instant,
    interval: Duration,
    remaining: u64,
    seq: u64,
    action: Thunk,
}

impl PartialEq for Spot {
    fn eq(&self, other: &Self) -> bool {
        self.next == other.next && self.seq == other.seq
    }
}
impl Eq for Spot {}
impl PartialOrd for Spot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Spot {
    // reversed so the BinaryHeap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .next
            .cmp(&self.next)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Handle used by actors to register periodic events.
#[derive(Clone)]
pub struct TickerHandle {
    tx: mpsc::UnboundedSender<SpotRequest>,
}

struct SpotRequest {
    interval: Duration,
    count: u64,
    action: Thunk,
}

impl TickerHandle {
    /// Schedule `action` every `interval`, `count` times (`FOREVER` to never
    /// retire). The first firing is one interval from now.
    pub fn add_spot(&self, interval: Duration, count: u64, action: impl Fn() + Send + 'static) {
        let _ = self.tx.send(SpotRequest {
            interval,
            count,
            action: Box::new(action),
        });
    }
}

/// Spawn the ticker loop; returns the registration handle.
pub fn spawn(mut shutdown: watch::Receiver<bool>) -> TickerHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<SpotRequest>();
    tokio::spawn(async move {
        let mut heap: BinaryHeap<Spot> = BinaryHeap::new();
        let mut seq = 0u64;
        info!("ticker running");

        loop {
            let deadline = heap
                .peek()
                .map(|s| s.next)
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("ticker shutting down");
                        break;
                    }
                }

                req = rx.recv() => {
                    match req {
                        Some(r) => {
                            seq += 1;
                            heap.push(Spot {
                                next: Instant::now() + r.interval,
                                interval: r.interval,
                                remaining: r.count,
                                seq,
                                action: r.action,
                            });
                        }
                        None => break,
                    }
                }

                _ = tokio::time::sleep_until(deadline) => {
                    let now = Instant::now();
                    while heap.peek().map(|s| s.next <= now).unwrap_or(false) {
                        let mut spot = heap.pop().expect("peeked");
                        (spot.action)();
                        if spot.remaining != FOREVER {
                            spot.remaining -= 1;
                            if spot.remaining == 0 {
                                continue;
                            }
                        }
                        spot.next = now + spot.interval;
                        heap.push(spot);
                    }
                }
            }
        }
    });
    TickerHandle { tx }
}
