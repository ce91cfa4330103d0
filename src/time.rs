use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

lazy_static! {
    // wall clock and monotonic clock sampled together once per process
    static ref PROCESS_EPOCH: (u64, Instant) = (unix_nanos(), Instant::now());
}

static LAST_NONCE: AtomicU64 = AtomicU64::new(0);

pub fn create_timestamp() -> u64 {
    unix_nanos() / 1_000_000
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

/// A nonce in nanoseconds since the unix epoch, advanced by the monotonic
/// clock so that wall clock adjustments never move it backwards. Strictly
/// increasing across every caller in the process.
pub fn create_nonce() -> u64 {
    let (epoch_nanos, epoch_instant) = *PROCESS_EPOCH;
    let candidate = epoch_nanos + epoch_instant.elapsed().as_nanos() as u64;
    let mut last = LAST_NONCE.load(Ordering::SeqCst);
    loop {
        let next = candidate.max(last + 1);
        match LAST_NONCE.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}
