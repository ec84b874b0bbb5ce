use std::sync::atomic::{AtomicU64, Ordering};

// Global counters (low overhead). These are coarse-grained and process-wide.
static PUBLISHED: AtomicU64 = AtomicU64::new(0);
static DELIVERED: AtomicU64 = AtomicU64::new(0);
static ACKED: AtomicU64 = AtomicU64::new(0);
static REJECTED: AtomicU64 = AtomicU64::new(0);
static PUSHED: AtomicU64 = AtomicU64::new(0);
static RETURNED: AtomicU64 = AtomicU64::new(0);
static HEARTBEAT_FAILURES: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn inc_published(n: u64) {
    PUBLISHED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_delivered(n: u64) {
    DELIVERED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_acked(n: u64) {
    ACKED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_rejected(n: u64) {
    REJECTED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_pushed(n: u64) {
    PUSHED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_returned(n: u64) {
    RETURNED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_heartbeat_failures(n: u64) {
    HEARTBEAT_FAILURES.fetch_add(n, Ordering::Relaxed);
}

pub fn heartbeat_failures() -> u64 {
    HEARTBEAT_FAILURES.load(Ordering::Relaxed)
}

pub fn snapshot() -> String {
    // Simple text format (Prometheus-style without HELP/TYPE lines for brevity)
    format!(
        "relq_published {}\nrelq_delivered {}\nrelq_acked {}\nrelq_rejected {}\nrelq_pushed {}\nrelq_returned {}\nrelq_heartbeat_failures {}\n",
        PUBLISHED.load(Ordering::Relaxed),
        DELIVERED.load(Ordering::Relaxed),
        ACKED.load(Ordering::Relaxed),
        REJECTED.load(Ordering::Relaxed),
        PUSHED.load(Ordering::Relaxed),
        RETURNED.load(Ordering::Relaxed),
        HEARTBEAT_FAILURES.load(Ordering::Relaxed),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_lists_every_counter() {
        inc_published(1);
        let text = snapshot();
        for name in [
            "relq_published",
            "relq_delivered",
            "relq_acked",
            "relq_rejected",
            "relq_pushed",
            "relq_returned",
            "relq_heartbeat_failures",
        ] {
            assert!(text.contains(name), "missing {name}");
        }
        assert!(!text.contains("relq_published 0\n"));
    }
}
