//! Notification id and progress-bucket math shared between the evaluator
//! and the orchestrator's pre-filter.

use uuid::Uuid;

/// True when `current` is at least one full `interval` away from the bucket
/// `last` sits in. Bucket edges are multiples of `interval`.
pub fn interval_reached(last: i32, current: i32, interval: i32) -> bool {
    if interval <= 0 {
        return true;
    }
    // Floor-mod keeps a negative `last` (never notified) below every real
    // bucket, so the first real progress value always fires.
    let normalized = last - last.rem_euclid(interval);
    (current - normalized).abs() >= interval
}

/// Stable per-device notification id within the 32-bit range the apps
/// accept. The offset separates the channels of one device.
pub fn notification_id(machine_id: &str, offset: u32) -> i64 {
    // Device keys are UUID-validated before evaluation; the byte fold only
    // guards against hand-edited records.
    let numeric = Uuid::try_parse(machine_id)
        .map(|u| u.as_u128())
        .unwrap_or_else(|_| {
            machine_id
                .bytes()
                .fold(0u128, |acc, b| acc.wrapping_mul(31).wrapping_add(u128::from(b)))
        });
    ((numeric + u128::from(offset)) % 2_147_483_647) as i64 + 1
}
