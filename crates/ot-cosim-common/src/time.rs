//! ---
//! cosim_section: "01-core-functionality"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Shared primitives and utilities for the co-simulation runtime."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use chrono::Utc;

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Return `ts` unless it is the "unset" marker (`0`), in which case stamp now.
pub fn stamp_or_now(ts: i64) -> i64 {
    if ts == 0 {
        epoch_millis()
    } else {
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timestamp_is_stamped() {
        let before = epoch_millis();
        let stamped = stamp_or_now(0);
        assert!(stamped >= before);
    }

    #[test]
    fn explicit_timestamp_is_kept() {
        assert_eq!(stamp_or_now(1_700_000_000_000), 1_700_000_000_000);
    }
}
