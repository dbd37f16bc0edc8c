//! Pure placement policy for the dispatcher.
//!
//! The dispatcher scans queued jobs oldest-first and, for each, picks the
//! connected device with the most spare capacity; ties break toward the
//! earliest `last_seen`. These helpers are pure so the policy can be tested
//! without any coordinator state.

use crate::types::Timestamp;

/// A placement candidate: one connected device's capacity facts.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// Effective logical core count (already normalized, >= 1).
    pub cores: u32,
    /// Jobs currently `inprogress` and assigned to this device.
    pub active_jobs: u32,
    /// When the device was last seen.
    pub last_seen: Timestamp,
}

/// Cores not currently committed to in-flight jobs. Saturates at zero.
pub fn spare_capacity(cores: u32, active_jobs: u32) -> u32 {
    cores.saturating_sub(active_jobs)
}

/// Pick the index of the best candidate, or `None` if no candidate has
/// spare capacity (the job then stays queued — expected steady state under
/// load, not an error).
///
/// Policy: most spare capacity wins; ties break by earliest `last_seen`.
pub fn select_device(candidates: &[Candidate]) -> Option<usize> {
    let mut best: Option<(usize, u32, Timestamp)> = None;

    for (idx, c) in candidates.iter().enumerate() {
        let spare = spare_capacity(c.cores, c.active_jobs);
        if spare == 0 {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, best_spare, best_seen)) => {
                spare > best_spare || (spare == best_spare && c.last_seen < best_seen)
            }
        };
        if better {
            best = Some((idx, spare, c.last_seen));
        }
    }

    best.map(|(idx, _, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    // -- spare_capacity -------------------------------------------------------

    #[test]
    fn spare_capacity_subtracts_active() {
        assert_eq!(spare_capacity(8, 3), 5);
    }

    #[test]
    fn spare_capacity_saturates_at_zero() {
        assert_eq!(spare_capacity(2, 5), 0);
    }

    // -- select_device --------------------------------------------------------

    #[test]
    fn empty_candidates_select_none() {
        assert_eq!(select_device(&[]), None);
    }

    #[test]
    fn fully_loaded_candidates_select_none() {
        let candidates = [
            Candidate { cores: 2, active_jobs: 2, last_seen: at(0) },
            Candidate { cores: 4, active_jobs: 4, last_seen: at(1) },
        ];
        assert_eq!(select_device(&candidates), None);
    }

    #[test]
    fn most_spare_capacity_wins() {
        let candidates = [
            Candidate { cores: 4, active_jobs: 3, last_seen: at(0) },
            Candidate { cores: 8, active_jobs: 2, last_seen: at(1) },
            Candidate { cores: 2, active_jobs: 0, last_seen: at(2) },
        ];
        // Spare: 1, 6, 2 — index 1 wins.
        assert_eq!(select_device(&candidates), Some(1));
    }

    #[test]
    fn tie_breaks_by_earliest_last_seen() {
        let candidates = [
            Candidate { cores: 4, active_jobs: 0, last_seen: at(100) },
            Candidate { cores: 4, active_jobs: 0, last_seen: at(50) },
            Candidate { cores: 4, active_jobs: 0, last_seen: at(75) },
        ];
        assert_eq!(select_device(&candidates), Some(1));
    }

    #[test]
    fn single_spare_slot_is_enough() {
        let candidates = [Candidate { cores: 1, active_jobs: 0, last_seen: at(0) }];
        assert_eq!(select_device(&candidates), Some(0));
    }
}
