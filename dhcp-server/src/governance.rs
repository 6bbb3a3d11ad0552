//! Request governance (G): per-MAC abuse throttling and unknown/misbehaving
//! MAC quarantine (§4.4), plus the poll-tick bookkeeping (§3 PollRecord,
//! §5 poll tick) that observes it.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub type Mac = [u8; 6];

#[derive(Default)]
struct State {
    assignments: HashMap<Mac, u32>,
    ignored: Vec<(Mac, i64)>,
    packets_processed: u64,
    packets_discarded: u64,
}

/// `(timestamp, packets_processed, packets_discarded, time_taken_seconds,
/// ignored_mac_count)` (§3).
#[derive(Clone, Debug)]
pub struct PollRecord {
    pub packets_processed: u64,
    pub packets_discarded: u64,
    pub time_taken_secs: f64,
    pub ignored_mac_count: usize,
}

/// Bounded ring of poll records, the operator-facing surface for governance
/// (§6 "Operator outputs"). Capacity is generous but finite so a server
/// left running for months doesn't grow this without bound.
const POLL_RING_CAPACITY: usize = 1024;

pub struct Governance {
    state: Mutex<State>,
    history: Mutex<VecDeque<PollRecord>>,
    governance_enabled: bool,
    threshold: u32,
    misbehave_timeout_secs: i64,
}

impl Governance {
    pub fn new(governance_enabled: bool, threshold: u32, misbehave_timeout_secs: i64) -> Self {
        Self {
            state: Mutex::new(State::default()),
            history: Mutex::new(VecDeque::with_capacity(POLL_RING_CAPACITY)),
            governance_enabled,
            threshold,
            misbehave_timeout_secs,
        }
    }

    /// Admits or rejects a request from `mac`. A MAC already on the
    /// ignore list is rejected outright; otherwise its per-poll assignment
    /// counter is incremented, and a governance-enabled server that sees
    /// the counter cross `threshold` both rejects this request and adds
    /// the MAC to the ignore list for `misbehave_timeout`.
    pub fn admit(&self, mac: &Mac) -> bool {
        let mut state = self.state.lock().unwrap();

        if state.ignored.iter().any(|(m, _)| m == mac) {
            state.packets_discarded += 1;
            return false;
        }

        let count = state.assignments.entry(*mac).or_insert(0);
        *count += 1;

        if self.governance_enabled && *count > self.threshold {
            state.ignored.push((*mac, self.misbehave_timeout_secs));
            state.packets_discarded += 1;
            return false;
        }

        state.packets_processed += 1;
        true
    }

    /// Adds `mac` to the ignore list for `seconds`, used for unknown MACs
    /// and malformed INFORMs without a `ciaddr`.
    pub fn quarantine(&self, mac: &Mac, seconds: i64) {
        let mut state = self.state.lock().unwrap();
        state.ignored.push((*mac, seconds));
    }

    pub fn record_discarded(&self) {
        self.state.lock().unwrap().packets_discarded += 1;
    }

    /// Decrements every ignored entry's remaining seconds by the poll
    /// interval, drops entries at or below zero, resets the assignment
    /// counters, and returns the processed/discarded/elapsed counters
    /// since the previous tick (§4.4, §3 PollRecord). This is the only
    /// point at which the counters and ignore list are observed
    /// externally.
    pub fn tick(&self, interval_secs: i64) -> PollRecord {
        let started = Instant::now();

        let mut state = self.state.lock().unwrap();

        for entry in state.ignored.iter_mut() {
            entry.1 -= interval_secs;
        }
        state.ignored.retain(|(_, remaining)| *remaining > 0);

        state.assignments.clear();

        let record = PollRecord {
            packets_processed: std::mem::take(&mut state.packets_processed),
            packets_discarded: std::mem::take(&mut state.packets_discarded),
            time_taken_secs: started.elapsed().as_secs_f64(),
            ignored_mac_count: state.ignored.len(),
        };

        drop(state);

        let mut history = self.history.lock().unwrap();
        if history.len() == POLL_RING_CAPACITY {
            history.pop_front();
        }
        history.push_back(record.clone());

        record
    }

    pub fn history_snapshot(&self) -> Vec<PollRecord> {
        self.history.lock().unwrap().iter().cloned().collect()
    }
}

/// Runs [`Governance::tick`] every `interval` on its own thread, as §5
/// specifies ("Poll tick runs from a separate timer thread").
pub fn spawn_poll_thread(
    governance: std::sync::Arc<Governance>,
    interval: Duration,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        std::thread::sleep(interval);

        let record = governance.tick(interval.as_secs() as i64);

        log::info!(
            "poll tick: processed={} discarded={} ignored_macs={}",
            record.packets_processed,
            record.packets_discarded,
            record.ignored_mac_count
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admit_allows_up_to_threshold_then_quarantines() {
        let governance = Governance::new(true, 10, 60);
        let mac = [1, 2, 3, 4, 5, 6];

        for _ in 0..10 {
            assert!(governance.admit(&mac));
        }

        assert!(!governance.admit(&mac));
        assert!(!governance.admit(&mac));
    }

    #[test]
    fn tick_drops_expired_entries_and_keeps_live_ones_positive() {
        let governance = Governance::new(false, 10, 60);
        governance.quarantine(&[1, 1, 1, 1, 1, 1], 30);
        governance.quarantine(&[2, 2, 2, 2, 2, 2], 90);

        let record = governance.tick(60);
        assert_eq!(record.ignored_mac_count, 1);

        let state = governance.state.lock().unwrap();
        assert!(state.ignored.iter().all(|(_, remaining)| *remaining > 0));
    }

    #[test]
    fn tick_resets_assignment_counters() {
        let governance = Governance::new(true, 10, 60);
        let mac = [9, 9, 9, 9, 9, 9];

        governance.admit(&mac);
        governance.tick(60);

        for _ in 0..10 {
            assert!(governance.admit(&mac));
        }
    }
}
