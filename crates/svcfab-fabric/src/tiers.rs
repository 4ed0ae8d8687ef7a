//! The tiered band structure.
//!
//! Three bands by convention: band 0 holds performant-and-reliable
//! providers, band 1 performant-but-not-yet-reliable ones, and the last band
//! is the trash tier, emptied at the end of every sweep. Reliability decides
//! the band; observed rtt decides the order within a band. Look-ups scan
//! bands in order and never return from the trash tier, so the first match
//! is the best available provider.
//!
//! `TierTable` is pure data - all I/O (registry lookups, pings) lives in the
//! sweeper, which drives the table through `probe_target`/`apply_probe` and
//! the re-band/trash/sort steps.

use std::time::Duration;

use svcfab_common::registry::ProbeClass;
use svcfab_common::{NodeId, PerfMeasurement};

use crate::record::{
    ProviderRecord, ProviderRequest, DEMOTE_BELOW, PROMOTE_ABOVE, RELIABILITY_INITIAL,
    TOP_BAND_FLOOR,
};

/// Number of reliability bands.
pub const NUM_BANDS: usize = 3;

/// How many records per band a removal inspects. Removals are triggered by
/// failed application requests, and only top-ranked candidates are likely to
/// have been chosen, so the scan is bounded instead of exhaustive.
pub const REMOVE_SCAN_WINDOW: usize = 3;

/// The ordered reliability bands.
#[derive(Debug, Clone)]
pub struct TierTable {
    bands: Vec<Vec<ProviderRecord>>,
}

impl Default for TierTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TierTable {
    pub fn new() -> Self {
        Self::with_bands(NUM_BANDS)
    }

    /// A table with `n >= 2` bands. The last band is always the trash tier.
    pub fn with_bands(n: usize) -> Self {
        assert!(n >= 2, "a tier table needs at least one live band and the trash tier");
        Self {
            bands: vec![Vec::new(); n],
        }
    }

    pub fn num_bands(&self) -> usize {
        self.bands.len()
    }

    pub fn band_len(&self, band: usize) -> usize {
        self.bands[band].len()
    }

    pub fn total(&self) -> usize {
        self.bands.iter().map(Vec::len).sum()
    }

    pub fn records(&self, band: usize) -> &[ProviderRecord] {
        &self.bands[band]
    }

    /// Band currently holding `peer`, if tracked.
    pub fn band_of(&self, peer: &NodeId) -> Option<usize> {
        self.bands
            .iter()
            .position(|band| band.iter().any(|rec| rec.peer == *peer))
    }

    /// Track a new provider: band `N-2`, initial reliability, empty perf.
    ///
    /// Duplicates are permitted; the next sweep resolves them.
    pub fn insert(&mut self, request: ProviderRequest) {
        let band = self.bands.len() - 2;
        self.bands[band].push(ProviderRecord::new(request));
    }

    /// Place a record in a specific band. Seeding support for bootstrap and
    /// tests; the sweeper re-bands on its next pass regardless.
    pub fn insert_at(&mut self, band: usize, record: ProviderRecord) {
        self.bands[band].push(record);
    }

    /// Remove the first record matching `(peer, address)` within the scan
    /// window of each live band. Not finding one is a silent no-op.
    pub fn remove(&mut self, peer: &NodeId, address: &str) -> bool {
        for band in 0..self.bands.len() - 1 {
            let window = REMOVE_SCAN_WINDOW.min(self.bands[band].len());
            for i in 0..window {
                let rec = &self.bands[band][i];
                if rec.peer == *peer && rec.address == address {
                    self.bands[band].remove(i);
                    return true;
                }
            }
        }
        false
    }

    /// First provider of `service_hash`, scanning live bands in order.
    ///
    /// Bands are sorted by rtt after every sweep, so this returns the
    /// lowest-rtt match of the most reliable band that has one. The trash
    /// tier is never consulted.
    pub fn get(&self, service_hash: &str) -> Option<(NodeId, String)> {
        for band in 0..self.bands.len() - 1 {
            if let Some(rec) = self.bands[band]
                .iter()
                .find(|rec| rec.service_hash == service_hash)
            {
                return Some((rec.peer, rec.address.clone()));
            }
        }
        None
    }

    /// Identity and service name of the record at `(band, index)`, for the
    /// sweeper to probe.
    pub fn probe_target(&self, band: usize, index: usize) -> (NodeId, String) {
        let rec = &self.bands[band][index];
        (rec.peer, rec.service_name.clone())
    }

    /// Apply one probe outcome to the record at `(band, index)`.
    ///
    /// Returns true if the record was removed (hard failure) - the caller
    /// must not advance its index in that case.
    pub fn apply_probe(
        &mut self,
        band: usize,
        index: usize,
        class: ProbeClass,
        rtt: Duration,
    ) -> bool {
        match class {
            ProbeClass::HardFail => {
                self.bands[band].remove(index);
                true
            }
            ProbeClass::SoftFail => {
                let rec = &mut self.bands[band][index];
                rec.last_perf = PerfMeasurement::from_rtt(rtt);
                rec.penalize();
                false
            }
            ProbeClass::Pass => {
                let rec = &mut self.bands[band][index];
                rec.last_perf = PerfMeasurement::from_rtt(rtt);
                rec.reward();
                false
            }
        }
    }

    /// Move records between bands according to their updated reliability.
    ///
    /// Band 0 demotes below [`TOP_BAND_FLOOR`], resetting the counter to 50.
    /// Middle bands promote above [`PROMOTE_ABOVE`] preserving the counter
    /// (fast promotion rewards consistency) and demote below
    /// [`DEMOTE_BELOW`], again resetting to 50 - the reset is the hysteresis
    /// buffer that keeps one bad tick from chaining across bands.
    pub fn reband(&mut self) {
        let n = self.bands.len();

        let mut i = 0;
        while i < self.bands[0].len() {
            if self.bands[0][i].reliability < TOP_BAND_FLOOR {
                let mut rec = self.bands[0].remove(i);
                rec.reliability = RELIABILITY_INITIAL;
                self.bands[1].push(rec);
            } else {
                i += 1;
            }
        }

        for band in 1..n - 1 {
            let mut i = 0;
            while i < self.bands[band].len() {
                let reliability = self.bands[band][i].reliability;
                if reliability > PROMOTE_ABOVE {
                    let rec = self.bands[band].remove(i);
                    self.bands[band - 1].push(rec);
                } else if reliability < DEMOTE_BELOW {
                    let mut rec = self.bands[band].remove(i);
                    rec.reliability = RELIABILITY_INITIAL;
                    self.bands[band + 1].push(rec);
                } else {
                    i += 1;
                }
            }
        }
    }

    /// Empty the trash tier. Returns how many records were dropped.
    pub fn flush_trash(&mut self) -> usize {
        let last = self.bands.len() - 1;
        let flushed = self.bands[last].len();
        self.bands[last].clear();
        flushed
    }

    /// Stable-sort every band ascending by observed rtt.
    pub fn sort_bands(&mut self) {
        for band in &mut self.bands {
            band.sort_by(|a, b| a.last_perf.rank(&b.last_perf));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RELIABILITY_MAX;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn request(hash: &str) -> ProviderRequest {
        ProviderRequest {
            peer: NodeId::generate(),
            service_name: "svc".to_string(),
            service_hash: hash.to_string(),
            address: format!("{}-addr", hash),
        }
    }

    fn record_with(hash: &str, reliability: u8, rtt_ms: u64) -> ProviderRecord {
        let mut rec = ProviderRecord::new(request(hash));
        rec.reliability = reliability;
        rec.last_perf = PerfMeasurement::from_rtt(ms(rtt_ms));
        rec
    }

    /// I1 + I2: every record is in exactly one band with a bounded counter.
    fn assert_invariants(table: &TierTable) {
        let mut seen = std::collections::HashSet::new();
        for band in 0..table.num_bands() {
            for rec in table.records(band) {
                assert!(rec.reliability <= RELIABILITY_MAX, "I1 violated");
                assert!(
                    seen.insert((rec.peer, rec.address.clone())),
                    "I2 violated: record in more than one band"
                );
            }
        }
    }

    // ========================================================================
    // Insert / get / remove
    // ========================================================================

    #[test]
    fn test_insert_lands_in_second_lowest_band() {
        let mut table = TierTable::new();
        table.insert(request("h"));
        assert_eq!(table.band_len(0), 0);
        assert_eq!(table.band_len(1), 1);
        assert_eq!(table.band_len(2), 0);
        assert_eq!(table.records(1)[0].reliability, RELIABILITY_INITIAL);
        assert_invariants(&table);
    }

    #[test]
    fn test_get_prefers_lower_bands() {
        let mut table = TierTable::new();
        let top = record_with("h", 95, 30);
        let mid = record_with("h", 50, 5);
        let top_peer = top.peer;
        table.insert_at(0, top);
        table.insert_at(1, mid);

        // I6: band order wins over rtt order.
        let (peer, _) = table.get("h").unwrap();
        assert_eq!(peer, top_peer);
    }

    #[test]
    fn test_get_returns_lowest_rtt_within_a_band() {
        let mut table = TierTable::new();
        let slow = record_with("h", 95, 30);
        let fast = record_with("h", 95, 5);
        let fast_peer = fast.peer;
        table.insert_at(0, slow);
        table.insert_at(0, fast);
        table.sort_bands();

        let (peer, _) = table.get("h").unwrap();
        assert_eq!(peer, fast_peer);
    }

    #[test]
    fn test_get_never_returns_from_trash_band() {
        let mut table = TierTable::new();
        table.insert_at(2, record_with("h", 5, 10));
        // I5: the only match lives in the trash tier.
        assert!(table.get("h").is_none());
    }

    #[test]
    fn test_get_misses_unknown_hash() {
        let mut table = TierTable::new();
        table.insert(request("h"));
        assert!(table.get("other").is_none());
    }

    #[test]
    fn test_remove_matches_peer_and_address() {
        let mut table = TierTable::new();
        table.insert(request("h"));
        let peer = table.records(1)[0].peer;

        // Wrong address: silent no-op.
        assert!(!table.remove(&peer, "elsewhere"));
        assert_eq!(table.total(), 1);

        assert!(table.remove(&peer, "h-addr"));
        assert_eq!(table.total(), 0);
    }

    #[test]
    fn test_remove_only_scans_the_window() {
        let mut table = TierTable::new();
        for i in 0..4 {
            let mut rec = record_with("h", 50, 10 + i);
            rec.address = format!("addr-{}", i);
            table.insert_at(1, rec);
        }
        let target = table.records(1)[3].clone();

        // The fourth record is outside the scan window.
        assert!(!table.remove(&target.peer, &target.address));
        assert_eq!(table.band_len(1), 4);

        let front = table.records(1)[0].clone();
        assert!(table.remove(&front.peer, &front.address));
        assert_eq!(table.band_len(1), 3);
    }

    #[test]
    fn test_remove_keeps_band_order() {
        let mut table = TierTable::new();
        for i in 0..3 {
            let mut rec = record_with("h", 50, 10 + i);
            rec.address = format!("addr-{}", i);
            table.insert_at(1, rec);
        }
        let middle = table.records(1)[1].clone();
        table.remove(&middle.peer, &middle.address);

        let rtts: Vec<_> = table.records(1).iter().map(|r| r.last_perf.rtt).collect();
        assert_eq!(rtts, vec![ms(10), ms(12)]);
    }

    // ========================================================================
    // Probe application
    // ========================================================================

    #[test]
    fn test_hard_fail_removes_the_record() {
        let mut table = TierTable::new();
        table.insert(request("h"));
        let removed = table.apply_probe(1, 0, ProbeClass::HardFail, Duration::ZERO);
        assert!(removed);
        assert_eq!(table.total(), 0);
    }

    #[test]
    fn test_soft_fail_records_rtt_and_penalizes() {
        let mut table = TierTable::new();
        table.insert(request("h"));
        let removed = table.apply_probe(1, 0, ProbeClass::SoftFail, ms(80));
        assert!(!removed);
        let rec = &table.records(1)[0];
        assert_eq!(rec.last_perf.rtt, ms(80));
        assert_eq!(rec.reliability, RELIABILITY_INITIAL - 10);
    }

    #[test]
    fn test_pass_records_rtt_and_rewards() {
        let mut table = TierTable::new();
        table.insert(request("h"));
        let removed = table.apply_probe(1, 0, ProbeClass::Pass, ms(4));
        assert!(!removed);
        let rec = &table.records(1)[0];
        assert_eq!(rec.last_perf.rtt, ms(4));
        assert_eq!(rec.reliability, RELIABILITY_INITIAL + 1);
    }

    // ========================================================================
    // Re-banding
    // ========================================================================

    #[test]
    fn test_top_band_demotion_resets_counter() {
        let mut table = TierTable::new();
        // L2: a band-0 record that soft-failed once (92 → 82) demotes with
        // the counter reset to 50, not chained further down.
        table.insert_at(0, record_with("h", 82, 30));
        table.reband();

        assert_eq!(table.band_len(0), 0);
        assert_eq!(table.band_len(1), 1);
        assert_eq!(table.records(1)[0].reliability, RELIABILITY_INITIAL);
        assert_eq!(table.band_len(2), 0);
        assert_invariants(&table);
    }

    #[test]
    fn test_top_band_keeps_records_at_the_floor() {
        let mut table = TierTable::new();
        table.insert_at(0, record_with("h", TOP_BAND_FLOOR, 30));
        table.reband();
        assert_eq!(table.band_len(0), 1);
    }

    #[test]
    fn test_middle_band_promotion_preserves_counter() {
        let mut table = TierTable::new();
        table.insert_at(1, record_with("h", 91, 10));
        table.reband();

        assert_eq!(table.band_len(0), 1);
        assert_eq!(table.records(0)[0].reliability, 91);
        assert_invariants(&table);
    }

    #[test]
    fn test_middle_band_does_not_promote_at_threshold() {
        let mut table = TierTable::new();
        table.insert_at(1, record_with("h", PROMOTE_ABOVE, 10));
        table.reband();
        assert_eq!(table.band_len(1), 1);
    }

    #[test]
    fn test_middle_band_demotion_goes_to_trash_with_reset() {
        let mut table = TierTable::new();
        table.insert_at(1, record_with("h", 9, 10));
        table.reband();

        assert_eq!(table.band_len(1), 0);
        assert_eq!(table.band_len(2), 1);
        assert_eq!(table.records(2)[0].reliability, RELIABILITY_INITIAL);
    }

    #[test]
    fn test_demoted_top_record_does_not_chain_in_the_same_pass() {
        let mut table = TierTable::new();
        table.insert_at(0, record_with("h", 0, 30));
        table.reband();

        // Reset to 50 on the way down, so the middle-band pass keeps it.
        assert_eq!(table.band_len(1), 1);
        assert_eq!(table.band_len(2), 0);
        assert_eq!(table.records(1)[0].reliability, RELIABILITY_INITIAL);
    }

    #[test]
    fn test_flush_trash_empties_last_band() {
        let mut table = TierTable::new();
        table.insert_at(2, record_with("a", 50, 10));
        table.insert_at(2, record_with("b", 50, 20));

        assert_eq!(table.flush_trash(), 2);
        // I3.
        assert_eq!(table.band_len(2), 0);
    }

    // ========================================================================
    // Sorting
    // ========================================================================

    #[test]
    fn test_sort_bands_orders_by_rtt_ascending() {
        let mut table = TierTable::new();
        table.insert_at(1, record_with("a", 50, 30));
        table.insert_at(1, record_with("b", 50, 10));
        table.insert_at(1, record_with("c", 50, 20));
        table.sort_bands();

        let rtts: Vec<_> = table.records(1).iter().map(|r| r.last_perf.rtt).collect();
        // I4.
        assert_eq!(rtts, vec![ms(10), ms(20), ms(30)]);
    }

    #[test]
    fn test_sort_is_stable_for_equal_rtt() {
        let mut table = TierTable::new();
        let first = record_with("a", 50, 10);
        let second = record_with("b", 50, 10);
        let (p1, p2) = (first.peer, second.peer);
        table.insert_at(1, first);
        table.insert_at(1, second);
        table.sort_bands();

        assert_eq!(table.records(1)[0].peer, p1);
        assert_eq!(table.records(1)[1].peer, p2);
    }

    // ========================================================================
    // Fast promotion (L1)
    // ========================================================================

    #[test]
    fn test_consistent_passes_promote_within_ninety_one_sweeps() {
        let mut table = TierTable::new();
        let mut rec = record_with("h", 0, 5);
        rec.reliability = 0;
        table.insert_at(1, rec);

        let mut sweeps = 0;
        while table.band_len(0) == 0 {
            table.apply_probe(1, 0, ProbeClass::Pass, ms(5));
            table.reband();
            table.flush_trash();
            table.sort_bands();
            sweeps += 1;
            assert!(sweeps <= 91, "L1 violated: no promotion after 91 sweeps");
        }
        assert_eq!(sweeps, 91);
        assert_invariants(&table);
    }
}
