//! The three active-page placement policies from `Cache<T>`'s constructor
//! dispatch, plus the optional CLOCK-2-hand variant. Each maps a logical
//! page index to a slot index in the owning `PageCache`'s fixed page
//! pool; the pool itself never moves pages around, only these structures
//! decide which slot a logical page currently lives in.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

/// A placement policy over a fixed pool of `capacity` slots.
pub enum EvictionPolicy {
    Direct(DirectPolicy),
    SmallArray(SmallArrayPolicy),
    Scalable(ScalablePolicy),
    Clock(ClockPolicy),
}

impl EvictionPolicy {
    /// Picks Direct for `A = 1`, small-array linear-scan LRU for
    /// `A in [2, 12]`, scalable map+list LRU for `A >= 13`, matching the
    /// constructor dispatch in the design this is based on.
    pub fn for_active_pages(capacity: usize) -> Self {
        if capacity <= config::page::DIRECT_POLICY_MAX_ACTIVE_PAGES {
            EvictionPolicy::Direct(DirectPolicy::new())
        } else if capacity <= config::page::SMALL_ARRAY_POLICY_MAX_ACTIVE_PAGES {
            EvictionPolicy::SmallArray(SmallArrayPolicy::new(capacity))
        } else {
            EvictionPolicy::Scalable(ScalablePolicy::new(capacity))
        }
    }

    pub fn clock(capacity: usize) -> Self {
        EvictionPolicy::Clock(ClockPolicy::new(capacity))
    }

    /// `Some(slot)` on a hit; the slot's recency is bumped as a side
    /// effect.
    pub fn lookup(&mut self, page: usize) -> Option<usize> {
        match self {
            EvictionPolicy::Direct(p) => p.lookup(page),
            EvictionPolicy::SmallArray(p) => p.lookup(page),
            EvictionPolicy::Scalable(p) => p.lookup(page),
            EvictionPolicy::Clock(p) => p.lookup(page),
        }
    }

    /// Place `page` in a slot, returning `(slot, evicted_page)`.
    pub fn insert(&mut self, page: usize) -> (usize, Option<usize>) {
        match self {
            EvictionPolicy::Direct(p) => p.insert(page),
            EvictionPolicy::SmallArray(p) => p.insert(page),
            EvictionPolicy::Scalable(p) => p.insert(page),
            EvictionPolicy::Clock(p) => p.insert(page),
        }
    }
}

/// `A = 1`: one active page. Any miss evicts the current occupant.
pub struct DirectPolicy {
    current: Option<usize>,
}

impl DirectPolicy {
    pub fn new() -> Self {
        Self { current: None }
    }

    fn lookup(&mut self, page: usize) -> Option<usize> {
        (self.current == Some(page)).then_some(0)
    }

    fn insert(&mut self, page: usize) -> (usize, Option<usize>) {
        let evicted = self.current;
        self.current = Some(page);
        (0, evicted)
    }
}

struct Record {
    key: Option<usize>,
    ts: u64,
    slot: usize,
}

/// `A in [2, 12]`: linear scan over `A` `{key, ts, slot}` records. A hit
/// bumps the record's timestamp and re-sorts by insertion sort; a miss
/// evicts whichever record insertion sort settles at index 0 (lowest
/// `ts`), mirroring `Cache<T>::accessFast`.
pub struct SmallArrayPolicy {
    records: Vec<Record>,
    clock: u64,
}

impl SmallArrayPolicy {
    pub fn new(capacity: usize) -> Self {
        let records = (0..capacity)
            .map(|slot| Record {
                key: None,
                ts: 0,
                slot,
            })
            .collect();
        Self { records, clock: 0 }
    }

    fn next_ts(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Insertion sort ascending by `ts`, so index 0 holds the
    /// least-recently-used record.
    fn insertion_sort(&mut self) {
        for i in 1..self.records.len() {
            let mut j = i;
            while j > 0 && self.records[j - 1].ts > self.records[j].ts {
                self.records.swap(j - 1, j);
                j -= 1;
            }
        }
    }

    fn lookup(&mut self, page: usize) -> Option<usize> {
        let pos = self.records.iter().position(|r| r.key == Some(page))?;
        let ts = self.next_ts();
        self.records[pos].ts = ts;
        let slot = self.records[pos].slot;
        self.insertion_sort();
        Some(slot)
    }

    fn insert(&mut self, page: usize) -> (usize, Option<usize>) {
        let ts = self.next_ts();
        if let Some(empty) = self.records.iter_mut().find(|r| r.key.is_none()) {
            empty.key = Some(page);
            empty.ts = ts;
            let slot = empty.slot;
            self.insertion_sort();
            return (slot, None);
        }

        self.insertion_sort();
        let victim_key = self.records[0].key;
        let slot = self.records[0].slot;
        self.records[0].key = Some(page);
        self.records[0].ts = ts;
        self.insertion_sort();
        (slot, victim_key)
    }
}

/// `A >= 13`: a real LRU map from logical page to slot index, backed by
/// the `lru` crate's intrusive doubly-linked list. Capacity is managed by
/// hand (a free-slot stack) rather than the crate's own auto-eviction, so
/// the victim's slot index is always known before the page cache's
/// `swap` writes it back.
pub struct ScalablePolicy {
    map: LruCache<usize, usize>,
    free_slots: Vec<usize>,
}

impl ScalablePolicy {
    pub fn new(capacity: usize) -> Self {
        let free_slots = (0..capacity).rev().collect();
        Self {
            map: LruCache::unbounded(),
            free_slots,
        }
    }

    fn lookup(&mut self, page: usize) -> Option<usize> {
        self.map.get(&page).copied()
    }

    fn insert(&mut self, page: usize) -> (usize, Option<usize>) {
        if let Some(slot) = self.free_slots.pop() {
            self.map.put(page, slot);
            return (slot, None);
        }
        let (evicted_page, slot) = self.map.pop_lru().expect("scalable policy has no free slot and is empty");
        self.map.put(page, slot);
        (slot, Some(evicted_page))
    }
}

/// The optional CLOCK-2-hand variant: a `use` hand decays reference bits
/// as it advances, an `evict` hand looks for the first clear bit. Same
/// asymptotic correctness as the LRU policies, a cheaper, approximate
/// recency signal.
pub struct ClockPolicy {
    slot_key: Vec<Option<usize>>,
    ref_bits: Vec<bool>,
    map: HashMap<usize, usize>,
    use_hand: usize,
    evict_hand: usize,
}

impl ClockPolicy {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "clock policy needs at least one slot");
        Self {
            slot_key: vec![None; capacity],
            ref_bits: vec![false; capacity],
            map: HashMap::with_capacity(capacity),
            use_hand: 0,
            evict_hand: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slot_key.len()
    }

    fn lookup(&mut self, page: usize) -> Option<usize> {
        let slot = *self.map.get(&page)?;
        self.ref_bits[slot] = true;
        Some(slot)
    }

    fn insert(&mut self, page: usize) -> (usize, Option<usize>) {
        let capacity = self.capacity();

        // Use hand: decay one slot's reference bit per insertion.
        self.ref_bits[self.use_hand] = false;
        self.use_hand = (self.use_hand + 1) % capacity;

        // Evict hand: first clear bit is the victim; anything referenced
        // gets a second chance and its bit cleared as the hand passes.
        let victim = loop {
            if !self.ref_bits[self.evict_hand] {
                let victim = self.evict_hand;
                self.evict_hand = (self.evict_hand + 1) % capacity;
                break victim;
            }
            self.ref_bits[self.evict_hand] = false;
            self.evict_hand = (self.evict_hand + 1) % capacity;
        };

        let evicted = self.slot_key[victim].take();
        if let Some(old_page) = evicted {
            self.map.remove(&old_page);
        }
        self.slot_key[victim] = Some(page);
        self.ref_bits[victim] = true;
        self.map.insert(page, victim);
        (victim, evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, "direct")]
    #[case(2, "small_array")]
    #[case(12, "small_array")]
    #[case(13, "scalable")]
    #[case(50, "scalable")]
    fn for_active_pages_picks_the_documented_threshold(#[case] active_pages: usize, #[case] want: &str) {
        let policy = EvictionPolicy::for_active_pages(active_pages);
        let got = match policy {
            EvictionPolicy::Direct(_) => "direct",
            EvictionPolicy::SmallArray(_) => "small_array",
            EvictionPolicy::Scalable(_) => "scalable",
            EvictionPolicy::Clock(_) => "clock",
        };
        assert_eq!(got, want);
    }

    #[test]
    fn direct_policy_evicts_previous_occupant() {
        let mut p = DirectPolicy::new();
        assert_eq!(p.lookup(1), None);
        let (slot, evicted) = p.insert(1);
        assert_eq!((slot, evicted), (0, None));
        assert_eq!(p.lookup(1), Some(0));
        let (slot, evicted) = p.insert(2);
        assert_eq!((slot, evicted), (0, Some(1)));
    }

    #[test]
    fn small_array_policy_fills_before_evicting() {
        let mut p = SmallArrayPolicy::new(3);
        let (s0, e0) = p.insert(10);
        let (s1, e1) = p.insert(20);
        let (s2, e2) = p.insert(30);
        assert_eq!([e0, e1, e2], [None, None, None]);
        assert_ne!(s0, s1);
        assert_ne!(s1, s2);

        // touch 10 so it is no longer the LRU entry
        p.lookup(10).unwrap();
        let (_slot, evicted) = p.insert(40);
        assert_eq!(evicted, Some(20));
    }

    #[test]
    fn small_array_policy_hit_returns_same_slot() {
        let mut p = SmallArrayPolicy::new(4);
        let (slot, _) = p.insert(7);
        assert_eq!(p.lookup(7), Some(slot));
    }

    #[test]
    fn scalable_policy_evicts_least_recently_used() {
        let mut p = ScalablePolicy::new(2);
        p.insert(1);
        p.insert(2);
        // access 1 so 2 becomes LRU
        p.lookup(1).unwrap();
        let (_slot, evicted) = p.insert(3);
        assert_eq!(evicted, Some(2));
    }

    #[test]
    fn clock_policy_spares_referenced_slots() {
        let mut p = ClockPolicy::new(3);
        p.insert(1);
        p.insert(2);
        p.insert(3);
        // re-reference 1 and 2 so the clock hand must pass them twice
        p.lookup(1).unwrap();
        p.lookup(2).unwrap();
        let (_slot, evicted) = p.insert(4);
        assert_eq!(evicted, Some(3));
    }
}
