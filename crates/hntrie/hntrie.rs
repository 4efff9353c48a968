mod arena;
pub mod error;
mod matcher;
mod trie_iter;

use bytes::Bytes;
use tracing::debug;

use crate::arena::Arena;
use crate::matcher::MatchFn;

pub use crate::error::TrieError;
pub use crate::matcher::MatcherBackend;
pub use crate::trie_iter::TrieIterator;

/// Reference to one trie inside a container: the word index of its root
/// cell, plus the number of hostnames inserted through this reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrieRef {
    iroot: u32,
    size: u32,
}

impl TrieRef {
    /// Number of hostnames added through this reference.
    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub(crate) fn iroot(&self) -> u32 {
        self.iroot
    }
}

/// Buffer geometry reported by [`TrieContainer::optimize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrieLayout {
    pub byte_length: usize,
    pub char0: usize,
}

/// Point-in-time container statistics, mostly for tooling.
#[derive(Clone, Copy, Debug, serde::Serialize)]
pub struct TrieUsage {
    pub byte_length: usize,
    pub cells: usize,
    pub cell_bytes: usize,
    pub pool_bytes: usize,
    pub backend: &'static str,
}

/// A set of hostnames packed into one relocatable byte buffer.
///
/// What makes this compact is that:
/// 1. Trie cells are fixed 12-byte records in a single arena, linked by word
///    index instead of by pointer.
/// 2. Hostname characters are stored once in a shared pool, reversed, so
///    matching scans the pool forward while walking the needle backward.
/// 3. The buffer is its own serialised form: all offsets are self-relative,
///    so a snapshot can be stored and adopted verbatim, without fix-ups.
///
/// Matching is hostname-aware: a stored hostname matches a needle equal to
/// it or any of its subdomains, never a partial label. Several independent
/// tries may share one container (and its segment pool); they are addressed
/// by the [`TrieRef`] returned from [`TrieContainer::create_trie`].
///
/// The container is single-threaded: insertions, resizes and backend swaps
/// must not overlap with queries.
pub struct TrieContainer {
    arena: Arena,
    backend: MatcherBackend,
    match_fn: MatchFn,
}

impl TrieContainer {
    pub fn new() -> Self {
        Self::from_arena(Arena::new())
    }

    /// Creates a container with an explicit initial buffer length and
    /// segment pool start. Both are normalized upward if too small.
    pub fn with_layout(byte_length: usize, char0: usize) -> Self {
        Self::from_arena(Arena::with_layout(byte_length, char0))
    }

    /// Adopts a serialised buffer without re-insertion. The header and every
    /// cell are validated before the buffer is trusted.
    pub fn from_snapshot(snapshot: &[u8]) -> Result<Self, TrieError> {
        Ok(Self::from_arena(Arena::adopt(snapshot.to_vec())?))
    }

    fn from_arena(arena: Arena) -> Self {
        let backend = MatcherBackend::select();
        Self {
            arena,
            backend,
            match_fn: backend.resolve(),
        }
    }

    /// Swaps the matcher backend. On hosts that cannot run the requested
    /// backend the scalar interpreter is used instead.
    pub fn set_backend(&mut self, backend: MatcherBackend) {
        debug!(backend = backend.name(), "matcher backend selected");
        self.backend = backend;
        self.match_fn = backend.resolve();
    }

    pub fn backend(&self) -> MatcherBackend {
        self.backend
    }

    /// Allocates a fresh trie root. Tries created from the same container
    /// share its buffer and segment pool, but not their cells.
    pub fn create_trie(&mut self) -> TrieRef {
        self.arena.ensure_headroom();
        let iroot = self.arena.alloc_cell(0, 0, 0);
        TrieRef { iroot, size: 0 }
    }

    /// Reference to the first trie allocated in this container. This is how
    /// a snapshot holding a single trie (the common case) is re-entered; its
    /// `size` is not recorded in the buffer and reads as 0.
    pub fn first_trie(&self) -> TrieRef {
        TrieRef {
            iroot: arena::ICELL0,
            size: 0,
        }
    }

    /// Allocates a trie and bulk-inserts every hostname of `hostnames`.
    pub fn trie_from_iter<I, S>(&mut self, hostnames: I) -> TrieRef
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut trie = self.create_trie();
        for hostname in hostnames {
            self.set_needle(hostname.as_ref());
            self.add(&mut trie);
        }
        trie
    }

    /// Copies `needle` into the scratch region at the head of the buffer.
    /// Needles longer than 254 bytes keep their first 254 bytes.
    pub fn set_needle(&mut self, needle: &[u8]) -> &mut Self {
        self.arena.set_needle(needle);
        self
    }

    /// Inserts the current needle into `trie`. Returns false when the
    /// hostname was already stored (or the needle is empty); re-adding never
    /// changes the buffer.
    pub fn add(&mut self, trie: &mut TrieRef) -> bool {
        let added = self.insert_needle(trie.iroot);
        if added {
            trie.size += 1;
        }
        added
    }

    /// Matches the current needle against `trie`. Returns the needle offset
    /// where the matched stored hostname begins: 0 for an exact match, the
    /// position right after a `.` for a subdomain match, `None` for a miss.
    pub fn matches(&self, trie: TrieRef) -> Option<usize> {
        let unconsumed = (self.match_fn)(self.arena.bytes(), trie.iroot);
        usize::try_from(unconsumed).ok()
    }

    /// Sets the needle and inserts it in one call.
    pub fn add_hostname(&mut self, trie: &mut TrieRef, hostname: &str) -> bool {
        self.set_needle(hostname.as_bytes());
        self.add(trie)
    }

    /// Sets the needle and matches it in one call.
    pub fn matches_hostname(&mut self, trie: TrieRef, hostname: &str) -> Option<usize> {
        self.set_needle(hostname.as_bytes());
        self.matches(trie)
    }

    /// Iterates every hostname stored in `trie`, each exactly once.
    pub fn iter(&self, trie: TrieRef) -> TrieIterator<'_> {
        TrieIterator::new(self, trie.iroot)
    }

    /// Compacts the buffer and drops construction-only state. Insertion
    /// remains possible afterwards, the buffer simply regrows.
    pub fn optimize(&mut self) -> TrieLayout {
        self.arena.optimize();
        let layout = TrieLayout {
            byte_length: self.arena.byte_len(),
            char0: self.arena.char0() as usize,
        };
        debug!(
            byte_length = layout.byte_length,
            char0 = layout.char0,
            "container optimized"
        );
        layout
    }

    /// Clears all tries without releasing the buffer. Previously returned
    /// [`TrieRef`]s must not be used afterwards.
    pub fn reset(&mut self) {
        self.arena.reset();
    }

    /// Compacts the container and returns the buffer byte-for-byte. The
    /// result can be stored anywhere and adopted back with
    /// [`TrieContainer::from_snapshot`].
    pub fn snapshot(&mut self) -> Bytes {
        self.optimize();
        Bytes::copy_from_slice(self.arena.bytes())
    }

    /// The raw buffer, in its current (possibly uncompacted) state.
    pub fn as_bytes(&self) -> &[u8] {
        self.arena.bytes()
    }

    pub fn usage(&self) -> TrieUsage {
        TrieUsage {
            byte_length: self.arena.byte_len(),
            cells: self.arena.cell_count(),
            cell_bytes: self.arena.cell_count() * 12,
            pool_bytes: (self.arena.char1() - self.arena.char0()) as usize,
            backend: self.backend.name(),
        }
    }

    /// Radix insert of the current needle, consumed right to left.
    fn insert_needle(&mut self, iroot: u32) -> bool {
        let mut k = self.arena.needle_len();
        if k == 0 {
            return false;
        }
        self.arena.ensure_headroom();
        // An empty root takes the whole needle as its first segment.
        if self.arena.cell_seg(iroot) == 0 && self.arena.cell_right(iroot) == 0 {
            let seg = self.arena.alloc_segment(k);
            self.arena.set_cell_seg(iroot, seg);
            return true;
        }
        let mut icell = iroot;
        loop {
            let v = self.arena.cell_seg(icell);
            if v == 0 {
                // Boundary cells are transparent on the way down.
                icell = self.arena.cell_right(icell);
                continue;
            }
            let len = (v >> 24) as usize;
            let off = v & 0x00FF_FFFF;
            // Longest shared prefix between the segment and the needle tail.
            let mut m = 0;
            while m < len.min(k) && self.arena.seg_byte(v, m) == self.arena.needle_byte(k - 1 - m) {
                m += 1;
            }
            if m == 0 {
                // First byte differs: try the next descendant, or attach one.
                let down = self.arena.cell_down(icell);
                if down != 0 {
                    icell = down;
                    continue;
                }
                let seg = self.arena.alloc_segment(k);
                let fresh = self.arena.alloc_cell(0, 0, seg);
                self.arena.set_cell_down(icell, fresh);
                return true;
            }
            if m == len {
                // Whole segment matched.
                k -= m;
                let right = self.arena.cell_right(icell);
                if k == 0 {
                    if right == 0 || self.arena.cell_seg(right) == 0 {
                        return false;
                    }
                    let boundary = self.arena.alloc_cell(0, right, 0);
                    self.arena.set_cell_right(icell, boundary);
                    return true;
                }
                if right != 0 {
                    icell = right;
                    continue;
                }
                // The branch used to end here: keep that hostname stored
                // with a boundary cell, then chain the rest of the needle.
                let boundary = self.arena.alloc_cell(0, 0, 0);
                self.arena.set_cell_right(icell, boundary);
                let seg = self.arena.alloc_segment(k);
                let tail = self.arena.alloc_cell(0, 0, seg);
                self.arena.set_cell_right(boundary, tail);
                return true;
            }
            // Partial match: split the cell. The tail reuses the same pool
            // bytes at an advanced offset.
            let tail = self.arena.alloc_cell(
                0,
                self.arena.cell_right(icell),
                (((len - m) as u32) << 24) | (off + m as u32),
            );
            self.arena.set_cell_seg(icell, ((m as u32) << 24) | off);
            self.arena.set_cell_right(icell, tail);
            k -= m;
            if k == 0 {
                let boundary = self.arena.alloc_cell(0, tail, 0);
                self.arena.set_cell_right(icell, boundary);
            } else {
                let seg = self.arena.alloc_segment(k);
                let fork = self.arena.alloc_cell(0, 0, seg);
                self.arena.set_cell_down(tail, fork);
            }
            return true;
        }
    }

    pub(crate) fn arena(&self) -> &Arena {
        &self.arena
    }
}

impl Default for TrieContainer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::collection::{btree_set, vec};
    use proptest::prelude::*;

    fn build(hostnames: &[&str]) -> (TrieContainer, TrieRef) {
        let mut container = TrieContainer::new();
        let mut trie = container.create_trie();
        for h in hostnames {
            assert!(container.add_hostname(&mut trie, h), "first add of {h}");
        }
        (container, trie)
    }

    #[test]
    fn single_hostname() {
        let (mut c, t) = build(&["example.com"]);
        assert_eq!(c.matches_hostname(t, "example.com"), Some(0));
        assert_eq!(c.matches_hostname(t, "foo.example.com"), Some(4));
        assert_eq!(c.matches_hostname(t, "notexample.com"), None);
        assert_eq!(c.matches_hostname(t, "example.co"), None);
        assert_eq!(c.matches_hostname(t, "example.com.evil"), None);
        assert_eq!(c.matches_hostname(t, ""), None);
    }

    #[test]
    fn nested_hostnames() {
        let (mut c, t) = build(&["example.com", "sub.example.com"]);
        // The match offset reports the shortest stored suffix: for needles
        // below sub.example.com the example.com boundary is reached first.
        assert_eq!(c.matches_hostname(t, "sub.example.com"), Some(4));
        assert_eq!(c.matches_hostname(t, "x.sub.example.com"), Some(6));
        assert_eq!(c.matches_hostname(t, "other.example.com"), Some(6));
        assert_eq!(c.matches_hostname(t, "example.com"), Some(0));
        assert_eq!(c.matches_hostname(t, "ub.example.com"), Some(3));
    }

    #[test]
    fn exact_only_when_shorter_is_absent() {
        // With only the longer hostname stored, the shorter must miss.
        let (mut c, t) = build(&["sub.example.com"]);
        assert_eq!(c.matches_hostname(t, "example.com"), None);
        assert_eq!(c.matches_hostname(t, "sub.example.com"), Some(0));
        assert_eq!(c.matches_hostname(t, "a.sub.example.com"), Some(2));
    }

    #[test]
    fn shared_suffix_fork() {
        let (mut c, t) = build(&["a.b.c", "b.c"]);
        assert_eq!(c.matches_hostname(t, "z.b.c"), Some(2));
        assert_eq!(c.matches_hostname(t, "a.b.c"), Some(2));
        assert_eq!(c.matches_hostname(t, "x.a.b.c"), Some(4));
        assert_eq!(c.matches_hostname(t, "b.c"), Some(0));
        assert_eq!(c.matches_hostname(t, "c"), None);
    }

    #[test]
    fn add_is_idempotent() {
        let mut c = TrieContainer::new();
        let mut t = c.create_trie();
        assert!(c.add_hostname(&mut t, "ads.example.com"));
        let cells = c.usage().cells;
        let pool = c.usage().pool_bytes;
        assert!(!c.add_hostname(&mut t, "ads.example.com"));
        assert_eq!(c.usage().cells, cells);
        assert_eq!(c.usage().pool_bytes, pool);
        assert_eq!(t.size(), 1);
        let stored: Vec<String> = c.iter(t).collect();
        assert_eq!(stored, vec!["ads.example.com".to_string()]);
    }

    #[test]
    fn empty_needle_is_a_noop() {
        let mut c = TrieContainer::new();
        let mut t = c.create_trie();
        c.set_needle(b"");
        assert!(!c.add(&mut t));
        assert_eq!(c.matches(t), None);
        assert_eq!(c.usage().cells, 1);
    }

    #[test]
    fn long_needles_are_truncated() {
        let mut c = TrieContainer::new();
        let mut t = c.create_trie();
        let long = "a".repeat(300);
        assert!(c.add_hostname(&mut t, &long));
        let kept = "a".repeat(254);
        assert_eq!(c.matches_hostname(t, &kept), Some(0));
    }

    #[test]
    fn independent_tries_share_a_container() {
        let mut c = TrieContainer::new();
        let mut ads = c.create_trie();
        let mut trackers = c.create_trie();
        c.add_hostname(&mut ads, "ads.example.com");
        c.add_hostname(&mut trackers, "tracker.example.net");
        assert_eq!(c.matches_hostname(ads, "ads.example.com"), Some(0));
        assert_eq!(c.matches_hostname(ads, "tracker.example.net"), None);
        assert_eq!(c.matches_hostname(trackers, "tracker.example.net"), Some(0));
        assert_eq!(c.matches_hostname(trackers, "ads.example.com"), None);
    }

    #[test]
    fn reset_clears_tries_but_keeps_the_buffer() {
        let mut c = TrieContainer::new();
        let mut t = c.create_trie();
        c.add_hostname(&mut t, "example.com");
        let len = c.usage().byte_length;
        c.reset();
        let mut t2 = c.create_trie();
        assert_eq!(c.matches_hostname(t2, "example.com"), None);
        assert!(c.add_hostname(&mut t2, "example.org"));
        assert_eq!(c.matches_hostname(t2, "example.org"), Some(0));
        assert_eq!(c.usage().byte_length, len);
    }

    #[test]
    fn optimize_preserves_matches() {
        let hostnames = ["example.com", "sub.example.com", "ads.net", "a.b.c"];
        let (mut c, t) = build(&hostnames);
        let layout = c.optimize();
        assert!(layout.byte_length < 131072);
        assert_eq!(layout.char0 % 4, 0);
        for h in hostnames {
            assert!(c.matches_hostname(t, h).is_some(), "{h} lost by optimize");
        }
        assert_eq!(c.matches_hostname(t, "miss.example.org"), None);
        // Insertion keeps working after compaction.
        let mut t2 = t;
        assert!(c.add_hostname(&mut t2, "fresh.example.org"));
        assert_eq!(c.matches_hostname(t2, "fresh.example.org"), Some(0));
    }

    #[test]
    fn snapshot_round_trip() {
        let mut c = TrieContainer::new();
        let mut t = c.create_trie();
        c.add_hostname(&mut t, "example.com");
        let snapshot = c.snapshot();
        let mut restored = TrieContainer::from_snapshot(&snapshot).expect("valid snapshot");
        assert_eq!(restored.matches_hostname(t, "foo.example.com"), Some(4));
        assert_eq!(restored.matches_hostname(t, "example.org"), None);
    }

    #[test]
    fn usage_serializes_for_tooling() {
        let (c, _t) = build(&["example.com"]);
        let usage = c.usage();
        let json = serde_json::to_value(usage).expect("usage serializes");
        assert_eq!(json["cells"], 1);
        assert_eq!(json["pool_bytes"], 11);
        assert!(json["backend"].is_string());
    }

    #[test]
    fn scalar_backend_can_be_forced() {
        let (mut c, t) = build(&["example.com"]);
        c.set_backend(MatcherBackend::Scalar);
        assert_eq!(c.backend(), MatcherBackend::Scalar);
        assert_eq!(c.matches_hostname(t, "a.example.com"), Some(2));
    }

    // Reference predicate for the hostname-matching contract.
    fn reference_matches(set: &std::collections::BTreeSet<String>, q: &str) -> bool {
        set.iter().any(|h| {
            q == h
                || (q.len() > h.len()
                    && q.ends_with(h.as_str())
                    && q.as_bytes()[q.len() - h.len() - 1] == b'.')
        })
    }

    fn hostname_strategy() -> impl Strategy<Value = String> {
        vec("[a-d]{1,3}", 1..4).prop_map(|labels| labels.join("."))
    }

    proptest! {
        #[test]
        fn proptest_matches_reference_model(
            set in btree_set(hostname_strategy(), 1..40),
            queries in vec(hostname_strategy(), 1..40),
        ) {
            let mut c = TrieContainer::new();
            let t = c.trie_from_iter(set.iter());
            for q in queries {
                let got = c.matches_hostname(t, &q);
                prop_assert_eq!(
                    got.is_some(),
                    reference_matches(&set, &q),
                    "query {}", q
                );
                if let Some(k) = got {
                    // The reported offset always points at a stored suffix
                    // on a label boundary.
                    prop_assert!(set.contains(&q[k..]));
                    prop_assert!(k == 0 || q.as_bytes()[k - 1] == b'.');
                }
            }
        }

        #[test]
        fn proptest_insertion_order_is_irrelevant(
            set in btree_set(hostname_strategy(), 1..30),
            queries in vec(hostname_strategy(), 1..30),
        ) {
            let forward: Vec<&String> = set.iter().collect();
            let backward: Vec<&String> = set.iter().rev().collect();
            let mut c1 = TrieContainer::new();
            let t1 = c1.trie_from_iter(forward);
            let mut c2 = TrieContainer::new();
            let t2 = c2.trie_from_iter(backward);
            for q in queries {
                prop_assert_eq!(
                    c1.matches_hostname(t1, &q).is_some(),
                    c2.matches_hostname(t2, &q).is_some(),
                    "query {}", q
                );
            }
        }

        #[test]
        fn proptest_add_reports_membership(set in btree_set(hostname_strategy(), 1..30)) {
            let mut c = TrieContainer::new();
            let mut t = c.create_trie();
            for h in &set {
                prop_assert!(c.add_hostname(&mut t, h));
            }
            for h in &set {
                prop_assert!(!c.add_hostname(&mut t, h));
            }
            prop_assert_eq!(t.size(), set.len());
        }
    }
}
