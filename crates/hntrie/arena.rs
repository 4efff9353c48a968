use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::TrieError;

/// Maximum needle length in bytes. Longer hostnames keep their first 254 bytes.
pub(crate) const NEEDLE_CAP: usize = 254;
/// Byte slot holding the current needle length.
pub(crate) const NEEDLE_LEN_AT: usize = 255;

// Header slots, as word indices into the buffer.
const TRIE0_SLOT: u32 = 64;
const TRIE1_SLOT: u32 = 65;
pub(crate) const CHAR0_SLOT: u32 = 66;
const CHAR1_SLOT: u32 = 67;

/// Byte offset of the first cell, right past the header.
pub(crate) const TRIE0: u32 = 272;
/// Word index of the first cell.
pub(crate) const ICELL0: u32 = TRIE0 / 4;
/// A cell is three 32-bit words: down link, right link, segment descriptor.
pub(crate) const CELL_BYTES: u32 = 12;
const CELL_WORDS: u32 = 3;

/// Buffers grow in whole 64 KiB pages.
const PAGE_SIZE: usize = 65536;
const DEFAULT_BYTE_LEN: usize = 131072;
const DEFAULT_CHAR0: usize = 65536;
/// Free bytes required past CHAR1 before an insertion may run: one segment
/// can be at most `NEEDLE_CAP` bytes long.
const TAIL_RESERVE: usize = 256;
/// Free bytes required between TRIE1 and CHAR0 before an insertion may run:
/// a single insertion appends at most two cells.
const CELL_HEADROOM: usize = 24;

const fn round_up(v: usize, align: usize) -> usize {
    (v + align - 1) & !(align - 1)
}

/// The linear buffer every trie in a container lives in.
///
/// The buffer is addressable both byte-wise and as little-endian 32-bit
/// words, and is partitioned into fixed regions:
///
/// ```text
/// [0 .. 255)     needle scratch for the current query/insert hostname
/// [255]          needle length
/// [256 .. 272)   header: TRIE0, TRIE1, CHAR0, CHAR1 slots
/// [272 .. TRIE1) trie cells, growing upward
/// [CHAR0..CHAR1) segment pool, growing upward
/// [CHAR1 .. end) free tail
/// ```
///
/// Cells reference each other by word index only, so the whole buffer is
/// relocatable and is its own serialised form.
pub(crate) struct Arena {
    buf: Vec<u8>,
    /// Construction-only map from forward-order segment bytes to their packed
    /// descriptor. Dropped at optimize time, never serialised.
    dedup: FxHashMap<Box<[u8]>, u32>,
}

impl Arena {
    pub(crate) fn new() -> Self {
        Self::with_layout(DEFAULT_BYTE_LEN, DEFAULT_CHAR0)
    }

    /// Creates an arena with an explicit initial byte length and segment pool
    /// start. Both are normalized so the region invariants hold from the
    /// start.
    pub(crate) fn with_layout(byte_len: usize, char0: usize) -> Self {
        let char0 = round_up(char0.max(TRIE0 as usize + CELL_HEADROOM), 4);
        let byte_len = byte_len.max(char0 + TAIL_RESERVE);
        let mut arena = Self {
            buf: vec![0u8; byte_len],
            dedup: FxHashMap::default(),
        };
        arena.set_word(TRIE0_SLOT, TRIE0);
        arena.set_word(TRIE1_SLOT, TRIE0);
        arena.set_word(CHAR0_SLOT, char0 as u32);
        arena.set_word(CHAR1_SLOT, char0 as u32);
        arena
    }

    /// Adopts a serialised buffer, validating the header and every cell
    /// before trusting it. Cells are densely packed so a linear scan covers
    /// all of them, reachable or not.
    pub(crate) fn adopt(buf: Vec<u8>) -> Result<Self, TrieError> {
        if buf.len() < TRIE0 as usize {
            return Err(TrieError::SnapshotTooShort(buf.len()));
        }
        let arena = Self {
            buf,
            dedup: FxHashMap::default(),
        };
        if arena.word(TRIE0_SLOT) != TRIE0 {
            return Err(TrieError::CorruptHeader("TRIE0 slot"));
        }
        let trie1 = arena.trie1();
        let char0 = arena.char0();
        let char1 = arena.char1();
        if trie1 < TRIE0 || (trie1 - TRIE0) % CELL_BYTES != 0 {
            return Err(TrieError::CorruptHeader("cell region size"));
        }
        if trie1 > char0 || char0 > char1 || char1 as usize > arena.buf.len() {
            return Err(TrieError::CorruptHeader("region ordering"));
        }
        let pool_len = char1 - char0;
        if pool_len > 0x00FF_FFFF {
            return Err(TrieError::CorruptHeader("segment pool size"));
        }
        let icell1 = trie1 / 4;
        let valid_link = |link: u32| {
            link == 0 || (link >= ICELL0 && link < icell1 && (link - ICELL0) % CELL_WORDS == 0)
        };
        let mut icell = ICELL0;
        while icell < icell1 {
            if !valid_link(arena.word(icell)) || !valid_link(arena.word(icell + 1)) {
                return Err(TrieError::DanglingCell { cell: icell });
            }
            let seg = arena.word(icell + 2);
            if (seg >> 24) + (seg & 0x00FF_FFFF) > pool_len {
                return Err(TrieError::DanglingSegment { cell: icell });
            }
            icell += CELL_WORDS;
        }
        Ok(arena)
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.buf.len()
    }

    fn word(&self, iword: u32) -> u32 {
        let at = iword as usize * 4;
        u32::from_le_bytes([
            self.buf[at],
            self.buf[at + 1],
            self.buf[at + 2],
            self.buf[at + 3],
        ])
    }

    fn set_word(&mut self, iword: u32, v: u32) {
        let at = iword as usize * 4;
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn trie1(&self) -> u32 {
        self.word(TRIE1_SLOT)
    }

    pub(crate) fn char0(&self) -> u32 {
        self.word(CHAR0_SLOT)
    }

    pub(crate) fn char1(&self) -> u32 {
        self.word(CHAR1_SLOT)
    }

    pub(crate) fn cell_count(&self) -> usize {
        ((self.trie1() - TRIE0) / CELL_BYTES) as usize
    }

    // --- needle scratch -----------------------------------------------------

    pub(crate) fn set_needle(&mut self, needle: &[u8]) {
        let len = needle.len().min(NEEDLE_CAP);
        self.buf[..len].copy_from_slice(&needle[..len]);
        self.buf[NEEDLE_LEN_AT] = len as u8;
    }

    pub(crate) fn needle_len(&self) -> usize {
        self.buf[NEEDLE_LEN_AT] as usize
    }

    pub(crate) fn needle_byte(&self, i: usize) -> u8 {
        self.buf[i]
    }

    fn clear_needle(&mut self) {
        self.buf[..=NEEDLE_LEN_AT].fill(0);
    }

    // --- cells --------------------------------------------------------------

    /// Appends a 12-byte cell at TRIE1 and returns its word index. The
    /// caller is responsible for having run [`Arena::ensure_headroom`]
    /// first.
    pub(crate) fn alloc_cell(&mut self, down: u32, right: u32, seg: u32) -> u32 {
        let trie1 = self.trie1();
        let icell = trie1 / 4;
        self.set_word(icell, down);
        self.set_word(icell + 1, right);
        self.set_word(icell + 2, seg);
        self.set_word(TRIE1_SLOT, trie1 + CELL_BYTES);
        icell
    }

    pub(crate) fn cell_down(&self, icell: u32) -> u32 {
        self.word(icell)
    }

    pub(crate) fn cell_right(&self, icell: u32) -> u32 {
        self.word(icell + 1)
    }

    pub(crate) fn cell_seg(&self, icell: u32) -> u32 {
        self.word(icell + 2)
    }

    pub(crate) fn set_cell_down(&mut self, icell: u32, down: u32) {
        self.set_word(icell, down);
    }

    pub(crate) fn set_cell_right(&mut self, icell: u32, right: u32) {
        self.set_word(icell + 1, right);
    }

    pub(crate) fn set_cell_seg(&mut self, icell: u32, seg: u32) {
        self.set_word(icell + 2, seg);
    }

    /// First pool byte of a cell's segment.
    pub(crate) fn seg_byte(&self, seg: u32, i: usize) -> u8 {
        self.buf[self.char0() as usize + (seg & 0x00FF_FFFF) as usize + i]
    }

    // --- segment pool -------------------------------------------------------

    /// Takes the first `len` bytes of the needle, stores them in the pool in
    /// reverse order and returns the packed `(len << 24) | off` descriptor.
    /// Identical segments are deduplicated against the transient map while it
    /// is alive; reuse is a size optimisation only.
    pub(crate) fn alloc_segment(&mut self, len: usize) -> u32 {
        if len == 0 {
            return 0;
        }
        debug_assert!(len <= NEEDLE_CAP);
        let key: Box<[u8]> = self.buf[..len].into();
        if let Some(&seg) = self.dedup.get(&key) {
            return seg;
        }
        let char1 = self.char1() as usize;
        let off = char1 - self.char0() as usize;
        debug_assert!(off + len <= 0x00FF_FFFF, "segment pool exceeds 24-bit offsets");
        for i in 0..len {
            self.buf[char1 + i] = key[len - 1 - i];
        }
        self.set_word(CHAR1_SLOT, (char1 + len) as u32);
        let seg = ((len as u32) << 24) | off as u32;
        self.dedup.insert(key, seg);
        seg
    }

    fn drop_dedup(&mut self) {
        self.dedup = FxHashMap::default();
    }

    // --- growth and compaction ----------------------------------------------

    /// Re-establishes the free-space invariants before a mutation: at least
    /// `CELL_HEADROOM` bytes between TRIE1 and CHAR0, and `TAIL_RESERVE`
    /// bytes past CHAR1.
    pub(crate) fn ensure_headroom(&mut self) {
        let trie1 = self.trie1();
        let char0 = self.char0();
        let char1 = self.char1() as usize;
        if (char0 - trie1) as usize >= CELL_HEADROOM && self.buf.len() - char1 >= TAIL_RESERVE {
            return;
        }
        self.grow_buf();
    }

    /// Enlarges the buffer in whole 64 KiB pages. The cell region stays at
    /// its offsets; only the segment pool is moved to the new CHAR0.
    fn grow_buf(&mut self) {
        let trie1 = self.trie1() as usize;
        let char0 = self.char0() as usize;
        let char1 = self.char1() as usize;
        let new_char0 = round_up(trie1 + CELL_HEADROOM, PAGE_SIZE).max(char0);
        let new_char1 = new_char0 + (char1 - char0);
        let new_len = round_up(new_char1 + TAIL_RESERVE, PAGE_SIZE).max(self.buf.len());
        debug!(
            old_len = self.buf.len(),
            new_len, old_char0 = char0, new_char0, "growing trie buffer"
        );
        self.buf.resize(new_len, 0);
        if new_char0 != char0 {
            self.buf.copy_within(char0..char1, new_char0);
            self.buf[char0..new_char0].fill(0);
        }
        self.set_word(CHAR0_SLOT, new_char0 as u32);
        self.set_word(CHAR1_SLOT, new_char1 as u32);
    }

    /// Compacts the buffer: the pool is moved right behind the cell region
    /// with 4-byte alignment and only the 256-byte tail reserve is kept.
    fn shrink_buf(&mut self) {
        let trie1 = self.trie1() as usize;
        let char0 = self.char0() as usize;
        let char1 = self.char1() as usize;
        let new_char0 = round_up(trie1 + CELL_HEADROOM, 4);
        let new_char1 = new_char0 + (char1 - char0);
        let new_len = round_up(new_char1 + TAIL_RESERVE, 4);
        debug!(
            old_len = self.buf.len(),
            new_len, old_char0 = char0, new_char0, "compacting trie buffer"
        );
        if new_char0 < char0 {
            self.buf.copy_within(char0..char1, new_char0);
        }
        self.buf.resize(new_len, 0);
        self.buf[trie1..new_char0].fill(0);
        self.buf[new_char1..].fill(0);
        self.set_word(CHAR0_SLOT, new_char0 as u32);
        self.set_word(CHAR1_SLOT, new_char1 as u32);
        self.buf.shrink_to_fit();
    }

    /// Finalizes construction: drops the dedup map, clears the needle
    /// scratch and compacts the buffer.
    pub(crate) fn optimize(&mut self) {
        self.drop_dedup();
        self.clear_needle();
        self.shrink_buf();
    }

    /// Rewinds both regions without releasing the buffer. Stale cell and
    /// pool bytes are left behind; they are unreachable because allocation
    /// always rewrites them before linking.
    pub(crate) fn reset(&mut self) {
        let char0 = self.char0();
        self.set_word(TRIE1_SLOT, TRIE0);
        self.set_word(CHAR1_SLOT, char0);
        self.buf[NEEDLE_LEN_AT] = 0;
        self.dedup.clear();
    }
}
