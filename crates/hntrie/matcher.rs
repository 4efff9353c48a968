//! The two interchangeable matcher backends.
//!
//! Both walk the same byte image with the same algorithm: consume the needle
//! right to left, pick the descendant whose segment starts with the wanted
//! byte, and report a match whenever a stored hostname terminates at a label
//! boundary of the needle. The returned value is the needle offset where the
//! matched hostname begins (0 for an exact match), or -1 for a miss. When
//! several stored hostnames are suffixes of the needle, the first boundary
//! reached wins, which is the shortest stored suffix.

use tracing::debug;

use crate::arena::{CHAR0_SLOT, NEEDLE_LEN_AT};

/// Signature shared by both backends: the whole buffer plus the word index
/// of the root cell.
pub(crate) type MatchFn = fn(&[u8], u32) -> i32;

/// Which implementation answers `matches` calls for a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatcherBackend {
    /// Portable bounds-checked interpreter.
    Scalar,
    /// Unchecked word walker, available on little-endian hosts only.
    Unchecked,
}

impl MatcherBackend {
    /// Picks the accelerated backend when the host can run it. Not being
    /// able to is not an error: the scalar interpreter is always available.
    pub(crate) fn select() -> Self {
        if cfg!(target_endian = "little") {
            MatcherBackend::Unchecked
        } else {
            debug!("big-endian host, unchecked matcher disabled");
            MatcherBackend::Scalar
        }
    }

    pub(crate) fn resolve(self) -> MatchFn {
        match self {
            MatcherBackend::Scalar => matches_scalar,
            #[cfg(target_endian = "little")]
            MatcherBackend::Unchecked => matches_unchecked,
            // Requesting the unchecked backend on a big-endian host falls
            // back to the scalar interpreter.
            #[cfg(not(target_endian = "little"))]
            MatcherBackend::Unchecked => matches_scalar,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            MatcherBackend::Scalar => "scalar",
            MatcherBackend::Unchecked => "unchecked",
        }
    }
}

fn word(buf: &[u8], iword: u32) -> u32 {
    let at = iword as usize * 4;
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn matches_scalar(buf: &[u8], iroot: u32) -> i32 {
    let char0 = word(buf, CHAR0_SLOT) as usize;
    let mut k = buf[NEEDLE_LEN_AT] as usize;
    let mut icell = iroot;
    loop {
        if k == 0 {
            return -1;
        }
        let b = buf[k - 1];
        // Walk the down chain until a segment starts with the wanted byte.
        // A zero descriptor can only be the root of an empty trie here,
        // boundary cells never sit in a down chain.
        let mut v;
        loop {
            v = word(buf, icell + 2);
            if v != 0 && buf[char0 + (v & 0x00FF_FFFF) as usize] == b {
                break;
            }
            icell = word(buf, icell);
            if icell == 0 {
                return -1;
            }
        }
        // The rest of the segment must match too, still right to left.
        let len = (v >> 24) as usize;
        if len > k {
            return -1;
        }
        let p = char0 + (v & 0x00FF_FFFF) as usize;
        for i in 1..len {
            if buf[p + i] != buf[k - 1 - i] {
                return -1;
            }
        }
        k -= len;
        icell = word(buf, icell + 1);
        if icell == 0 {
            // The branch ended, so a stored hostname terminates here.
            return if k == 0 || buf[k - 1] == b'.' {
                k as i32
            } else {
                -1
            };
        }
        if word(buf, icell + 2) == 0 {
            // Boundary cell: the traversal so far spells a stored hostname.
            if k == 0 || buf[k - 1] == b'.' {
                return k as i32;
            }
            icell = word(buf, icell + 1);
        }
    }
}

/// Same contract and byte image as [`matches_scalar`], with unchecked reads.
#[cfg(target_endian = "little")]
pub(crate) fn matches_unchecked(buf: &[u8], iroot: u32) -> i32 {
    let p = buf.as_ptr();
    // SAFETY: the arena maintains, and `Arena::adopt` re-validates for
    // adopted snapshots, that every cell link lands on a cell inside the
    // cell region and every segment descriptor stays inside the pool. The
    // needle region is part of the fixed 272-byte prefix. All reads below
    // therefore stay inside `buf`. Words are read unaligned because the
    // buffer itself has byte alignment.
    let word = |iword: u32| -> u32 {
        unsafe { p.add(iword as usize * 4).cast::<u32>().read_unaligned() }
    };
    let byte = |at: usize| -> u8 { unsafe { *p.add(at) } };

    let char0 = word(CHAR0_SLOT) as usize;
    let mut k = byte(NEEDLE_LEN_AT) as usize;
    let mut icell = iroot;
    loop {
        if k == 0 {
            return -1;
        }
        let b = byte(k - 1);
        let mut v;
        loop {
            v = word(icell + 2);
            if v != 0 && byte(char0 + (v & 0x00FF_FFFF) as usize) == b {
                break;
            }
            icell = word(icell);
            if icell == 0 {
                return -1;
            }
        }
        let len = (v >> 24) as usize;
        if len > k {
            return -1;
        }
        let sp = char0 + (v & 0x00FF_FFFF) as usize;
        for i in 1..len {
            if byte(sp + i) != byte(k - 1 - i) {
                return -1;
            }
        }
        k -= len;
        icell = word(icell + 1);
        if icell == 0 {
            return if k == 0 || byte(k - 1) == b'.' {
                k as i32
            } else {
                -1
            };
        }
        if word(icell + 2) == 0 {
            if k == 0 || byte(k - 1) == b'.' {
                return k as i32;
            }
            icell = word(icell + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrieContainer;

    fn hostnames() -> Vec<String> {
        let mut out = Vec::new();
        for tld in ["com", "org", "net"] {
            for name in ["example", "ads", "tracker", "cdn"] {
                out.push(format!("{name}.{tld}"));
                out.push(format!("sub.{name}.{tld}"));
            }
        }
        out
    }

    #[test]
    fn backends_agree() {
        let mut container = TrieContainer::new();
        let mut trie = container.create_trie();
        for h in hostnames() {
            container.add_hostname(&mut trie, &h);
        }
        let queries = [
            "example.com",
            "deep.sub.example.com",
            "notexample.com",
            "example.co",
            "x.ads.net",
            "cdn.org",
            "",
        ];
        for q in queries {
            container.set_needle(q.as_bytes());
            let scalar = matches_scalar(container.as_bytes(), trie.iroot());
            let fast = MatcherBackend::Unchecked.resolve()(container.as_bytes(), trie.iroot());
            assert_eq!(scalar, fast, "backends disagree on {q:?}");
        }
    }

    #[test]
    fn empty_trie_never_matches() {
        let mut container = TrieContainer::new();
        let trie = container.create_trie();
        container.set_needle(b"example.com");
        assert_eq!(matches_scalar(container.as_bytes(), trie.iroot()), -1);
    }

    #[test]
    fn selection_prefers_unchecked_on_little_endian() {
        if cfg!(target_endian = "little") {
            assert_eq!(MatcherBackend::select(), MatcherBackend::Unchecked);
        } else {
            assert_eq!(MatcherBackend::select(), MatcherBackend::Scalar);
        }
    }
}
