use crate::TrieContainer;

/// In-order depth-first traversal of one trie, yielding every stored
/// hostname exactly once.
///
/// The accumulator collects segment bytes as stored (reversed); a hostname
/// is emitted whenever a branch ends or a boundary cell is crossed. Fork
/// points are stacked together with the accumulator length, which is
/// restored on backtrack before resuming on the down branch.
pub struct TrieIterator<'a> {
    container: &'a TrieContainer,
    icell: u32,
    out: Vec<u8>,
    forks: Vec<(u32, usize)>,
}

impl<'a> TrieIterator<'a> {
    pub(crate) fn new(container: &'a TrieContainer, iroot: u32) -> Self {
        Self {
            container,
            icell: iroot,
            out: Vec::with_capacity(256),
            forks: Vec::new(),
        }
    }

    fn emit(&self) -> String {
        let bytes: Vec<u8> = self.out.iter().rev().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Iterator for TrieIterator<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let arena = self.container.arena();
        loop {
            if self.icell == 0 {
                let (icell, len) = self.forks.pop()?;
                self.out.truncate(len);
                self.icell = icell;
            }
            let icell = self.icell;
            let down = arena.cell_down(icell);
            if down != 0 {
                self.forks.push((down, self.out.len()));
            }
            let v = arena.cell_seg(icell);
            let right = arena.cell_right(icell);
            if v == 0 {
                if right == 0 {
                    // Zero-initialised root of an empty trie.
                    self.icell = 0;
                    continue;
                }
                // Boundary cell: the bytes accumulated so far are stored.
                self.icell = right;
                return Some(self.emit());
            }
            let len = (v >> 24) as usize;
            for i in 0..len {
                self.out.push(arena.seg_byte(v, i));
            }
            self.icell = right;
            if right == 0 {
                return Some(self.emit());
            }
        }
    }
}
