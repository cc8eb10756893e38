//! Fixed byte sequences decoded without running the general pipeline
//!
//! Assemblers pad code with multi-byte NOP forms that carry redundant
//! prefixes (several 66 bytes, a 2E segment override) which the general
//! pipeline would reject as duplicate prefixes. They are stored in a trie
//! with siblings sorted by byte value and matched longest-prefix first.

use crate::config::ExecutionMode;
use crate::instruction::InstructionDescriptor;

/// One trie node: a byte, its first child and its next sibling
#[derive(Debug, Clone)]
struct TrieNode {
    byte: u8,
    /// Index of the descriptor of the sequence ending here
    matched: Option<usize>,
    /// First node of the next byte position
    success: Option<usize>,
    /// Next sibling with a larger byte
    fail: Option<usize>,
}

/// Trie of fixed instruction byte sequences
#[derive(Debug, Clone, Default)]
pub struct HardcodedTrie {
    nodes: Vec<TrieNode>,
    root: Option<usize>,
    instructions: Vec<InstructionDescriptor>,
}

impl HardcodedTrie {
    /// Empty trie
    pub fn new() -> Self {
        Self::default()
    }

    /// Trie with the padding sequences of `mode`
    pub fn for_mode(mode: ExecutionMode) -> Self {
        let mut trie = Self::new();
        let nop = || InstructionDescriptor::new("nop");
        trie.insert(&[0x90], nop());
        trie.insert(&[0x66, 0x90], nop());
        trie.insert(&[0xf3, 0x90], InstructionDescriptor::new("pause"));
        trie.insert(&[0x0f, 0x1f, 0x00], nop());
        trie.insert(&[0x0f, 0x1f, 0x40, 0x00], nop());
        trie.insert(&[0x0f, 0x1f, 0x44, 0x00, 0x00], nop());
        trie.insert(&[0x66, 0x0f, 0x1f, 0x44, 0x00, 0x00], nop());
        trie.insert(&[0x0f, 0x1f, 0x80, 0x00, 0x00, 0x00, 0x00], nop());
        trie.insert(&[0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00], nop());
        trie.insert(&[0x66, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00], nop());
        // nopw %cs:0x0(%rax,%rax,1) with up to five extra operand-size prefixes
        for extra in 1..=5 {
            let mut bytes = vec![0x66; extra];
            bytes.extend_from_slice(&[0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00]);
            trie.insert(&bytes, nop());
        }
        if mode == ExecutionMode::Bits32 {
            trie.insert(&[0x8d, 0x76, 0x00], nop());
            trie.insert(&[0x8d, 0x74, 0x26, 0x00], nop());
            trie.insert(&[0x8d, 0xb4, 0x26, 0x00, 0x00, 0x00, 0x00], nop());
            trie.insert(&[0x8d, 0xbc, 0x27, 0x00, 0x00, 0x00, 0x00], nop());
        }
        trie
    }

    /// Number of stored sequences
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Add a sequence. Re-inserting a sequence replaces its descriptor.
    pub fn insert(&mut self, bytes: &[u8], instruction: InstructionDescriptor) {
        if bytes.is_empty() {
            return;
        }
        let mut link = Link::Root;
        let mut last = 0;
        for &byte in bytes {
            last = self.find_or_insert(link, byte);
            link = Link::Success(last);
        }
        match self.nodes[last].matched {
            Some(existing) => self.instructions[existing] = instruction,
            None => {
                self.nodes[last].matched = Some(self.instructions.len());
                self.instructions.push(instruction);
            }
        }
    }

    fn head(&self, link: Link) -> Option<usize> {
        match link {
            Link::Root => self.root,
            Link::Success(node) => self.nodes[node].success,
            Link::Fail(node) => self.nodes[node].fail,
        }
    }

    fn set_head(&mut self, link: Link, value: Option<usize>) {
        match link {
            Link::Root => self.root = value,
            Link::Success(node) => self.nodes[node].success = value,
            Link::Fail(node) => self.nodes[node].fail = value,
        }
    }

    /// Find `byte` in the sibling list hanging off `link`, keeping it sorted
    fn find_or_insert(&mut self, mut link: Link, byte: u8) -> usize {
        loop {
            match self.head(link) {
                Some(node) if self.nodes[node].byte == byte => return node,
                Some(node) if self.nodes[node].byte < byte => link = Link::Fail(node),
                next => {
                    let index = self.nodes.len();
                    self.nodes.push(TrieNode {
                        byte,
                        matched: None,
                        success: None,
                        fail: next,
                    });
                    self.set_head(link, Some(index));
                    return index;
                }
            }
        }
    }

    /// Longest stored sequence that prefixes the input.
    ///
    /// `byte_at(n)` yields input byte `n`; at most `limit` bytes are examined.
    /// Returns the matched length and its descriptor.
    pub fn longest_match(
        &self,
        limit: usize,
        byte_at: impl Fn(usize) -> u8,
    ) -> Option<(usize, &InstructionDescriptor)> {
        let mut best = None;
        let mut length = 0;
        let mut cursor = self.root;
        while let Some(index) = cursor {
            if length >= limit {
                break;
            }
            let node = &self.nodes[index];
            let byte = byte_at(length);
            if node.byte < byte {
                cursor = node.fail;
                continue;
            }
            if node.byte > byte {
                break;
            }
            length += 1;
            if let Some(matched) = node.matched {
                best = Some((length, &self.instructions[matched]));
            }
            cursor = node.success;
        }
        best
    }
}

#[derive(Debug, Clone, Copy)]
enum Link {
    Root,
    Success(usize),
    Fail(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(trie: &HardcodedTrie, bytes: &[u8], limit: usize) -> Option<(usize, &'static str)> {
        trie.longest_match(limit, |n| bytes.get(n).copied().unwrap_or(0))
            .map(|(len, inst)| (len, inst.name))
    }

    #[test]
    fn longest_prefix_wins() {
        let trie = HardcodedTrie::for_mode(ExecutionMode::Bits64);
        assert_eq!(matches(&trie, &[0x90, 0x90], 15), Some((1, "nop")));
        assert_eq!(matches(&trie, &[0x66, 0x90], 15), Some((2, "nop")));
        assert_eq!(matches(&trie, &[0xf3, 0x90], 15), Some((2, "pause")));
        let long = [0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0, 0, 0, 0, 0, 0xc3];
        assert_eq!(matches(&trie, &long, 15), Some((11, "nop")));
    }

    #[test]
    fn no_match_for_unknown_bytes() {
        let trie = HardcodedTrie::for_mode(ExecutionMode::Bits64);
        assert_eq!(matches(&trie, &[0x0f, 0x1f, 0x01], 15), None);
        assert_eq!(matches(&trie, &[0xc3], 15), None);
        assert_eq!(matches(&trie, &[0x66, 0x66, 0x90], 15), None);
    }

    #[test]
    fn limit_stops_the_walk() {
        let trie = HardcodedTrie::for_mode(ExecutionMode::Bits64);
        let bytes = [0x0f, 0x1f, 0x44, 0x00, 0x00];
        assert_eq!(matches(&trie, &bytes, 5), Some((5, "nop")));
        assert_eq!(matches(&trie, &bytes, 4), None);
        assert_eq!(matches(&trie, &[0x90], 0), None);
    }

    #[test]
    fn padding_idioms_are_mode_specific() {
        let lea = [0x8d, 0x76, 0x00];
        assert_eq!(matches(&HardcodedTrie::for_mode(ExecutionMode::Bits32), &lea, 15), Some((3, "nop")));
        assert_eq!(matches(&HardcodedTrie::for_mode(ExecutionMode::Bits64), &lea, 15), None);
    }

    #[test]
    fn siblings_stay_sorted() {
        let mut trie = HardcodedTrie::new();
        trie.insert(&[0x30], InstructionDescriptor::new("c"));
        trie.insert(&[0x10], InstructionDescriptor::new("a"));
        trie.insert(&[0x20], InstructionDescriptor::new("b"));
        trie.insert(&[0x20], InstructionDescriptor::new("b2"));
        assert_eq!(trie.len(), 3);
        assert_eq!(matches(&trie, &[0x10], 1), Some((1, "a")));
        assert_eq!(matches(&trie, &[0x20], 1), Some((1, "b2")));
        assert_eq!(matches(&trie, &[0x30], 1), Some((1, "c")));
        assert_eq!(matches(&trie, &[0x15], 1), None);
    }
}
