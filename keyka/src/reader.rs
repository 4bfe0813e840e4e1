//! Reading keyka files: exact lookup and ordered range scans
//!
//! The reader operates over a read-only byte buffer, typically a memory
//! map. Navigation is zero-copy: node keys are borrowed subslices of the
//! buffer, and only keys handed out by a range scan are copied. A fully
//! constructed reader is immutable and can be shared across threads.

use std::cmp::Ordering;

use crate::error::{KeykaError, Result};
use crate::format::{
    compare_keys, read_i32_at, read_u16_at, read_u64_at, BRANCH_HEADER_SIZE, KEY_LEN_SIZE,
    LEAF_HEADER_SIZE, MAGIC, OFFSET_SIZE, VALUE_SIZE,
};

/// A decoded node record; the key borrows from the underlying buffer
#[derive(Debug, Clone, Copy)]
struct Node<'a> {
    /// The signed reference this node was resolved through
    node_ref: i32,
    value: u64,
    left: i32,
    right: i32,
    key: &'a [u8],
}

impl<'a> Node<'a> {
    fn is_leaf(&self) -> bool {
        self.node_ref < 0
    }

    /// Byte offset of the record within the tree region
    fn offset(&self) -> usize {
        self.node_ref.unsigned_abs() as usize
    }
}

/// Read-only view over a packed keyka image
///
/// Construction validates the magic and resolves the root record; both
/// queries and construction fail with [`KeykaError::Corrupt`] on
/// structurally invalid data. Cloning is cheap (a slice and a small cached
/// node), and a shared reference can serve concurrent lookups since every
/// scan carries its own iteration state.
#[derive(Debug, Clone)]
pub struct KeykaReader<'a> {
    tree: &'a [u8],
    root: Option<Node<'a>>,
}

impl<'a> KeykaReader<'a> {
    /// Open a reader over a complete keyka image, magic included.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < MAGIC.len() || &buf[..MAGIC.len()] != MAGIC {
            return Err(KeykaError::BadMagic);
        }
        let tree = &buf[MAGIC.len()..];
        let root_ref = read_i32_at(tree, 0)?;

        let mut reader = KeykaReader { tree, root: None };
        reader.root = reader.node_at(root_ref)?;
        Ok(reader)
    }

    /// `true` when the image holds no records
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Look up a key, returning its value when present.
    ///
    /// An absent key is `Ok(None)`, never an error.
    pub fn find_exact(&self, key: &[u8]) -> Result<Option<u64>> {
        let mut current = self.root;
        while let Some(node) = current {
            current = match compare_keys(key, node.key) {
                Ordering::Less => self.node_at(node.left)?,
                Ordering::Greater => self.node_at(node.right)?,
                Ordering::Equal => return Ok(Some(node.value)),
            };
        }
        Ok(None)
    }

    /// Lazily scan pairs in ascending key order, starting at `low` (or at
    /// its successor when `inclusive_low` is false and `low` itself is in
    /// the set).
    ///
    /// An empty `low` starts at the first key. A `high` of `None` runs to
    /// the end of the file; otherwise the scan stops at the first key past
    /// `high` (or at `high` itself when `inclusive_high` is false). Bounds
    /// with `high < low` yield the empty sequence.
    pub fn find_range(
        &self,
        low: &[u8],
        high: Option<&[u8]>,
        inclusive_low: bool,
        inclusive_high: bool,
    ) -> Result<RangeScan<'a>> {
        let start = self.lower_bound(low, inclusive_low)?;
        Ok(RangeScan {
            reader: self.clone(),
            current: start,
            high: high.map(|h| h.to_vec()),
            inclusive_high,
            pending: None,
        })
    }

    /// Scan every pair in ascending key order.
    pub fn iter(&self) -> Result<RangeScan<'a>> {
        self.find_range(b"", None, true, false)
    }

    /// Resolve a signed record reference: positive decodes a branch record,
    /// negative a leaf, zero is the null reference.
    fn node_at(&self, node_ref: i32) -> Result<Option<Node<'a>>> {
        if node_ref == 0 {
            return Ok(None);
        }
        // i32::MIN has no positive counterpart; reject before negating
        if node_ref == i32::MIN {
            return Err(KeykaError::Corrupt(format!(
                "invalid record reference {node_ref}"
            )));
        }
        let offset = node_ref.unsigned_abs() as usize;
        if offset < OFFSET_SIZE {
            return Err(KeykaError::Corrupt(format!(
                "record reference {node_ref} points inside the root pointer"
            )));
        }

        let value = read_u64_at(self.tree, offset)?;
        let (left, right, key_pos) = if node_ref > 0 {
            (
                read_i32_at(self.tree, offset + VALUE_SIZE)?,
                read_i32_at(self.tree, offset + VALUE_SIZE + OFFSET_SIZE)?,
                offset + BRANCH_HEADER_SIZE,
            )
        } else {
            (0, 0, offset + LEAF_HEADER_SIZE)
        };
        let key_len = read_u16_at(self.tree, key_pos)? as usize;
        let key_start = key_pos + KEY_LEN_SIZE;
        let key = self.tree.get(key_start..key_start + key_len).ok_or_else(|| {
            KeykaError::Corrupt(format!(
                "key of record at tree offset {offset} runs past end of buffer"
            ))
        })?;

        Ok(Some(Node {
            node_ref,
            value,
            left,
            right,
            key,
        }))
    }

    /// Step to the record emitted immediately after `node`.
    ///
    /// Leaves and branches strictly alternate in emission order (the level
    /// of an even rank is 0), so the successor of a leaf is a branch and
    /// vice versa; no tree descent is needed.
    fn next_node(&self, node: &Node<'a>) -> Result<Option<Node<'a>>> {
        let header_size = if node.is_leaf() {
            LEAF_HEADER_SIZE
        } else {
            BRANCH_HEADER_SIZE
        };
        let next = node.offset() + header_size + KEY_LEN_SIZE + node.key.len();
        if next >= self.tree.len() || next > i32::MAX as usize {
            return Ok(None); // end of the record stream
        }
        let next_ref = if node.is_leaf() {
            next as i32
        } else {
            -(next as i32)
        };
        self.node_at(next_ref)
    }

    /// First node satisfying the lower bound, found by a descent that
    /// remembers the last node where it turned left.
    fn lower_bound(&self, low: &[u8], inclusive: bool) -> Result<Option<Node<'a>>> {
        let mut last_left = None;
        let mut current = self.root;
        while let Some(node) = current {
            match compare_keys(low, node.key) {
                Ordering::Less => {
                    let left = self.node_at(node.left)?;
                    if left.is_none() {
                        // nothing smaller left of us: this is the bound
                        return Ok(Some(node));
                    }
                    last_left = Some(node);
                    current = left;
                }
                Ordering::Greater => {
                    let right = self.node_at(node.right)?;
                    if right.is_none() {
                        return Ok(last_left);
                    }
                    current = right;
                }
                Ordering::Equal => {
                    return if inclusive {
                        Ok(Some(node))
                    } else {
                        self.next_node(&node)
                    };
                }
            }
        }
        Ok(last_left)
    }
}

/// Lazy forward iterator over a key range
///
/// Yields `(key, value)` pairs with owned key copies, in ascending key
/// order. The scan borrows only the underlying buffer and may be dropped
/// at any point. On the first corrupt decode it yields one terminal `Err`
/// item and then ends.
pub struct RangeScan<'a> {
    reader: KeykaReader<'a>,
    current: Option<Node<'a>>,
    high: Option<Vec<u8>>,
    inclusive_high: bool,
    pending: Option<KeykaError>,
}

impl<'a> Iterator for RangeScan<'a> {
    type Item = Result<(Vec<u8>, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            return Some(Err(err));
        }
        let node = self.current.take()?;

        if let Some(high) = &self.high {
            match compare_keys(node.key, high) {
                Ordering::Greater => return None,
                Ordering::Equal if !self.inclusive_high => return None,
                _ => {}
            }
        }

        match self.reader.next_node(&node) {
            Ok(next) => self.current = next,
            Err(err) => self.pending = Some(err),
        }
        Some(Ok((node.key.to_vec(), node.value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::pack;
    use std::io::Cursor;

    fn image(pairs: &[(&[u8], u64)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        pack(&mut buf, pairs.iter().map(|&(k, v)| (k, v))).unwrap();
        buf.into_inner()
    }

    fn keyed(n: u64) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        pack(&mut buf, (0..n).map(|i| (format!("key{i:03}"), i))).unwrap();
        buf.into_inner()
    }

    fn values(scan: RangeScan<'_>) -> Vec<u64> {
        scan.map(|item| item.unwrap().1).collect()
    }

    #[test]
    fn test_empty_tree() {
        let buf = image(&[]);
        let reader = KeykaReader::new(&buf).unwrap();
        assert!(reader.is_empty());
        assert_eq!(reader.find_exact(b"x").unwrap(), None);
        assert_eq!(reader.iter().unwrap().count(), 0);
    }

    #[test]
    fn test_single_leaf() {
        let buf = image(&[(b"a", 7)]);
        let reader = KeykaReader::new(&buf).unwrap();
        assert!(!reader.is_empty());
        assert_eq!(reader.find_exact(b"a").unwrap(), Some(7));
        assert_eq!(reader.find_exact(b"b").unwrap(), None);
        assert_eq!(reader.find_exact(b"").unwrap(), None);

        let pairs: Vec<_> = reader.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(pairs, vec![(b"a".to_vec(), 7)]);
    }

    #[test]
    fn test_three_nodes() {
        let buf = image(&[(b"a", 1), (b"b", 2), (b"c", 3)]);
        let reader = KeykaReader::new(&buf).unwrap();
        assert_eq!(reader.find_exact(b"a").unwrap(), Some(1));
        assert_eq!(reader.find_exact(b"b").unwrap(), Some(2));
        assert_eq!(reader.find_exact(b"c").unwrap(), Some(3));
        assert_eq!(reader.find_exact(b"aa").unwrap(), None);

        let scan = reader.find_range(b"a", Some(b"c".as_slice()), true, true).unwrap();
        assert_eq!(values(scan), vec![1, 2, 3]);
        let scan = reader.find_range(b"a", Some(b"c".as_slice()), true, false).unwrap();
        assert_eq!(values(scan), vec![1, 2]);
    }

    #[test]
    fn test_imperfect_tree_range() {
        let buf = image(&[(b"a", 0), (b"b", 1), (b"c", 2), (b"d", 3)]);
        let reader = KeykaReader::new(&buf).unwrap();
        for (i, key) in [b"a", b"b", b"c", b"d"].iter().enumerate() {
            assert_eq!(reader.find_exact(*key).unwrap(), Some(i as u64));
        }

        // bounds that are not members of the key set
        let scan = reader.find_range(b"aa", Some(b"cc".as_slice()), true, false).unwrap();
        assert_eq!(values(scan), vec![1, 2]);
    }

    #[test]
    fn test_sixteen_keys() {
        let buf = keyed(16);
        let reader = KeykaReader::new(&buf).unwrap();
        for i in 0..16u64 {
            let key = format!("key{i:03}");
            assert_eq!(reader.find_exact(key.as_bytes()).unwrap(), Some(i));
        }

        let scan = reader
            .find_range(b"key004", Some(b"key010".as_slice()), true, false)
            .unwrap();
        assert_eq!(values(scan), vec![4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_full_scan_is_ordered() {
        let buf = keyed(48);
        let reader = KeykaReader::new(&buf).unwrap();
        let keys: Vec<_> = reader.iter().unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(keys.len(), 48);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(keys[0], b"key000");
        assert_eq!(keys[47], b"key047");
    }

    #[test]
    fn test_range_bound_combinations() {
        let buf = keyed(10);
        let reader = KeykaReader::new(&buf).unwrap();
        let bounds = |il, ih| {
            let scan = reader
                .find_range(b"key002", Some(b"key005".as_slice()), il, ih)
                .unwrap();
            values(scan)
        };
        assert_eq!(bounds(true, false), vec![2, 3, 4]);
        assert_eq!(bounds(true, true), vec![2, 3, 4, 5]);
        assert_eq!(bounds(false, false), vec![3, 4]);
        assert_eq!(bounds(false, true), vec![3, 4, 5]);
    }

    #[test]
    fn test_range_bounds_between_keys() {
        let buf = keyed(10);
        let reader = KeykaReader::new(&buf).unwrap();
        // "key0025" sits between key002 and key003; "key0045" between
        // key004 and key005
        let scan = reader
            .find_range(b"key0025", Some(b"key0045".as_slice()), true, false)
            .unwrap();
        assert_eq!(values(scan), vec![3, 4]);
        // exclusivity is irrelevant for a bound that is not a member
        let scan = reader
            .find_range(b"key0025", Some(b"key0045".as_slice()), false, true)
            .unwrap();
        assert_eq!(values(scan), vec![3, 4]);
    }

    #[test]
    fn test_range_degenerate_bounds() {
        let buf = keyed(10);
        let reader = KeykaReader::new(&buf).unwrap();

        // low past every key
        let scan = reader.find_range(b"zzz", None, true, false).unwrap();
        assert_eq!(values(scan), Vec::<u64>::new());

        // high below low terminates on the first comparison
        let scan = reader
            .find_range(b"key005", Some(b"key002".as_slice()), true, true)
            .unwrap();
        assert_eq!(values(scan), Vec::<u64>::new());

        // single-key range, both ends inclusive
        let scan = reader
            .find_range(b"key007", Some(b"key007".as_slice()), true, true)
            .unwrap();
        assert_eq!(values(scan), vec![7]);
        // ...and exclusive on either end
        let scan = reader
            .find_range(b"key007", Some(b"key007".as_slice()), true, false)
            .unwrap();
        assert_eq!(values(scan), Vec::<u64>::new());
    }

    #[test]
    fn test_range_unbounded_high_runs_to_end() {
        let buf = keyed(10);
        let reader = KeykaReader::new(&buf).unwrap();
        let scan = reader.find_range(b"key007", None, true, false).unwrap();
        assert_eq!(values(scan), vec![7, 8, 9]);
    }

    #[test]
    fn test_empty_key_lookup_and_scan() {
        let buf = image(&[(b"", 42), (b"a", 1)]);
        let reader = KeykaReader::new(&buf).unwrap();
        assert_eq!(reader.find_exact(b"").unwrap(), Some(42));
        assert_eq!(values(reader.iter().unwrap()), vec![42, 1]);

        // exclusive lower bound on the empty key skips it
        let scan = reader.find_range(b"", None, false, false).unwrap();
        assert_eq!(values(scan), vec![1]);
    }

    #[test]
    fn test_bad_magic() {
        assert!(matches!(
            KeykaReader::new(b"not a keyka file"),
            Err(KeykaError::BadMagic)
        ));
        assert!(matches!(KeykaReader::new(b""), Err(KeykaError::BadMagic)));

        // magic alone is not enough: the root pointer must be present
        assert!(matches!(
            KeykaReader::new(MAGIC),
            Err(KeykaError::Corrupt(_))
        ));
    }

    #[test]
    fn test_corrupt_root_pointer() {
        let mut buf = image(&[(b"a", 1), (b"b", 2), (b"c", 3)]);

        // out-of-range root
        buf[8..12].copy_from_slice(&9999i32.to_le_bytes());
        assert!(matches!(
            KeykaReader::new(&buf),
            Err(KeykaError::Corrupt(_))
        ));

        // a record cannot start inside the root pointer itself
        buf[8..12].copy_from_slice(&2i32.to_le_bytes());
        assert!(matches!(
            KeykaReader::new(&buf),
            Err(KeykaError::Corrupt(_))
        ));

        // i32::MIN cannot be negated into a leaf offset
        buf[8..12].copy_from_slice(&i32::MIN.to_le_bytes());
        assert!(matches!(
            KeykaReader::new(&buf),
            Err(KeykaError::Corrupt(_))
        ));
    }

    #[test]
    fn test_truncated_record_mid_scan() {
        let buf = image(&[(b"a", 1), (b"b", 2), (b"c", 3)]);
        // cut into leaf "c" (tree offset 34, file offset 42): the root
        // branch still decodes, so the reader opens fine
        let buf = &buf[..46];
        let reader = KeykaReader::new(buf).unwrap();

        assert!(matches!(
            reader.find_exact(b"c"),
            Err(KeykaError::Corrupt(_))
        ));

        // the scan yields the intact pairs, then one terminal error
        let items: Vec<_> = reader.iter().unwrap().collect();
        assert_eq!(items.len(), 3);
        assert_eq!(*items[0].as_ref().unwrap(), (b"a".to_vec(), 1));
        assert_eq!(*items[1].as_ref().unwrap(), (b"b".to_vec(), 2));
        assert!(items[2].is_err());
    }

    #[test]
    fn test_scan_abandoned_early() {
        let buf = keyed(32);
        let reader = KeykaReader::new(&buf).unwrap();
        let mut scan = reader.iter().unwrap();
        assert_eq!(scan.next().unwrap().unwrap().1, 0);
        assert_eq!(scan.next().unwrap().unwrap().1, 1);
        drop(scan);
        // the reader is unaffected by a dropped scan
        assert_eq!(reader.find_exact(b"key031").unwrap(), Some(31));
    }

    #[test]
    fn test_reader_shared_across_threads() {
        let buf = keyed(100);
        let reader = KeykaReader::new(&buf).unwrap();
        std::thread::scope(|s| {
            for t in 0..4u64 {
                let reader = &reader;
                s.spawn(move || {
                    for i in (t..100).step_by(4) {
                        let key = format!("key{i:03}");
                        assert_eq!(reader.find_exact(key.as_bytes()).unwrap(), Some(i));
                    }
                });
            }
        });
    }

    #[test]
    fn test_max_value_roundtrip() {
        let buf = image(&[(b"max", u64::MAX), (b"zero", 0)]);
        let reader = KeykaReader::new(&buf).unwrap();
        assert_eq!(reader.find_exact(b"max").unwrap(), Some(u64::MAX));
        assert_eq!(reader.find_exact(b"zero").unwrap(), Some(0));
    }
}
