//! Packing sorted key/value pairs into a keyka file
//!
//! The packer lays out an implicit balanced binary search tree over the
//! sorted input in a single forward pass. A node's tree level is the count
//! of trailing 1-bits in its input rank, so leaves (level 0) and branches
//! strictly alternate in the output. A branch's left child always precedes
//! it in the stream and is referenced directly; its right child has an
//! unknown byte size at emission time, so the `right` field is written as
//! zero and back-patched by the child once the child's own offset is known.
//! Nodes along a right spine re-patch their ancestor; the last write wins.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{KeykaError, Result};
use crate::format::{
    compare_keys, node_level, root_index, BRANCH_HEADER_SIZE, BRANCH_RIGHT_OFFSET, KEY_LEN_SIZE,
    LEAF_HEADER_SIZE, MAGIC, OFFSET_SIZE,
};

/// Maximum key length storable in the u16 length field
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Streaming packer for keyka files
///
/// Keys must be pushed in strictly ascending byte order; the writer
/// verifies this and fails on violations. Any error is fatal: a partially
/// written file must be considered corrupt.
///
/// The writer needs positioned writes to patch parent references that were
/// emitted before their right child. Patches go through `Seek`, which on a
/// `BufWriter` flushes before moving, so the patched bytes always land in
/// the file rather than in a stale buffer.
pub struct KeykaWriter<W> {
    sink: W,
    /// Absolute stream position of the start of the tree region
    tree_base: u64,
    /// Absolute stream position where the next record will be appended
    pos: u64,
    /// Signed reference to each emitted record, indexed by input rank
    offsets: Vec<i32>,
    prev_key: Option<Vec<u8>>,
}

impl<W: Write + Seek> KeykaWriter<W> {
    /// Start a new keyka file at the sink's current position.
    ///
    /// The magic and a zero root pointer are written immediately; the root
    /// pointer is patched by [`finish`](Self::finish).
    pub fn new(mut sink: W) -> Result<Self> {
        let start = sink.stream_position()?;
        sink.write_all(MAGIC)?;
        sink.write_i32::<LittleEndian>(0)?;

        let tree_base = start + MAGIC.len() as u64;
        Ok(KeykaWriter {
            sink,
            tree_base,
            pos: tree_base + OFFSET_SIZE as u64,
            offsets: Vec::new(),
            prev_key: None,
        })
    }

    /// Number of records emitted so far
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// `true` while no record has been emitted
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Append one key/value pair.
    pub fn add(&mut self, key: &[u8], value: u64) -> Result<()> {
        let index = self.offsets.len() as u64;

        if key.len() > MAX_KEY_LEN {
            return Err(KeykaError::KeyTooLong(key.len()));
        }
        if let Some(prev) = &self.prev_key {
            match compare_keys(key, prev) {
                Ordering::Equal => return Err(KeykaError::DuplicateKey { index }),
                Ordering::Less => return Err(KeykaError::Unsorted { index }),
                Ordering::Greater => {}
            }
        }

        let rel = self.pos - self.tree_base;
        if rel > i32::MAX as u64 {
            return Err(KeykaError::TreeTooLarge(rel));
        }

        let level = node_level(index);
        // Leaves are referenced through the negation of their offset; the
        // sign is what lets a leaf omit the two child reference fields.
        let node_ref = if level == 0 {
            -(rel as i32)
        } else {
            rel as i32
        };

        let header_size = if level == 0 {
            self.sink.write_u64::<LittleEndian>(value)?;
            LEAF_HEADER_SIZE
        } else {
            let delta = 1u64 << (level - 1);
            let left = self.offsets[(index - delta) as usize];
            self.sink.write_u64::<LittleEndian>(value)?;
            self.sink.write_i32::<LittleEndian>(left)?;
            // right child is not emitted yet; it patches this field later
            self.sink.write_i32::<LittleEndian>(0)?;
            BRANCH_HEADER_SIZE
        };
        self.sink.write_u16::<LittleEndian>(key.len() as u16)?;
        self.sink.write_all(key)?;
        self.pos += (header_size + KEY_LEN_SIZE + key.len()) as u64;

        self.offsets.push(node_ref);
        self.prev_key = Some(key.to_vec());

        // This record is the right child of the node 2^level ranks back
        // (the previous record, for leaves). The first node of each spine
        // has no parent yet; it is a root candidate.
        let parent = if level == 0 {
            index.checked_sub(1)
        } else {
            index.checked_sub(1 << level)
        };
        if let Some(parent) = parent {
            let parent_ref = self.offsets[parent as usize];
            debug_assert!(parent_ref > 0, "parent of record {index} is not a branch");
            let field_pos = self.tree_base + parent_ref as u64 + BRANCH_RIGHT_OFFSET as u64;
            self.write_i32_at(field_pos, node_ref)?;
        }

        Ok(())
    }

    /// Patch the root pointer and flush.
    ///
    /// Returns the sink, positioned at the end of the packed data.
    pub fn finish(mut self) -> Result<W> {
        if !self.offsets.is_empty() {
            let root = root_index(self.offsets.len() as u64);
            let root_ref = self.offsets[root as usize];
            self.write_i32_at(self.tree_base, root_ref)?;
        }
        self.sink.flush()?;
        Ok(self.sink)
    }

    /// Positioned write that leaves the append position untouched.
    fn write_i32_at(&mut self, pos: u64, v: i32) -> Result<()> {
        self.sink.seek(SeekFrom::Start(pos))?;
        self.sink.write_i32::<LittleEndian>(v)?;
        self.sink.seek(SeekFrom::Start(self.pos))?;
        Ok(())
    }
}

/// Pack a pre-sorted sequence of key/value pairs into `sink`.
///
/// The caller guarantees sort order and uniqueness; the packer verifies
/// both and fails with [`KeykaError::Unsorted`] or
/// [`KeykaError::DuplicateKey`] on violations.
pub fn pack<W, I, K>(sink: W, pairs: I) -> Result<()>
where
    W: Write + Seek,
    I: IntoIterator<Item = (K, u64)>,
    K: AsRef<[u8]>,
{
    let mut writer = KeykaWriter::new(sink)?;
    for (key, value) in pairs {
        writer.add(key.as_ref(), value)?;
    }
    writer.finish()?;
    Ok(())
}

/// Pack a pre-sorted sequence of key/value pairs into a new file at `path`.
pub fn pack_to_file<P, I, K>(path: P, pairs: I) -> Result<()>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = (K, u64)>,
    K: AsRef<[u8]>,
{
    pack(BufWriter::new(File::create(path)?), pairs)
}
