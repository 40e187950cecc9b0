// SPDX-License-Identifier: MIT
//! Recursive record trees (.pul, .pgf, .amp)
//!
//! ## Tree layout
//!
//! ```text
//! Magic:       u32  (TREE_MAGIC, or TREE_MAGIC_SWAPPED for foreign byte order)
//! Levels:      u32  number of hierarchy levels
//! LevelSizes:  i32 × Levels, byte size of every record at that level
//! Records:     pre-order traversal, each record followed by a u32 child count
//! ```
//!
//! Records are kept in an arena: one owned buffer per tree, and nodes that
//! refer to their bytes, parent and children by index. Arena order equals
//! the pre-order layout of the buffer.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Deref;

use tracing::debug;

use crate::error::{FormatError, ReadError};
use crate::format::{pulse, TREE_MAGIC, TREE_MAGIC_SWAPPED};
use crate::record::{ByteSpan, FieldRecord};
use crate::swap::Scalar;

/// Which embedded tree this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeKind {
    /// Pulse tree: recorded data hierarchy
    Pulse,
    /// Stimulus protocol tree
    Stimulus,
    /// Amplifier state tree
    Amplifier,
}

impl TreeKind {
    /// Extension tag used in the bundle directory
    pub fn extension(&self) -> &'static str {
        match self {
            TreeKind::Pulse => ".pul",
            TreeKind::Stimulus => ".pgf",
            TreeKind::Amplifier => ".amp",
        }
    }
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TreeKind::Pulse => "pulse",
            TreeKind::Stimulus => "stimulus",
            TreeKind::Amplifier => "amplifier",
        };
        write!(f, "{} ({})", name, self.extension())
    }
}

/// Hierarchy levels of the pulse tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Root = 0,
    Group = 1,
    Series = 2,
    Sweep = 3,
    Trace = 4,
}

impl Level {
    /// Depth of this level in the tree
    #[inline]
    pub fn depth(self) -> usize {
        self as usize
    }

    pub fn from_depth(depth: usize) -> Option<Self> {
        match depth {
            0 => Some(Level::Root),
            1 => Some(Level::Group),
            2 => Some(Level::Series),
            3 => Some(Level::Sweep),
            4 => Some(Level::Trace),
            _ => None,
        }
    }
}

/// Index of a record inside its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// Position in pre-order
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Node {
    level: usize,
    start: usize,
    len: usize,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A decoded tree
#[derive(Debug, Clone)]
pub struct Tree {
    kind: TreeKind,
    swapped: bool,
    level_sizes: Vec<usize>,
    data: Vec<u8>,
    nodes: Vec<Node>,
    time0: f64,
}

/// Cursor over the tree buffer; every read is checked against the end
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    swapped: bool,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, needed: usize) -> Result<(usize, &'a [u8]), FormatError> {
        let start = self.pos;
        let end = start
            .checked_add(needed)
            .filter(|&end| end <= self.data.len())
            .ok_or(FormatError::Truncated {
                offset: start,
                needed,
                len: self.data.len(),
            })?;
        self.pos = end;
        Ok((start, &self.data[start..end]))
    }

    fn read<T: Scalar>(&mut self) -> Result<T, FormatError> {
        let swapped = self.swapped;
        let (_, bytes) = self.take(T::WIDTH)?;
        Ok(T::read_from(bytes, swapped))
    }
}

impl Tree {
    /// Decode a tree from its complete buffer
    pub fn from_buffer(kind: TreeKind, data: Vec<u8>) -> Result<Self, FormatError> {
        let mut cursor = Cursor {
            data: &data,
            pos: 0,
            swapped: false,
        };

        let magic: u32 = cursor.read()?;
        let swapped = match magic {
            TREE_MAGIC => false,
            TREE_MAGIC_SWAPPED => true,
            other => return Err(FormatError::BadMagic(other)),
        };
        cursor.swapped = swapped;

        let num_levels = cursor.read::<u32>()? as usize;
        if num_levels == 0 {
            return Err(FormatError::NoLevels);
        }
        // make sure the table fits before allocating for it
        let table_bytes = num_levels.checked_mul(4).ok_or(FormatError::Truncated {
            offset: cursor.pos,
            needed: usize::MAX,
            len: data.len(),
        })?;
        if cursor.pos + table_bytes > data.len() {
            return Err(FormatError::Truncated {
                offset: cursor.pos,
                needed: table_bytes,
                len: data.len(),
            });
        }
        let mut level_sizes = Vec::with_capacity(num_levels);
        for level in 0..num_levels {
            let size: i32 = cursor.read()?;
            if size < 0 {
                return Err(FormatError::NegativeLevelSize { level, size });
            }
            level_sizes.push(size as usize);
        }

        let mut nodes: Vec<Node> = Vec::new();
        let (root, root_children) = read_node(&mut cursor, &level_sizes, &mut nodes, 0, None)?;

        // explicit stack instead of recursion: depth is data-controlled
        let mut pending: Vec<(NodeId, u32)> = vec![(root, root_children)];
        while let Some(top) = pending.last_mut() {
            if top.1 == 0 {
                pending.pop();
                continue;
            }
            top.1 -= 1;
            let parent = top.0;
            let level = nodes[parent.0].level + 1;
            let (child, grandchildren) =
                read_node(&mut cursor, &level_sizes, &mut nodes, level, Some(parent))?;
            nodes[parent.0].children.push(child);
            pending.push((child, grandchildren));
        }

        if cursor.pos != data.len() {
            return Err(FormatError::ByteCountMismatch {
                read: cursor.pos,
                len: data.len(),
            });
        }

        debug!(
            tree = %kind,
            levels = level_sizes.len(),
            records = nodes.len(),
            swapped,
            "decoded tree"
        );

        Ok(Self {
            kind,
            swapped,
            level_sizes,
            data,
            nodes,
            time0: 0.0,
        })
    }

    /// Decode a tree from `length` bytes at `offset` of a seekable stream
    pub fn from_stream<R: Read + Seek>(
        kind: TreeKind,
        reader: &mut R,
        offset: u64,
        length: u64,
    ) -> Result<Self, ReadError> {
        reader.seek(SeekFrom::Start(offset))?;
        // grow with the data actually present instead of trusting `length`
        let mut buffer = Vec::new();
        reader.by_ref().take(length).read_to_end(&mut buffer)?;
        if (buffer.len() as u64) != length {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "{} tree: expected {} bytes at offset {}, got {}",
                    kind,
                    length,
                    offset,
                    buffer.len()
                ),
            )
            .into());
        }
        Ok(Self::from_buffer(kind, buffer)?)
    }

    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    /// Whether the tree was written with the opposite byte order
    pub fn is_swapped(&self) -> bool {
        self.swapped
    }

    /// Record size of every level
    pub fn level_sizes(&self) -> &[usize] {
        &self.level_sizes
    }

    /// Number of levels this tree has
    pub fn num_levels(&self) -> usize {
        self.level_sizes.len()
    }

    /// Total number of records
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// A tree is usable if it declares levels and its root has bytes
    pub fn is_valid(&self) -> bool {
        !self.level_sizes.is_empty() && self.nodes.first().is_some_and(|root| root.len > 0)
    }

    pub fn root(&self) -> Record<'_> {
        self.record(NodeId(0))
    }

    /// Record handle for `id`.
    ///
    /// # Panics
    /// If `id` was not produced by this tree.
    pub fn record(&self, id: NodeId) -> Record<'_> {
        let node = &self.nodes[id.0];
        Record {
            tree: self,
            id,
            span: ByteSpan::new(&self.data[node.start..node.start + node.len], self.swapped),
        }
    }

    /// Checked variant of [`Self::record`]
    pub fn get(&self, id: NodeId) -> Option<Record<'_>> {
        (id.0 < self.nodes.len()).then(|| self.record(id))
    }

    /// All records in pre-order (the order they are stored in the file)
    pub fn records(&self) -> impl ExactSizeIterator<Item = Record<'_>> + '_ {
        (0..self.nodes.len()).map(move |i| self.record(NodeId(i)))
    }

    /// Current time zero for relative times
    pub fn reference_time(&self) -> f64 {
        self.time0
    }

    /// Use the time stored in (or above) `id` as time zero.
    ///
    /// Series and sweep records carry their own start time; group records
    /// fall back to the root's, trace records to their sweep's. Missing
    /// fields count as time 0. Only meaningful for the pulse tree.
    pub fn set_reference_time(&mut self, id: NodeId) -> Result<f64, FormatError> {
        let time0 = {
            if self.kind != TreeKind::Pulse {
                return Err(FormatError::NotPulseTree(self.kind));
            }
            let record = self.get(id).ok_or(FormatError::UnknownRecord(id.0))?;
            let parent_time = |offset: usize| {
                record
                    .parent()
                    .map(|parent| parent.read_or(offset, 0.0))
                    .unwrap_or(0.0)
            };
            match Level::from_depth(record.level()) {
                Some(Level::Root) => record.read_or(pulse::RO_START_TIME, 0.0),
                Some(Level::Group) => parent_time(pulse::RO_START_TIME),
                Some(Level::Series) => record.read_or(pulse::SE_TIME, 0.0),
                Some(Level::Sweep) => record.read_or(pulse::SW_TIME, 0.0),
                Some(Level::Trace) => parent_time(pulse::SW_TIME),
                None => {
                    return Err(FormatError::LevelOutOfRange {
                        level: record.level(),
                        depth: Level::Trace.depth() + 1,
                    })
                }
            }
        };
        self.time0 = time0;
        debug!(time0, "reference time set");
        Ok(time0)
    }
}

fn read_node(
    cursor: &mut Cursor<'_>,
    level_sizes: &[usize],
    nodes: &mut Vec<Node>,
    level: usize,
    parent: Option<NodeId>,
) -> Result<(NodeId, u32), FormatError> {
    let size = *level_sizes
        .get(level)
        .ok_or(FormatError::LevelOutOfRange {
            level,
            depth: level_sizes.len(),
        })?;
    let (start, _) = cursor.take(size)?;
    let children: u32 = cursor.read()?;
    let id = NodeId(nodes.len());
    nodes.push(Node {
        level,
        start,
        len: size,
        parent,
        children: Vec::new(),
    });
    Ok((id, children))
}

/// Handle to one record of a tree
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    tree: &'a Tree,
    id: NodeId,
    span: ByteSpan<'a>,
}

impl<'a> Record<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'a Tree {
        self.tree
    }

    /// Depth in the hierarchy (0 = root)
    pub fn level(&self) -> usize {
        self.tree.nodes[self.id.0].level
    }

    /// Whether this record sits at `level`
    pub fn is_level(&self, level: Level) -> bool {
        self.level() == level.depth()
    }

    /// Record bytes
    pub fn span(&self) -> ByteSpan<'a> {
        self.span
    }

    pub fn parent(&self) -> Option<Record<'a>> {
        self.tree.nodes[self.id.0]
            .parent
            .map(|id| self.tree.record(id))
    }

    /// Nearest ancestor (or self) at `level`
    pub fn ancestor(&self, level: Level) -> Option<Record<'a>> {
        let mut current = Some(*self);
        while let Some(record) = current {
            if record.level() == level.depth() {
                return Some(record);
            }
            current = record.parent();
        }
        None
    }

    pub fn num_children(&self) -> usize {
        self.tree.nodes[self.id.0].children.len()
    }

    pub fn child(&self, index: usize) -> Option<Record<'a>> {
        self.tree.nodes[self.id.0]
            .children
            .get(index)
            .map(|&id| self.tree.record(id))
    }

    /// Children in stored order
    pub fn children(&self) -> impl ExactSizeIterator<Item = Record<'a>> + 'a {
        let tree = self.tree;
        tree.nodes[self.id.0]
            .children
            .iter()
            .map(move |&id| tree.record(id))
    }

    /// Time zero of the owning tree
    pub fn reference_time(&self) -> f64 {
        self.tree.time0
    }

    /// Require this record to be at `level`
    pub fn expect_level(&self, level: Level) -> Result<(), FormatError> {
        if self.is_level(level) {
            Ok(())
        } else {
            Err(FormatError::WrongLevel {
                expected: level.depth(),
                found: self.level(),
            })
        }
    }
}

impl<'a> Deref for Record<'a> {
    type Target = ByteSpan<'a>;

    fn deref(&self) -> &Self::Target {
        &self.span
    }
}

impl FieldRecord for Record<'_> {
    fn span(&self) -> ByteSpan<'_> {
        self.span
    }

    fn level(&self) -> Option<usize> {
        Some(Record::level(self))
    }

    fn reference_time(&self) -> f64 {
        self.tree.time0
    }
}
