//! Streaming piece commitment hasher
//!
//! [`PieceHasher`] is a pure sink: bytes go in, a [`PieceDigest`] comes out.
//! [`HashingReader`] wraps any [`Read`] and feeds a `PieceHasher` with every
//! chunk it forwards, for callers that need the bytes as well as the digest.
//!
//! # Example
//!
//! ```
//! use piece_dl::piece::{PieceHasher, PieceCid};
//!
//! let mut hasher = PieceHasher::new();
//! hasher.update(b"hello");
//! hasher.update(b" piece");
//! let piece: PieceCid = hasher.link();
//! assert_eq!(piece.height(), Some(2));
//! ```

use std::io::{self, Read, Write};

use super::link::{PieceCid, PieceDigest};
use super::tree::{MIN_PIECE_HEIGHT, NODE_SIZE, Node, hash_pair, height_for_leaves, unpadded_size, zero_comm};

/// Payload bytes consumed per FR32 expansion
const QUAD_SIZE: usize = 127;

/// Leaves produced per FR32 expansion (4 × 254 bits out of 127 × 8 bits in)
const LEAVES_PER_QUAD: u64 = 4;

/// Streaming commitment hasher over the FR32-padded binary tree.
///
/// Memory use is bounded by the tree height: completed subtrees are folded
/// into one node per level as soon as their sibling arrives.
#[derive(Clone)]
pub struct PieceHasher {
    /// Partial quad awaiting more input
    buffer: [u8; QUAD_SIZE],
    buffered: usize,
    /// Pending subtree roots, one slot per level
    layers: Vec<Option<Node>>,
    quads: u64,
    bytes_written: u64,
}

impl Default for PieceHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PieceHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PieceHasher")
            .field("bytes_written", &self.bytes_written)
            .field("quads", &self.quads)
            .finish()
    }
}

impl PieceHasher {
    /// Create an empty hasher
    pub fn new() -> Self {
        Self {
            buffer: [0; QUAD_SIZE],
            buffered: 0,
            layers: Vec::new(),
            quads: 0,
            bytes_written: 0,
        }
    }

    /// Number of payload bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Feed the next chunk of payload
    pub fn update(&mut self, mut chunk: &[u8]) {
        self.bytes_written += chunk.len() as u64;

        if self.buffered > 0 {
            let take = (QUAD_SIZE - self.buffered).min(chunk.len());
            self.buffer[self.buffered..self.buffered + take].copy_from_slice(&chunk[..take]);
            self.buffered += take;
            chunk = &chunk[take..];

            if self.buffered < QUAD_SIZE {
                return;
            }
            let quad = self.buffer;
            absorb_quad(&mut self.layers, &quad);
            self.quads += 1;
            self.buffered = 0;
        }

        let mut quads = chunk.chunks_exact(QUAD_SIZE);
        for quad in quads.by_ref() {
            let mut full = [0u8; QUAD_SIZE];
            full.copy_from_slice(quad);
            absorb_quad(&mut self.layers, &full);
            self.quads += 1;
        }

        let rest = quads.remainder();
        self.buffer[..rest.len()].copy_from_slice(rest);
        self.buffered = rest.len();
    }

    /// Compute the digest of everything written so far.
    ///
    /// Does not disturb the hasher state: further writes continue the same stream.
    pub fn digest(&self) -> PieceDigest {
        let mut layers = self.layers.clone();
        let mut quads = self.quads;

        if self.buffered > 0 || quads == 0 {
            let mut tail = [0u8; QUAD_SIZE];
            tail[..self.buffered].copy_from_slice(&self.buffer[..self.buffered]);
            absorb_quad(&mut layers, &tail);
            quads += 1;
        }

        let height = height_for_leaves(quads * LEAVES_PER_QUAD).max(MIN_PIECE_HEIGHT);
        let root = fold_layers(&layers, height);

        PieceDigest {
            root,
            height,
            padding: unpadded_size(height) - self.bytes_written,
        }
    }

    /// Digest of everything written so far as a PieceCIDv2
    pub fn link(&self) -> PieceCid {
        PieceCid::V2(self.digest())
    }

    /// Return the hasher to its initial state
    pub fn reset(&mut self) {
        self.buffered = 0;
        self.layers.clear();
        self.quads = 0;
        self.bytes_written = 0;
    }
}

impl Write for PieceHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Pass-through reader that hashes every byte it forwards
#[derive(Debug)]
pub struct HashingReader<R> {
    inner: R,
    hasher: PieceHasher,
}

impl<R> HashingReader<R> {
    /// Wrap `inner` with a fresh hasher
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: PieceHasher::new(),
        }
    }

    /// The hasher observing this stream
    pub fn hasher(&self) -> &PieceHasher {
        &self.hasher
    }

    /// Split into the inner reader and the hasher
    pub fn into_parts(self) -> (R, PieceHasher) {
        (self.inner, self.hasher)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Drain `reader` into a fresh hasher using a buffer of `buffer_size` bytes
pub fn hash_reader<R: Read>(mut reader: R, buffer_size: usize) -> io::Result<PieceDigest> {
    let mut hasher = PieceHasher::new();
    let mut buf = vec![0u8; buffer_size.max(QUAD_SIZE)];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(hasher.digest())
}

/// FR32-expand one quad and push its four leaves into the layer stack
fn absorb_quad(layers: &mut Vec<Option<Node>>, quad: &[u8; QUAD_SIZE]) {
    for leaf in fr32_expand(quad) {
        push_node(layers, leaf);
    }
}

/// Spread 127 bytes over four 254-bit field elements
fn fr32_expand(quad: &[u8; QUAD_SIZE]) -> [Node; 4] {
    let mut out = [0u8; 4 * NODE_SIZE];

    out[..32].copy_from_slice(&quad[..32]);
    out[31] &= 0x3f;

    for i in 32..64 {
        out[i] = (quad[i] << 2) | (quad[i - 1] >> 6);
    }
    out[63] &= 0x3f;

    for i in 64..96 {
        out[i] = (quad[i] << 4) | (quad[i - 1] >> 4);
    }
    out[95] &= 0x3f;

    for i in 96..127 {
        out[i] = (quad[i] << 6) | (quad[i - 1] >> 2);
    }
    out[127] = quad[126] >> 2;

    let mut leaves = [[0u8; NODE_SIZE]; 4];
    for (leaf, bytes) in leaves.iter_mut().zip(out.chunks_exact(NODE_SIZE)) {
        leaf.copy_from_slice(bytes);
    }
    leaves
}

/// Binary-counter insert: carry completed pairs upward
fn push_node(layers: &mut Vec<Option<Node>>, mut node: Node) {
    let mut level = 0;
    loop {
        if level == layers.len() {
            layers.push(Some(node));
            return;
        }
        match layers[level].take() {
            Some(left) => {
                node = hash_pair(&left, &node);
                level += 1;
            }
            None => {
                layers[level] = Some(node);
                return;
            }
        }
    }
}

/// Close the tree at `height`, filling missing right siblings with zero subtrees
fn fold_layers(layers: &[Option<Node>], height: u8) -> Node {
    let mut carry: Option<Node> = None;
    for level in 0..height {
        let pending = layers.get(level as usize).copied().flatten();
        carry = match (pending, carry) {
            (Some(left), Some(right)) => Some(hash_pair(&left, &right)),
            (Some(left), None) | (None, Some(left)) => Some(hash_pair(&left, &zero_comm(level))),
            (None, None) => None,
        };
    }
    carry
        .or_else(|| layers.get(height as usize).copied().flatten())
        .unwrap_or_else(|| zero_comm(height))
}
