//! Composite Key Model
//!
//! This module defines the **fixed-width**, **memcmp-ordered** composite keys
//! that every B+Tree in the store is built on, together with the field
//! rotations that turn one logical triple into several access paths.
//!
//! ## Design Overview
//!
//! All key material is encoded **big-endian** so that a plain byte compare of
//! two encoded keys equals their semantic comparison. This is what lets the
//! B+Tree use `memcmp`-style binary search on raw page bytes without ever
//! decoding an entry.
//!
//! Two key flavors exist:
//!
//! - [`TripleKey`] — 12 bytes: `(subject, predicate, object)` atoms, u32 each.
//! - [`TemporalKey`] — 32 bytes: the three atoms followed by
//!   `(valid_from, valid_to, transaction_time)` millisecond epochs, u64 each.
//!   Range scans over a fixed SPO therefore yield temporal versions in
//!   chronological `(valid_from, valid_to, transaction_time)` order.
//!
//! A [`Rotation`] permutes the leading fields of a key so that each maintained
//! index sorts by a different access pattern (SPO, POS, OSP, and the temporal
//! variants including the time-leading TSPO). Encoding into a rotation and
//! decoding back to canonical field order are exact inverses.
//!
//! Temporal leaf entries carry a 16-byte [`EntryMeta`] block (creation stamp,
//! modification delta, version counter, tombstone flag). The metadata is
//! payload, not key material, and is encoded little-endian like page header
//! fields.
//!
//! # Guarantees
//!
//! - **Order preservation:** `a < b` as encoded bytes ⇔ `a < b` semantically,
//!   for keys encoded under the same rotation.
//! - **Round-trip:** `decode(encode(k, r), r) == k` for every rotation `r`.
//! - **Zero-panic decoding:** malformed slices surface [`KeyError`], never a
//!   panic.

#[cfg(test)]
mod tests;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Atom and time primitives
// ------------------------------------------------------------------------------------------------

/// Interned identifier for an RDF term. Assigned by the atom store.
pub type AtomId = u32;

/// Reserved sentinel: compares below every assigned atom.
pub const ATOM_MIN: AtomId = 0;

/// Reserved sentinel: compares above every assigned atom. Never interned.
pub const ATOM_MAX: AtomId = u32::MAX;

/// Millisecond-resolution UNIX epoch timestamp.
pub type Timestamp = u64;

/// Minimum representable instant.
pub const TIME_MIN: Timestamp = 0;

/// Maximum representable instant; encodes an open-ended (∞) interval bound.
pub const TIME_MAX: Timestamp = u64::MAX;

/// Width of an encoded [`TripleKey`] in bytes.
pub const TRIPLE_KEY_LEN: usize = 12;

/// Width of an encoded [`TemporalKey`] in bytes: three u32 atoms followed by
/// three u64 instants.
pub const TEMPORAL_KEY_LEN: usize = 36;

/// Width of an encoded [`EntryMeta`] block in bytes.
pub const ENTRY_META_LEN: usize = 16;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors produced while encoding or decoding key material.
#[derive(Debug, Error)]
pub enum KeyError {
    /// A slice handed to a decoder had the wrong width.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Width the decoder required.
        expected: usize,
        /// Width actually provided.
        actual: usize,
    },

    /// A validity interval was empty or inverted.
    #[error("invalid validity interval [{valid_from}, {valid_to})")]
    InvalidInterval {
        /// Interval start (inclusive).
        valid_from: Timestamp,
        /// Interval end (exclusive).
        valid_to: Timestamp,
    },
}

// ------------------------------------------------------------------------------------------------
// Rotation
// ------------------------------------------------------------------------------------------------

/// Field-rotation ordering of a composite key.
///
/// Each rotation is materialized as a distinct B+Tree holding the same
/// logical set of triples sorted by a different field permutation. The
/// non-temporal and temporal families never mix within one store partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
    /// `(subject, predicate, object)`.
    Spo,
    /// `(predicate, object, subject)`.
    Pos,
    /// `(object, subject, predicate)`.
    Osp,
    /// `(subject, predicate, object, valid_from, valid_to, tx)`.
    Spot,
    /// `(predicate, object, subject, valid_from, valid_to, tx)`.
    Post,
    /// `(object, subject, predicate, valid_from, valid_to, tx)`.
    Ospt,
    /// `(valid_from, subject, predicate, object, valid_to, tx)` — time leading.
    Tspo,
}

impl Rotation {
    /// The three rotations maintained by a non-temporal store.
    pub const NON_TEMPORAL: [Rotation; 3] = [Rotation::Spo, Rotation::Pos, Rotation::Osp];

    /// The four rotations maintained by a temporal store.
    pub const TEMPORAL: [Rotation; 4] = [
        Rotation::Spot,
        Rotation::Post,
        Rotation::Ospt,
        Rotation::Tspo,
    ];

    /// Whether this rotation keys a temporal tree.
    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            Rotation::Spot | Rotation::Post | Rotation::Ospt | Rotation::Tspo
        )
    }

    /// Encoded key width for this rotation.
    pub fn key_len(self) -> usize {
        if self.is_temporal() {
            TEMPORAL_KEY_LEN
        } else {
            TRIPLE_KEY_LEN
        }
    }

    /// Stable file-name stem for the tree file backing this rotation.
    pub fn file_stem(self) -> &'static str {
        match self {
            Rotation::Spo => "spo",
            Rotation::Pos => "pos",
            Rotation::Osp => "osp",
            Rotation::Spot => "spot",
            Rotation::Post => "post",
            Rotation::Ospt => "ospt",
            Rotation::Tspo => "tspo",
        }
    }

    /// Parses a file-name stem back into a rotation.
    pub fn from_file_stem(stem: &str) -> Option<Rotation> {
        match stem {
            "spo" => Some(Rotation::Spo),
            "pos" => Some(Rotation::Pos),
            "osp" => Some(Rotation::Osp),
            "spot" => Some(Rotation::Spot),
            "post" => Some(Rotation::Post),
            "ospt" => Some(Rotation::Ospt),
            "tspo" => Some(Rotation::Tspo),
            _ => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TripleKey
// ------------------------------------------------------------------------------------------------

/// Canonical non-temporal composite key: three interned atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TripleKey {
    /// Subject atom.
    pub s: AtomId,
    /// Predicate atom.
    pub p: AtomId,
    /// Object atom.
    pub o: AtomId,
}

impl TripleKey {
    /// Smallest possible key (all sentinel minimums).
    pub const MIN: TripleKey = TripleKey {
        s: ATOM_MIN,
        p: ATOM_MIN,
        o: ATOM_MIN,
    };

    /// Largest possible key (all sentinel maximums).
    pub const MAX: TripleKey = TripleKey {
        s: ATOM_MAX,
        p: ATOM_MAX,
        o: ATOM_MAX,
    };

    /// Creates a key from canonical `(s, p, o)` atoms.
    pub fn new(s: AtomId, p: AtomId, o: AtomId) -> Self {
        Self { s, p, o }
    }

    /// Fields of this key in the storage order of `rotation`.
    fn rotated(&self, rotation: Rotation) -> [AtomId; 3] {
        match rotation {
            Rotation::Spo | Rotation::Spot | Rotation::Tspo => [self.s, self.p, self.o],
            Rotation::Pos | Rotation::Post => [self.p, self.o, self.s],
            Rotation::Osp | Rotation::Ospt => [self.o, self.s, self.p],
        }
    }

    /// Rebuilds the canonical key from fields laid out in `rotation` order.
    fn from_rotated(fields: [AtomId; 3], rotation: Rotation) -> Self {
        let [a, b, c] = fields;
        match rotation {
            Rotation::Spo | Rotation::Spot | Rotation::Tspo => Self { s: a, p: b, o: c },
            Rotation::Pos | Rotation::Post => Self { s: c, p: a, o: b },
            Rotation::Osp | Rotation::Ospt => Self { s: b, p: c, o: a },
        }
    }

    /// Encodes this key for storage under a non-temporal `rotation`.
    ///
    /// Atoms are written big-endian in the rotation's field order, so the
    /// encoded bytes sort exactly as the rotation dictates.
    pub fn encode(&self, rotation: Rotation) -> [u8; TRIPLE_KEY_LEN] {
        debug_assert!(!rotation.is_temporal());
        let fields = self.rotated(rotation);
        let mut out = [0u8; TRIPLE_KEY_LEN];
        for (i, field) in fields.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&field.to_be_bytes());
        }
        out
    }

    /// Decodes a stored key back to canonical field order.
    pub fn decode(bytes: &[u8], rotation: Rotation) -> Result<Self, KeyError> {
        if bytes.len() != TRIPLE_KEY_LEN {
            return Err(KeyError::InvalidLength {
                expected: TRIPLE_KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut fields = [0 as AtomId; 3];
        for (i, field) in fields.iter_mut().enumerate() {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            *field = AtomId::from_be_bytes(buf);
        }
        Ok(Self::from_rotated(fields, rotation))
    }
}

// ------------------------------------------------------------------------------------------------
// TemporalKey
// ------------------------------------------------------------------------------------------------

/// Canonical bitemporal composite key: three atoms plus the valid-time
/// interval and the transaction-time instant.
///
/// The validity interval is half-open: the fact holds for `t` with
/// `valid_from <= t < valid_to`. Transaction time records when this version
/// was written and is never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TemporalKey {
    /// Subject atom.
    pub s: AtomId,
    /// Predicate atom.
    pub p: AtomId,
    /// Object atom.
    pub o: AtomId,
    /// Start of the validity interval (inclusive).
    pub valid_from: Timestamp,
    /// End of the validity interval (exclusive); [`TIME_MAX`] means open-ended.
    pub valid_to: Timestamp,
    /// Instant this version was recorded.
    pub tx: Timestamp,
}

impl TemporalKey {
    /// Creates a key from canonical fields.
    pub fn new(
        s: AtomId,
        p: AtomId,
        o: AtomId,
        valid_from: Timestamp,
        valid_to: Timestamp,
        tx: Timestamp,
    ) -> Self {
        Self {
            s,
            p,
            o,
            valid_from,
            valid_to,
            tx,
        }
    }

    /// The non-temporal projection `(s, p, o)` of this key.
    pub fn triple(&self) -> TripleKey {
        TripleKey::new(self.s, self.p, self.o)
    }

    /// Validates that the interval is non-empty and not inverted.
    ///
    /// A zero-width interval (`valid_from == valid_to`) can never satisfy the
    /// half-open containment test and is rejected outright.
    pub fn validate_interval(valid_from: Timestamp, valid_to: Timestamp) -> Result<(), KeyError> {
        if valid_from >= valid_to {
            return Err(KeyError::InvalidInterval {
                valid_from,
                valid_to,
            });
        }
        Ok(())
    }

    /// Encodes this key for storage under a temporal `rotation`.
    pub fn encode(&self, rotation: Rotation) -> [u8; TEMPORAL_KEY_LEN] {
        debug_assert!(rotation.is_temporal());
        let mut out = [0u8; TEMPORAL_KEY_LEN];
        match rotation {
            Rotation::Tspo => {
                // Time-leading layout: valid_from first so that pure
                // time-range queries become a single contiguous scan.
                out[0..8].copy_from_slice(&self.valid_from.to_be_bytes());
                out[8..12].copy_from_slice(&self.s.to_be_bytes());
                out[12..16].copy_from_slice(&self.p.to_be_bytes());
                out[16..20].copy_from_slice(&self.o.to_be_bytes());
                out[20..28].copy_from_slice(&self.valid_to.to_be_bytes());
                out[28..36].copy_from_slice(&self.tx.to_be_bytes());
            }
            _ => {
                let atoms = self.triple().rotated(rotation);
                out[0..4].copy_from_slice(&atoms[0].to_be_bytes());
                out[4..8].copy_from_slice(&atoms[1].to_be_bytes());
                out[8..12].copy_from_slice(&atoms[2].to_be_bytes());
                out[12..20].copy_from_slice(&self.valid_from.to_be_bytes());
                out[20..28].copy_from_slice(&self.valid_to.to_be_bytes());
                out[28..36].copy_from_slice(&self.tx.to_be_bytes());
            }
        }
        out
    }

    /// Decodes a stored key back to canonical field order.
    pub fn decode(bytes: &[u8], rotation: Rotation) -> Result<Self, KeyError> {
        if bytes.len() != TEMPORAL_KEY_LEN {
            return Err(KeyError::InvalidLength {
                expected: TEMPORAL_KEY_LEN,
                actual: bytes.len(),
            });
        }
        let be_u32 = |off: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&bytes[off..off + 4]);
            u32::from_be_bytes(buf)
        };
        let be_u64 = |off: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[off..off + 8]);
            u64::from_be_bytes(buf)
        };
        let key = match rotation {
            Rotation::Tspo => Self {
                valid_from: be_u64(0),
                s: be_u32(8),
                p: be_u32(12),
                o: be_u32(16),
                valid_to: be_u64(20),
                tx: be_u64(28),
            },
            _ => {
                let atoms = [be_u32(0), be_u32(4), be_u32(8)];
                let triple = TripleKey::from_rotated(atoms, rotation);
                Self {
                    s: triple.s,
                    p: triple.p,
                    o: triple.o,
                    valid_from: be_u64(12),
                    valid_to: be_u64(20),
                    tx: be_u64(28),
                }
            }
        };
        Ok(key)
    }
}

// ------------------------------------------------------------------------------------------------
// EntryMeta — per-entry metadata block on temporal leaves
// ------------------------------------------------------------------------------------------------

/// Flag bit marking a logically deleted version.
pub const META_FLAG_TOMBSTONE: u16 = 0x0001;

/// Per-entry metadata stored alongside every temporal leaf entry.
///
/// Sixteen bytes, little-endian: creation stamp, seconds-resolution
/// modification delta, version counter, and flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryMeta {
    /// Millisecond epoch at which this version was first written.
    pub created_at: Timestamp,
    /// Seconds elapsed between creation and the last modification
    /// (saturating; 0 = never modified).
    pub modified_delta: u32,
    /// Number of times this version has been rewritten (interval truncation
    /// bumps it).
    pub version: u16,
    /// Flag bits; see [`META_FLAG_TOMBSTONE`].
    pub flags: u16,
}

impl EntryMeta {
    /// Fresh metadata for a version created at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            created_at: now,
            modified_delta: 0,
            version: 0,
            flags: 0,
        }
    }

    /// Whether the tombstone flag is set.
    pub fn is_tombstone(&self) -> bool {
        self.flags & META_FLAG_TOMBSTONE != 0
    }

    /// Stamps a modification at `now`, bumping the version counter.
    pub fn touch(&mut self, now: Timestamp) {
        let delta_ms = now.saturating_sub(self.created_at);
        self.modified_delta = u32::try_from(delta_ms / 1000).unwrap_or(u32::MAX);
        self.version = self.version.saturating_add(1);
    }

    /// Encodes into the fixed 16-byte block.
    pub fn encode(&self) -> [u8; ENTRY_META_LEN] {
        let mut out = [0u8; ENTRY_META_LEN];
        out[0..8].copy_from_slice(&self.created_at.to_le_bytes());
        out[8..12].copy_from_slice(&self.modified_delta.to_le_bytes());
        out[12..14].copy_from_slice(&self.version.to_le_bytes());
        out[14..16].copy_from_slice(&self.flags.to_le_bytes());
        out
    }

    /// Decodes from a 16-byte block.
    pub fn decode(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != ENTRY_META_LEN {
            return Err(KeyError::InvalidLength {
                expected: ENTRY_META_LEN,
                actual: bytes.len(),
            });
        }
        let mut u64buf = [0u8; 8];
        u64buf.copy_from_slice(&bytes[0..8]);
        let mut u32buf = [0u8; 4];
        u32buf.copy_from_slice(&bytes[8..12]);
        let mut a = [0u8; 2];
        a.copy_from_slice(&bytes[12..14]);
        let mut b = [0u8; 2];
        b.copy_from_slice(&bytes[14..16]);
        Ok(Self {
            created_at: u64::from_le_bytes(u64buf),
            modified_delta: u32::from_le_bytes(u32buf),
            version: u16::from_le_bytes(a),
            flags: u16::from_le_bytes(b),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Temporal query predicates
// ------------------------------------------------------------------------------------------------

/// How a temporal query matches validity intervals during enumeration.
///
/// Tombstoned entries are skipped under every predicate; that filtering
/// happens at the index layer, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalPredicate {
    /// Accept versions valid at instant `t`: `valid_from <= t < valid_to`.
    AsOf(Timestamp),
    /// Accept versions whose interval overlaps `[lo, hi)`:
    /// `valid_from < hi && valid_to > lo`.
    Range {
        /// Lower bound of the query window.
        lo: Timestamp,
        /// Upper bound of the query window.
        hi: Timestamp,
    },
    /// Accept every non-tombstoned version.
    AllTime,
    /// Accept versions valid now; resolved to [`TemporalPredicate::AsOf`]
    /// when the query starts.
    Current,
}

impl TemporalPredicate {
    /// Resolves [`TemporalPredicate::Current`] against the query start time.
    pub fn resolve(self, now: Timestamp) -> TemporalPredicate {
        match self {
            TemporalPredicate::Current => TemporalPredicate::AsOf(now),
            other => other,
        }
    }

    /// Whether a version with interval `[valid_from, valid_to)` is accepted.
    ///
    /// `Current` must be [`resolve`](Self::resolve)d first; an unresolved
    /// `Current` behaves as "valid at `TIME_MAX`", which is never what a
    /// query wants.
    pub fn accepts(&self, valid_from: Timestamp, valid_to: Timestamp) -> bool {
        match *self {
            TemporalPredicate::AsOf(t) => valid_from <= t && t < valid_to,
            TemporalPredicate::Range { lo, hi } => valid_from < hi && valid_to > lo,
            TemporalPredicate::AllTime => true,
            TemporalPredicate::Current => valid_from <= TIME_MAX && TIME_MAX < valid_to,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Terms and patterns
// ------------------------------------------------------------------------------------------------

/// Query-local variable identifier, assigned once at plan-compile time.
pub type VarId = u16;

/// A term position in a query pattern: either a concrete interned atom or a
/// variable to be bound.
///
/// Variables are recognized (leading `?`) exactly once when a pattern is
/// compiled; the hot loops only ever see this tagged form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Term {
    /// A concrete atom; matches entries carrying exactly this id.
    Atom(AtomId),
    /// A variable; matches anything and binds the matched atom.
    Var(VarId),
}

impl Term {
    /// Whether this position is bound to a concrete atom.
    pub fn is_bound(&self) -> bool {
        matches!(self, Term::Atom(_))
    }

    /// The concrete atom, if bound.
    pub fn atom(&self) -> Option<AtomId> {
        match self {
            Term::Atom(a) => Some(*a),
            Term::Var(_) => None,
        }
    }

    /// The variable id, if unbound.
    pub fn var(&self) -> Option<VarId> {
        match self {
            Term::Atom(_) => None,
            Term::Var(v) => Some(*v),
        }
    }
}

/// A triple pattern: three term positions plus an optional graph filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriplePattern {
    /// Subject position.
    pub s: Term,
    /// Predicate position.
    pub p: Term,
    /// Object position.
    pub o: Term,
    /// Restrict matching to this graph; `None` unions all graphs.
    pub graph: Option<AtomId>,
}

impl TriplePattern {
    /// Creates a pattern over the default graph-union.
    pub fn new(s: Term, p: Term, o: Term) -> Self {
        Self {
            s,
            p,
            o,
            graph: None,
        }
    }

    /// Same pattern restricted to one graph.
    pub fn in_graph(mut self, graph: AtomId) -> Self {
        self.graph = Some(graph);
        self
    }

    /// The variables appearing in this pattern, in position order.
    pub fn variables(&self) -> impl Iterator<Item = VarId> + '_ {
        [self.s, self.p, self.o]
            .into_iter()
            .filter_map(|t| t.var())
            .collect::<smallvec::SmallVec<[VarId; 3]>>()
            .into_iter()
    }
}
