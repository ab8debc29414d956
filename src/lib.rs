//! # AevumDB
//!
//! An embeddable, persistent **bitemporal RDF quad store** with a streaming
//! query runtime, built on atom-interned, memory-mapped B+Trees. Designed
//! for point-in-time queries over evolving knowledge and crash-safe
//! operation.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         Store                              │
//! │  ┌──────────────────────┐   ┌───────────────────────────┐  │
//! │  │   Query operators    │   │     N3 Patch executor     │  │
//! │  │  BGP · OPTIONAL ·    │   │  WHERE → DELETES/INSERTS  │  │
//! │  │  paths · modifiers   │   │  compensating rollback    │  │
//! │  └──────────┬───────────┘   └─────────────┬─────────────┘  │
//! │             │        pattern scans        │                │
//! │  ┌──────────▼────────────────────────────▼───────────────┐ │
//! │  │                   Multi-Index Store                   │ │
//! │  │   graph partitions × rotations (SPO/POS/OSP/…/TSPO)   │ │
//! │  └──────┬───────────────────────────────────────┬────────┘ │
//! │  ┌──────▼───────┐                       ┌───────▼────────┐ │
//! │  │  Atom store  │                       │  B+Trees over  │ │
//! │  │  (interning) │                       │  mmap'd pages  │ │
//! │  └──────────────┘                       └────────────────┘ │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`store`] | Consumer facade — open, insert, query, patch, statistics, close |
//! | [`index`] | Coordinated per-rotation trees, graph partitions, index selection |
//! | [`query`] | Streaming operators — patterns, joins, paths, filters, modifiers, aggregates |
//! | [`patch`] | Atomic WHERE-bound DELETE/INSERT batches |
//! | [`btree`] | Layout-parameterized B+Tree over fixed-size pages |
//! | [`pager`] | Memory-mapped page file, metadata fencing, LRU cache |
//! | [`atoms`] | Persistent term ↔ atom interning |
//! | [`keys`] | Composite key model — rotations, temporal predicates, terms |
//!
//! ## Key Features
//!
//! - **Bitemporal facts** — every assertion carries a valid-time interval
//!   and an immutable transaction time; queries ask *as-of*, *range*,
//!   *all-time*, or *current*.
//! - **Multi-index routing** — each triple is stored under several field
//!   rotations; a deterministic table picks the index that turns any
//!   pattern into one contiguous range scan.
//! - **memcmp keys** — big-endian fixed-width composite keys make byte
//!   compare equal semantic compare all the way down.
//! - **Streaming operators** — pull-based iterators with cooperative
//!   cancellation; nothing materializes unless semantics demand it.
//! - **Crash safety** — page writes fence before the metadata block; a
//!   crash rolls back to the last committed state.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aevumdb::store::{Store, StoreOptions, VarTable};
//! use aevumdb::keys::TemporalPredicate;
//! use aevumdb::query::collect_all;
//!
//! let store = Store::open("/tmp/my_graph", StoreOptions::default()).unwrap();
//!
//! // Assert a current fact and a historical one.
//! store.insert_triple("<alice>", "<works>", "<OpenAI>").unwrap();
//! store
//!     .insert_temporal("<alice>", "<works>", "<Acme>",
//!                      1_577_836_800_000, 1_688_169_600_000, None)
//!     .unwrap();
//!
//! // Who did Alice work for in mid-2021?
//! let snap = store.snapshot();
//! let mut vars = VarTable::new();
//! let pattern = snap.compile_pattern(&mut vars, "<alice>", "<works>", "?org", None);
//! let mut query = snap
//!     .query(&[pattern], Some(TemporalPredicate::AsOf(1_622_505_600_000)))
//!     .unwrap();
//! let rows = collect_all(&mut query).unwrap();
//! assert_eq!(rows.len(), 1);
//!
//! store.close().unwrap();
//! ```

pub mod atoms;
pub mod btree;
pub mod index;
pub mod keys;
pub mod pager;
pub mod patch;
pub mod query;
pub mod store;

pub use keys::{TemporalPredicate, Term, Timestamp, TriplePattern};
pub use patch::{N3Patch, PatchCounts};
pub use query::{CancelFlag, Solution, SolutionIter};
pub use store::{ErrorKind, Snapshot, Store, StoreError, StoreOptions, VarTable};
