//! `quadstore` is an embedded quad store: triples scoped to named graphs,
//! persisted in ordered key-value files and answered through range scans.
//!
//! Terms are interned into compact ids ([`dictionary`]), each triple is written
//! to three rotated indexes ([`index`]) so that any combination of bound
//! subject, predicate and object is a contiguous range in one of them
//! ([`planner`]), and the graphs holding each triple are kept on a canonical
//! union entry ([`contexts`]). Writes are flushed by a debounced background
//! thread ([`sync`]).
//!
//! ```no_run
//! use oxigraph::model::{NamedNode, Term};
//! use quadstore::{OpenMode, QuadStore, TripleKind, TripleStore};
//!
//! # fn main() -> quadstore::Result<()> {
//! let iri = |s: &str| -> Term { NamedNode::new_unchecked(s).into() };
//! let mut store = QuadStore::new();
//! store.open("./data".as_ref(), OpenMode::Create)?;
//! store.add(&iri("urn:a"), &iri("urn:b"), &iri("urn:c"), &iri("urn:g"), TripleKind::Asserted)?;
//! for matched in store.triples(Some(&iri("urn:a")), None, None, None)? {
//!     println!("{:?}", matched?);
//! }
//! store.close()?;
//! # Ok(())
//! # }
//! ```

extern crate derive_builder;

pub mod api;
pub mod codec;
pub mod config;
pub mod contexts;
pub mod dictionary;
pub mod errors;
pub mod index;
pub mod keys;
pub mod kv;
pub mod options;
pub mod planner;
pub mod store;
pub mod sync;

pub use api::{init_logging, MatchedTriple, TermTriple, TripleStore};
pub use codec::{NTriplesCodec, TermCodec};
pub use config::{StoreOptions, SyncOptions};
pub use errors::{Result, StoreError};
pub use keys::TermId;
pub use options::{OpenMode, OpenStatus, TripleKind};
pub use store::{QuadStore, StoreStats};
