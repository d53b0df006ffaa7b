//! Conversion between domain terms and the canonical bytes the dictionary interns.

use crate::errors::{Result, StoreError};
use oxigraph::model::Term;
use std::str::FromStr;

/// Bijective mapping between a term and its canonical byte encoding.
///
/// Two terms are the same term exactly when their encodings are equal.
pub trait TermCodec: Send + Sync {
    type Term: Clone + 'static;

    fn encode(&self, term: &Self::Term) -> Vec<u8>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Term>;
}

/// Encodes oxigraph terms in their N-Triples form (`<iri>`, `_:b0`, `"lex"@en`, ...).
#[derive(Debug, Default, Clone, Copy)]
pub struct NTriplesCodec;

impl TermCodec for NTriplesCodec {
    type Term = Term;

    fn encode(&self, term: &Term) -> Vec<u8> {
        term.to_string().into_bytes()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Term> {
        let text = std::str::from_utf8(bytes).map_err(|e| StoreError::InvalidTerm(e.to_string()))?;
        Term::from_str(text).map_err(|e| StoreError::InvalidTerm(format!("{}: {}", text, e)))
    }
}
