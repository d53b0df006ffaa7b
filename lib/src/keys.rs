//! Byte layout of index keys and values.
//!
//! An index key is `context SEP c0 SEP c1 SEP c2 SEP` where `c0..c2` are the
//! subject, predicate and object ids rotated by the index's offset and
//! `context` is empty for the canonical (union) entry. Ids are written as
//! decimal digits, so the separator never occurs inside a component.

use crate::errors::{Result, StoreError};
use std::collections::BTreeSet;
use std::fmt;

/// Field separator inside keys and context-set values.
pub const SEP: u8 = b'^';

const _: () = assert!(!SEP.is_ascii_digit());

/// Interned id of a term. Positive; rendered as decimal digits on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TermId(u64);

impl TermId {
    pub fn new(raw: u64) -> Option<Self> {
        (raw > 0).then_some(TermId(raw))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }

    /// Parses the on-disk form; anything but a positive decimal number is corrupt.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
            return Err(StoreError::CorruptEntry(format!(
                "term id {:?} is not a decimal number",
                String::from_utf8_lossy(bytes)
            )));
        }
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .and_then(TermId::new)
            .ok_or_else(|| {
                StoreError::CorruptEntry(format!(
                    "term id {:?} is out of range",
                    String::from_utf8_lossy(bytes)
                ))
            })
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subject, predicate and object ids, in that order.
pub type IdTriple = [TermId; 3];

/// One of the three cyclic orderings of (subject, predicate, object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
    Spo = 0,
    Pos = 1,
    Osp = 2,
}

impl Rotation {
    pub const ALL: [Rotation; 3] = [Rotation::Spo, Rotation::Pos, Rotation::Osp];

    pub fn from_offset(offset: usize) -> Self {
        match offset % 3 {
            0 => Rotation::Spo,
            1 => Rotation::Pos,
            _ => Rotation::Osp,
        }
    }

    pub fn offset(self) -> usize {
        self as usize
    }

    /// Name of the file backing this rotation's index.
    pub fn file_stem(self) -> &'static str {
        match self {
            Rotation::Spo => "cspo",
            Rotation::Pos => "cpos",
            Rotation::Osp => "cosp",
        }
    }

    /// Position (0 = subject, 1 = predicate, 2 = object) stored at key slot `slot`.
    pub fn position(self, slot: usize) -> usize {
        (self.offset() + slot) % 3
    }

    pub fn rotate(self, spo: &IdTriple) -> IdTriple {
        [spo[self.position(0)], spo[self.position(1)], spo[self.position(2)]]
    }

    pub fn encode_key(self, context: Option<TermId>, spo: &IdTriple) -> Vec<u8> {
        key_prefix(context, &self.rotate(spo))
    }

    /// Inverse of [`Rotation::encode_key`]; returns the context and ids in s, p, o order.
    pub fn decode_key(self, key: &[u8]) -> Result<(Option<TermId>, IdTriple)> {
        let parts: Vec<&[u8]> = key.split(|b| *b == SEP).collect();
        if parts.len() != 5 || !parts[4].is_empty() {
            return Err(StoreError::CorruptEntry(format!(
                "index key {:?} does not have four fields",
                String::from_utf8_lossy(key)
            )));
        }
        let context = if parts[0].is_empty() {
            None
        } else {
            Some(TermId::parse(parts[0])?)
        };
        let mut ids = [TermId(1); 3];
        for slot in 0..3 {
            ids[self.position(slot)] = TermId::parse(parts[slot + 1])?;
        }
        Ok((context, ids))
    }
}

/// `context SEP` followed by `component SEP` for each given component.
pub fn key_prefix(context: Option<TermId>, components: &[TermId]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 * (components.len() + 1));
    if let Some(c) = context {
        out.extend_from_slice(&c.to_bytes());
    }
    out.push(SEP);
    for id in components {
        out.extend_from_slice(&id.to_bytes());
        out.push(SEP);
    }
    out
}

/// Value of a canonical entry: the contexts holding the triple, `SEP`-joined.
pub fn encode_context_set(contexts: &BTreeSet<TermId>) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, c) in contexts.iter().enumerate() {
        if i > 0 {
            out.push(SEP);
        }
        out.extend_from_slice(&c.to_bytes());
    }
    out
}

pub fn decode_context_set(value: &[u8]) -> Result<BTreeSet<TermId>> {
    value
        .split(|b| *b == SEP)
        .filter(|part| !part.is_empty())
        .map(TermId::parse)
        .collect()
}
