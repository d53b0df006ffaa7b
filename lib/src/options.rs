//! Shared option types that replace boolean flag parameters in the Rust API.

/// Controls whether `open` lays down a fresh store or attaches to an existing one.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpenMode {
    /// Create the directory and every store file; refuse a non-empty directory.
    Create,
    /// Open existing files; a missing directory is reported as [`OpenStatus::NoStore`].
    Existing,
}

impl OpenMode {
    pub fn is_create(self) -> bool {
        matches!(self, OpenMode::Create)
    }
}

impl From<bool> for OpenMode {
    fn from(value: bool) -> Self {
        if value {
            OpenMode::Create
        } else {
            OpenMode::Existing
        }
    }
}

impl From<OpenMode> for bool {
    fn from(value: OpenMode) -> Self {
        value.is_create()
    }
}

/// Whether an added triple participates in the union (default) view.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum TripleKind {
    /// Recorded in its context and in the union view.
    #[default]
    Asserted,
    /// Recorded only within its context (formula / reified data).
    Quoted,
}

impl TripleKind {
    pub fn is_quoted(self) -> bool {
        matches!(self, TripleKind::Quoted)
    }
}

impl From<bool> for TripleKind {
    fn from(quoted: bool) -> Self {
        if quoted {
            TripleKind::Quoted
        } else {
            TripleKind::Asserted
        }
    }
}

/// Outcome of a successful `open`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpenStatus {
    /// The store is open and ready.
    Valid,
    /// A non-create open found no store at the path; the store stays closed.
    NoStore,
}
