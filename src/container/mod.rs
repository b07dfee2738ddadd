//! Save and load orchestration.
//!
//! Both directions run strictly in sequence. Any failure aborts the whole operation; a
//! partially written sink must be discarded by the caller.

use std::fmt::Debug;

use tracing::debug;

mod load;
mod save;

pub use load::read_database;
pub use save::write_database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStage {
    Init,
    HeaderWritten,
    KeyDerived,
    EnvelopeOpen,
    DocumentWritten,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Init,
    HeaderParsed,
    KeyDerived,
    EnvelopeOpen,
    VerificationChecked,
    DocumentParsed,
    Finalized,
}

/// Tracks the current stage of one operation for diagnostics.
pub(crate) struct Stages<S> {
    operation: &'static str,
    current: S,
}

impl<S: Debug + Copy> Stages<S> {
    pub(crate) fn new(operation: &'static str, initial: S) -> Self {
        debug!(operation, stage = ?initial, "starting");
        Self {
            operation,
            current: initial,
        }
    }

    pub(crate) fn enter(&mut self, next: S) {
        debug!(operation = self.operation, from = ?self.current, to = ?next, "stage");
        self.current = next;
    }

    pub(crate) fn current(&self) -> S {
        self.current
    }
}
