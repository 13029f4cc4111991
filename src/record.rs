// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::delta_list::Cursor;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

/// Tracks whether a [`Record`] is still safe to mutate.
///
/// Mirrors the magic-number sentinel of the original implementation: once a
/// record has been consumed by `put_record` or `remove_record` any further
/// use is rejected with [`Error::BadState`] instead of silently corrupting
/// the index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum RecordState {
    Located,
    Inserted,
    Removed,
}

/// A located (or not-found) entry for one fingerprint, as returned by
/// `get_record`. Holds a live cursor into the delta-list primitive and,
/// when produced by a [`crate::composite::CompositeIndex`], the zone whose
/// mutex must be reacquired for any subsequent mutation.
///
/// A `Record` is tied to the index that produced it: it is only ever handed
/// back to the same index's `put_record`/`set_record_chapter`/`remove_record`.
#[derive(Debug)]
pub struct Record {
    pub fingerprint: Fingerprint,
    pub address: u32,
    pub zone: u32,
    pub cursor: Cursor,
    pub is_found: bool,
    pub is_collision: bool,
    pub virtual_chapter: Option<u64>,
    /// `true` when this record came from the composite index's sampled
    /// (hook) sub-index, and therefore must be mutated under that zone's
    /// hook mutex.
    pub via_hook: bool,
    state: RecordState,
}

impl Record {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn located(
        fingerprint: Fingerprint,
        address: u32,
        zone: u32,
        cursor: Cursor,
        is_found: bool,
        is_collision: bool,
        virtual_chapter: Option<u64>,
        via_hook: bool,
    ) -> Self {
        Self {
            fingerprint,
            address,
            zone,
            cursor,
            is_found,
            is_collision,
            virtual_chapter,
            via_hook,
            state: RecordState::Located,
        }
    }

    pub(crate) fn require_live(&self) -> Result<()> {
        if self.state != RecordState::Located {
            return Err(Error::BadState(
                "record has already been inserted or removed".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn require_found(&self) -> Result<()> {
        self.require_live()?;
        if !self.is_found {
            return Err(Error::BadState(
                "record does not refer to an existing entry".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn mark_inserted(&mut self, virtual_chapter: u64) {
        self.is_found = true;
        self.virtual_chapter = Some(virtual_chapter);
        self.state = RecordState::Inserted;
    }

    pub(crate) fn mark_updated(&mut self, virtual_chapter: u64) {
        self.virtual_chapter = Some(virtual_chapter);
    }

    pub(crate) fn mark_removed(&mut self) {
        self.is_found = false;
        self.virtual_chapter = None;
        self.state = RecordState::Removed;
    }
}
