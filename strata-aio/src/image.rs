//!
//! Image context
//!
//! Shared state of one open block image: its object store contexts,
//! striping layout, snapshot table and parent linkage. Snapshot state
//! lives under `snap_lock`, the parent link under `parent_lock`; the
//! canonical lock order is `snap_lock` first. [`ImageCtx::with_parent_state`]
//! is the only way to reach the parent link, which pins that order for
//! the whole crate.
//!
use crate::completion::Completion;
use crate::errors::{Error, Result};
use crate::store::{IoCtx, SharedReadResult, SnapContext, SnapId};
use crate::striper::ObjectLayout;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;

/// Image level read interface of a parent image
///
/// `read_from_parent` goes through the image layer rather than the
/// object store so that the parent's own clone chain keeps working.
pub trait ParentImage: Send + Sync {
    /// Read image relative extents; bytes land in `out` in extent order
    fn aio_read(
        &self,
        image_extents: &[(u64, u64)],
        out: SharedReadResult,
        completion: Completion,
    ) -> Result<()>;
}

/// Parent linkage of a cloned image
pub struct ParentLink {
    pub image: Arc<dyn ParentImage>,
}

struct SnapState {
    /// Snapshot sequence for the write context
    seq: u64,
    snaps: Vec<SnapId>,
    /// Parent overlap in image bytes, per snapshot. The `NO_SNAP`
    /// entry covers the image head.
    overlaps: HashMap<SnapId, u64>,
}

/// Context of one open image
pub struct ImageCtx {
    pub name: String,
    pub data_ctx: IoCtx,
    pub md_ctx: IoCtx,
    pub layout: ObjectLayout,
    snap_lock: Mutex<SnapState>,
    parent_lock: Mutex<Option<ParentLink>>,
}

/// View over snapshot and parent state with both locks held in order
pub struct ParentView<'a> {
    snaps: MutexGuard<'a, SnapState>,
    parent: MutexGuard<'a, Option<ParentLink>>,
}

impl ParentView<'_> {
    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    /// Parent overlap of the image at `snap_id`
    ///
    /// An image without a parent has no overlap at any snapshot. A
    /// missing overlap entry on a cloned image is a programming error;
    /// callers assert on it rather than recover.
    pub fn get_parent_overlap(&self, snap_id: SnapId) -> Result<u64> {
        if self.parent.is_none() {
            return Ok(0);
        }
        self.snaps
            .overlaps
            .get(&snap_id)
            .copied()
            .ok_or(Error::UnknownSnapshot(snap_id))
    }
}

impl ImageCtx {
    pub fn new(name: &str, data_ctx: IoCtx, md_ctx: IoCtx, layout: ObjectLayout) -> Self {
        Self {
            name: name.to_string(),
            data_ctx,
            md_ctx,
            layout,
            snap_lock: Mutex::new(SnapState {
                seq: 0,
                snaps: Vec::new(),
                overlaps: HashMap::new(),
            }),
            parent_lock: Mutex::new(None),
        }
    }

    /// Take `snap_lock` then `parent_lock` and lend the guarded state
    pub fn with_parent_state<R>(&self, f: impl FnOnce(&ParentView) -> R) -> R {
        let snaps = self.snap_lock.lock();
        let parent = self.parent_lock.lock();
        f(&ParentView { snaps, parent })
    }

    /// Current write snapshot context
    pub fn snap_context(&self) -> SnapContext {
        let snaps = self.snap_lock.lock();
        SnapContext {
            seq: snaps.seq,
            snaps: snaps.snaps.clone(),
        }
    }

    /// Replace the write snapshot context
    pub fn set_snap_context(&self, seq: u64, snaps: Vec<SnapId>) {
        let mut state = self.snap_lock.lock();
        state.seq = seq;
        state.snaps = snaps;
    }

    /// Record the parent overlap at `snap_id`
    pub fn set_parent_overlap(&self, snap_id: SnapId, overlap: u64) {
        self.snap_lock.lock().overlaps.insert(snap_id, overlap);
    }

    /// Attach or detach the parent image
    pub fn set_parent(&self, parent: Option<ParentLink>) {
        *self.parent_lock.lock() = parent;
    }
}

/// Clip image extents to the first `overlap` bytes of the image.
///
/// Extents entirely past the overlap are dropped, the one straddling it
/// is shortened. Returns the number of bytes remaining.
pub fn prune_parent_extents(extents: &mut Vec<(u64, u64)>, overlap: u64) -> u64 {
    extents.retain_mut(|(off, len)| {
        if *off >= overlap {
            return false;
        }
        *len = u64::min(*len, overlap - *off);
        *len > 0
    });
    extents.iter().map(|(_, len)| len).sum()
}
