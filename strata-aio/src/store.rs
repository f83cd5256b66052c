//!
//! Object store client interface
//!
//! The consumed surface of the content addressed object store: an
//! asynchronous client submitting reads and operation bundles against
//! named objects, with per snapshot read views and self managed write
//! snapshot contexts.
//!
use crate::completion::Completion;
use crate::errors::Result;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;

/// Snapshot identifier
pub type SnapId = u64;

/// Reads with no snapshot pinned observe the object head
pub const NO_SNAP: SnapId = u64::MAX;

/// Write snapshot context submitted with every write so the store can
/// preserve older snapshot versions through copy on write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapContext {
    pub seq: u64,
    pub snaps: Vec<SnapId>,
}

/// One step of an object operation bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpStep {
    Stat,
    Read { off: u64, len: u64 },
    Write { off: u64, data: Bytes },
    Zero { off: u64, len: u64 },
    Truncate { off: u64 },
    Remove,
    Exec {
        cls: String,
        method: String,
        data: Bytes,
    },
}

/// An ordered bundle of steps applied atomically to one object
#[derive(Debug, Clone, Default)]
pub struct ObjectOperation {
    steps: Vec<OpStep>,
}

impl ObjectOperation {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn stat(&mut self) -> &mut Self {
        self.steps.push(OpStep::Stat);
        self
    }

    /// Put an existence probe in front of the other steps
    pub fn prepend_stat(&mut self) -> &mut Self {
        self.steps.insert(0, OpStep::Stat);
        self
    }

    pub fn read(&mut self, off: u64, len: u64) -> &mut Self {
        self.steps.push(OpStep::Read { off, len });
        self
    }

    pub fn write(&mut self, off: u64, data: Bytes) -> &mut Self {
        self.steps.push(OpStep::Write { off, data });
        self
    }

    pub fn zero(&mut self, off: u64, len: u64) -> &mut Self {
        self.steps.push(OpStep::Zero { off, len });
        self
    }

    pub fn truncate(&mut self, off: u64) -> &mut Self {
        self.steps.push(OpStep::Truncate { off });
        self
    }

    pub fn remove(&mut self) -> &mut Self {
        self.steps.push(OpStep::Remove);
        self
    }

    pub fn exec(&mut self, cls: &str, method: &str, data: Bytes) -> &mut Self {
        self.steps.push(OpStep::Exec {
            cls: cls.to_string(),
            method: method.to_string(),
            data,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn steps(&self) -> &[OpStep] {
        &self.steps
    }
}

/// Result buffers of a read, shared between the request and the store
#[derive(Debug, Default)]
pub struct ReadResult {
    pub data: BytesMut,
    /// `(offset, length)` extent map filled by sparse reads
    pub extents: Vec<(u64, u64)>,
}

pub type SharedReadResult = Arc<Mutex<ReadResult>>;

pub fn shared_read_result() -> SharedReadResult {
    Arc::new(Mutex::new(ReadResult::default()))
}

/// Asynchronous object store client
///
/// Submission returns once the operation is queued; the result arrives
/// through the completion as an integer code. A completion is invoked
/// at most once, never from inside the submitting call, and never
/// while holding locks that the registered callback acquires.
pub trait ObjectStore: Send + Sync {
    /// Read `len` bytes at `off`, observing `snap_id`
    fn aio_read(
        &self,
        oid: &str,
        snap_id: SnapId,
        off: u64,
        len: u64,
        out: SharedReadResult,
        completion: Completion,
    ) -> Result<()>;

    /// Like `aio_read`, but also fills the extent map of `out`
    fn aio_sparse_read(
        &self,
        oid: &str,
        snap_id: SnapId,
        off: u64,
        len: u64,
        out: SharedReadResult,
        completion: Completion,
    ) -> Result<()>;

    /// Apply an operation bundle; read class steps fill `out`
    fn aio_operate(
        &self,
        oid: &str,
        snapc: Option<&SnapContext>,
        op: &ObjectOperation,
        out: Option<SharedReadResult>,
        completion: Completion,
    ) -> Result<()>;
}

/// Per request I/O context
///
/// Pairs a store handle with the snapshot that reads observe and the
/// snapshot context submitted with writes. Requests duplicate the
/// image context and pin their own snapshot parameters.
#[derive(Clone)]
pub struct IoCtx {
    store: Arc<dyn ObjectStore>,
    snap_read: SnapId,
    write_snapc: Option<SnapContext>,
}

impl IoCtx {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            snap_read: NO_SNAP,
            write_snapc: None,
        }
    }

    /// Duplicate this context
    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// Pin the snapshot that reads observe
    pub fn snap_set_read(&mut self, snap_id: SnapId) {
        self.snap_read = snap_id;
    }

    /// Configure the self managed snapshot context for writes
    pub fn selfmanaged_snap_set_write_ctx(&mut self, seq: u64, snaps: Vec<SnapId>) {
        self.write_snapc = Some(SnapContext { seq, snaps });
    }

    pub fn aio_read(
        &self,
        oid: &str,
        off: u64,
        len: u64,
        out: SharedReadResult,
        completion: Completion,
    ) -> Result<()> {
        self.store
            .aio_read(oid, self.snap_read, off, len, out, completion)
    }

    pub fn aio_sparse_read(
        &self,
        oid: &str,
        off: u64,
        len: u64,
        out: SharedReadResult,
        completion: Completion,
    ) -> Result<()> {
        self.store
            .aio_sparse_read(oid, self.snap_read, off, len, out, completion)
    }

    pub fn aio_operate(
        &self,
        oid: &str,
        op: &ObjectOperation,
        out: Option<SharedReadResult>,
        completion: Completion,
    ) -> Result<()> {
        self.store
            .aio_operate(oid, self.write_snapc.as_ref(), op, out, completion)
    }
}
