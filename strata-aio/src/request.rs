//!
//! Object I/O requests
//!
//! A request owns one outstanding logical operation against a single
//! object. It is advanced only from the store completion callback:
//! `should_complete(r)` either issues a follow up operation and returns
//! false, or returns true and the user completion fires with the
//! effective result. Reads fall back to the parent image when the
//! object is absent; guarded writes probe existence and promote parent
//! bytes ("copy up") before applying their payload.
//!
use crate::completion::Completion;
use crate::errors::Result;
use crate::image::{prune_parent_extents, ImageCtx, ParentView};
use crate::store::{
    shared_read_result, IoCtx, ObjectOperation, SharedReadResult, SnapContext, SnapId,
};
use crate::striper;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// User facing completion invoked with the effective result code
pub type RequestCallback = Box<dyn FnOnce(i32) + Send>;

/// State shared by every request kind
struct RequestCore {
    image: Arc<ImageCtx>,
    ioctx: IoCtx,
    oid: String,
    object_no: u64,
    object_off: u64,
    object_len: u64,
    snap_id: SnapId,
    completion: Option<RequestCallback>,
    /// Pending parent read, if one is outstanding
    parent_completion: Option<Completion>,
    /// Read buffer; object reads, existence probes and parent reads
    /// all land here
    read_data: SharedReadResult,
    /// Treat an absent object as a zero read
    hide_enoent: bool,
}

impl RequestCore {
    #[allow(clippy::too_many_arguments)]
    fn new(
        image: &Arc<ImageCtx>,
        oid: &str,
        object_no: u64,
        object_off: u64,
        object_len: u64,
        snap_id: SnapId,
        completion: RequestCallback,
        hide_enoent: bool,
    ) -> Self {
        let mut ioctx = image.data_ctx.dup();
        ioctx.snap_set_read(snap_id);
        Self {
            image: image.clone(),
            ioctx,
            oid: oid.to_string(),
            object_no,
            object_off,
            object_len,
            snap_id,
            completion: Some(completion),
            parent_completion: None,
            read_data: shared_read_result(),
            hide_enoent,
        }
    }

    /// Start an image level read against the parent covering
    /// `image_extents`; `view` proves the snap and parent locks are
    /// held. The completion re-enters the owning request.
    fn read_from_parent(
        &mut self,
        view: &ParentView,
        image_extents: &[(u64, u64)],
        completion: Completion,
    ) -> Result<()> {
        assert!(self.parent_completion.is_none());
        let parent = view.parent().expect("read_from_parent requires a parent");
        log::trace!(
            "read_from_parent [{}]: extents {:?}",
            self.oid,
            image_extents
        );
        self.parent_completion = Some(completion.clone());
        parent
            .image
            .aio_read(image_extents, self.read_data.clone(), completion)
    }

    /// Map the raw result onto the user visible code
    fn effective_result(&self, r: i32) -> i32 {
        if r == -libc::ENOENT && self.hide_enoent {
            0
        } else {
            r
        }
    }

    fn fire_completion(&mut self, r: i32) {
        if let Some(parent_completion) = self.parent_completion.take() {
            parent_completion.release();
        }
        if let Some(callback) = self.completion.take() {
            callback(r);
        }
    }
}

impl Drop for RequestCore {
    fn drop(&mut self) {
        if let Some(parent_completion) = self.parent_completion.take() {
            parent_completion.release();
        }
    }
}

//
// Read
//

/// Read of one object range, with transparent parent fallback
pub struct AioRead {
    core: RequestCore,
    weak_self: Weak<Mutex<AioRead>>,
    tried_parent: bool,
    sparse: bool,
}

impl AioRead {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        image: &Arc<ImageCtx>,
        oid: &str,
        object_no: u64,
        object_off: u64,
        object_len: u64,
        snap_id: SnapId,
        sparse: bool,
        hide_enoent: bool,
        completion: RequestCallback,
    ) -> Arc<Mutex<Self>> {
        Arc::new_cyclic(|weak| {
            Mutex::new(Self {
                core: RequestCore::new(
                    image,
                    oid,
                    object_no,
                    object_off,
                    object_len,
                    snap_id,
                    completion,
                    hide_enoent,
                ),
                weak_self: weak.clone(),
                tried_parent: false,
                sparse,
            })
        })
    }

    /// Submit the object read; the result arrives asynchronously
    pub fn send(req: &Arc<Mutex<Self>>) -> Result<()> {
        let completion = {
            let me = req.clone();
            Completion::new(move |r| Self::advance(&me, r))
        };
        let guard = req.lock();
        log::debug!(
            "read [{}]: send {}~{} snap {}",
            guard.core.oid,
            guard.core.object_off,
            guard.core.object_len,
            guard.core.snap_id
        );
        let core = &guard.core;
        if guard.sparse {
            core.ioctx.aio_sparse_read(
                &core.oid,
                core.object_off,
                core.object_len,
                core.read_data.clone(),
                completion,
            )
        } else {
            core.ioctx.aio_read(
                &core.oid,
                core.object_off,
                core.object_len,
                core.read_data.clone(),
                completion,
            )
        }
    }

    /// Whether the parent fallback has been taken
    pub fn tried_parent(&self) -> bool {
        self.tried_parent
    }

    /// Handle on the result buffers
    pub fn read_result(&self) -> SharedReadResult {
        self.core.read_data.clone()
    }

    fn advance(req: &Arc<Mutex<Self>>, r: i32) {
        let mut guard = req.lock();
        if guard.should_complete(r) {
            guard.finish(r);
        }
    }

    fn make_completion(&self) -> Completion {
        let me = self.weak_self.upgrade().expect("request dropped");
        Completion::new(move |r| Self::advance(&me, r))
    }

    fn should_complete(&mut self, r: i32) -> bool {
        log::debug!("read [{}]: should_complete r={}", self.core.oid, r);

        if !self.tried_parent && r == -libc::ENOENT {
            let image = self.core.image.clone();
            let completion = self.make_completion();
            let issued = image.with_parent_state(|view| {
                // reverse map the object range onto the image
                let mut image_extents = striper::extent_to_file(
                    &image.layout,
                    self.core.object_no,
                    self.core.object_off,
                    self.core.object_len,
                );
                let image_overlap = view
                    .get_parent_overlap(self.core.snap_id)
                    .expect("parent overlap lookup failed");
                let object_overlap = prune_parent_extents(&mut image_extents, image_overlap);
                if object_overlap == 0 {
                    return false;
                }
                self.tried_parent = true;
                if let Err(err) = self.core.read_from_parent(view, &image_extents, completion) {
                    log::error!("read [{}]: parent read submission: {}", self.core.oid, err);
                }
                true
            });
            if issued {
                return false;
            }
        }

        true
    }

    fn finish(&mut self, r: i32) {
        let r = self.core.effective_result(r);
        if r >= 0 && !self.sparse {
            // zero fill a short read up to the object length
            let mut out = self.core.read_data.lock();
            if (out.data.len() as u64) < self.core.object_len {
                out.data.resize(self.core.object_len as usize, 0);
            }
        }
        log::debug!("read [{}]: complete r={}", self.core.oid, r);
        self.core.fire_completion(r);
    }
}

//
// Writes
//

/// Write request states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// Probing object existence before touching a possibly
    /// parent-backed object
    CheckExists,
    /// Promoting parent bytes into the object
    Copyup,
    /// Applying the payload
    Final,
}

/// Payload of a concrete write request
///
/// The same steps go into the plain write operation and, after a copy
/// up, behind the promoted parent bytes.
#[derive(Debug, Clone)]
pub enum WriteAction {
    Write { data: Bytes },
    Zero,
    Truncate,
    Remove,
}

impl WriteAction {
    fn add_ops(&self, off: u64, len: u64, op: &mut ObjectOperation) {
        match self {
            WriteAction::Write { data } => {
                op.write(off, data.clone());
            }
            WriteAction::Zero => {
                op.zero(off, len);
            }
            WriteAction::Truncate => {
                op.truncate(off);
            }
            WriteAction::Remove => {
                op.remove();
            }
        }
    }
}

/// Modifying request over one object, with existence guard and copy up
pub struct WriteRequest {
    core: RequestCore,
    weak_self: Weak<Mutex<WriteRequest>>,
    state: WriteState,
    action: WriteAction,
    /// Image extents covered by this object, for the copy up read
    object_image_extents: Vec<(u64, u64)>,
    /// Parent overlap in object local bytes
    parent_overlap: u64,
    /// Existence probe, submitted first for guarded writes
    read_op: ObjectOperation,
    /// Payload operation
    write_op: ObjectOperation,
}

impl WriteRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        image: &Arc<ImageCtx>,
        oid: &str,
        object_no: u64,
        object_off: u64,
        object_len: u64,
        object_image_extents: Vec<(u64, u64)>,
        object_overlap: u64,
        snapc: &SnapContext,
        snap_id: SnapId,
        action: WriteAction,
        hide_enoent: bool,
        completion: RequestCallback,
    ) -> Arc<Mutex<Self>> {
        Arc::new_cyclic(|weak| {
            let mut core = RequestCore::new(
                image,
                oid,
                object_no,
                object_off,
                object_len,
                snap_id,
                completion,
                hide_enoent,
            );
            core.ioctx
                .selfmanaged_snap_set_write_ctx(snapc.seq, snapc.snaps.clone());

            let mut write_op = ObjectOperation::new();
            action.add_ops(object_off, object_len, &mut write_op);

            let mut request = Self {
                core,
                weak_self: weak.clone(),
                state: WriteState::Final,
                action,
                object_image_extents,
                parent_overlap: object_overlap,
                read_op: ObjectOperation::new(),
                write_op,
            };
            request.guard_write();
            Mutex::new(request)
        })
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    /// Probe for existence first when the object may still be backed
    /// by the parent
    fn guard_write(&mut self) {
        let has_parent = self.parent_overlap > 0
            && self
                .core
                .image
                .with_parent_state(|view| view.parent().is_some());
        if has_parent {
            self.state = WriteState::CheckExists;
            self.read_op.prepend_stat();
        }
        log::trace!(
            "guard_write [{}]: has_parent={} state={:?}",
            self.core.oid,
            has_parent,
            self.state
        );
    }

    /// Submit the current state's operation; the result arrives
    /// asynchronously
    pub fn send(req: &Arc<Mutex<Self>>) -> Result<()> {
        let completion = {
            let me = req.clone();
            Completion::new(move |r| Self::advance(&me, r))
        };
        req.lock().send_inner(completion)
    }

    fn send_inner(&mut self, completion: Completion) -> Result<()> {
        log::debug!("write [{}]: send state={:?}", self.core.oid, self.state);
        if self.state == WriteState::CheckExists {
            assert!(!self.read_op.is_empty(), "existence probe is empty");
            self.core.ioctx.aio_operate(
                &self.core.oid,
                &self.read_op,
                Some(self.core.read_data.clone()),
                completion,
            )
        } else {
            assert!(!self.write_op.is_empty(), "write operation is empty");
            self.core
                .ioctx
                .aio_operate(&self.core.oid, &self.write_op, None, completion)
        }
    }

    fn advance(req: &Arc<Mutex<Self>>, r: i32) {
        let mut guard = req.lock();
        if guard.should_complete(r) {
            guard.finish(r);
        }
    }

    fn make_completion(&self) -> Completion {
        let me = self.weak_self.upgrade().expect("request dropped");
        Completion::new(move |r| Self::advance(&me, r))
    }

    fn should_complete(&mut self, r: i32) -> bool {
        log::debug!(
            "write [{}]: should_complete state={:?} r={}",
            self.core.oid,
            self.state,
            r
        );

        match self.state {
            WriteState::CheckExists => {
                if r < 0 && r != -libc::ENOENT {
                    log::debug!(
                        "write [{}]: error checking for object existence: {}",
                        self.core.oid,
                        r
                    );
                    return true;
                }
                if r == -libc::ENOENT && self.copyup_from_parent() {
                    return false;
                }
                log::debug!("write [{}]: no need to read from parent", self.core.oid);
                self.state = WriteState::Final;
                let completion = self.make_completion();
                if let Err(err) = self.send_inner(completion) {
                    log::error!("write [{}]: submission: {}", self.core.oid, err);
                }
                false
            }
            WriteState::Copyup => {
                self.state = WriteState::Final;
                if r < 0 {
                    // let the error run the final path
                    return self.should_complete(r);
                }
                if let Err(err) = self.send_copyup() {
                    log::error!("write [{}]: copyup submission: {}", self.core.oid, err);
                }
                false
            }
            WriteState::Final => {
                // nothing to do
                true
            }
        }
    }

    /// Switch to the copy up path if the parent still backs the object.
    /// Returns true once the parent read is in flight.
    fn copyup_from_parent(&mut self) -> bool {
        let image = self.core.image.clone();
        let completion = self.make_completion();
        image.with_parent_state(|view| {
            if view.parent().is_none() {
                return false;
            }
            // copy up the entire object up to the overlap point
            assert!(!self.object_image_extents.is_empty());
            log::debug!(
                "write [{}]: reading from parent {:?}",
                self.core.oid,
                self.object_image_extents
            );
            self.state = WriteState::Copyup;
            let extents = self.object_image_extents.clone();
            if let Err(err) = self.core.read_from_parent(view, &extents, completion) {
                log::error!("write [{}]: parent read submission: {}", self.core.oid, err);
            }
            true
        })
    }

    /// Submit the copy up bundle against the metadata context: the
    /// promoted parent bytes first, this request's own steps behind
    /// them, applied as one operation.
    fn send_copyup(&mut self) -> Result<()> {
        let parent_bytes = self.core.read_data.lock().data.clone().freeze();

        let mut copyup_op = ObjectOperation::new();
        copyup_op.exec("rbd", "copyup", parent_bytes);
        self.action
            .add_ops(self.core.object_off, self.core.object_len, &mut copyup_op);

        let completion = self.make_completion();
        self.core
            .image
            .md_ctx
            .aio_operate(&self.core.oid, &copyup_op, None, completion)
    }

    fn finish(&mut self, r: i32) {
        let r = self.core.effective_result(r);
        log::debug!("write [{}]: complete r={}", self.core.oid, r);
        self.core.fire_completion(r);
    }
}
