pub mod completion;
pub mod errors;
pub mod image;
pub mod request;
pub mod store;
pub mod striper;

// reexport
pub use completion::Completion;
pub use errors::{Error, Result};
pub use image::{ImageCtx, ParentImage, ParentLink, ParentView};
pub use request::{AioRead, RequestCallback, WriteAction, WriteRequest, WriteState};
pub use store::{
    IoCtx, ObjectOperation, ObjectStore, OpStep, ReadResult, SharedReadResult, SnapContext,
    SnapId, NO_SNAP,
};
pub use striper::ObjectLayout;
