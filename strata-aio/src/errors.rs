//!
//! Crate errors
//!
//! Only submission failures surface as structured errors; results
//! delivered through completions stay raw integer codes (`>= 0`
//! success, negated errno otherwise).
//!
use crate::store::SnapId;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Object store error (code {0})")]
    Store(i32),
    #[error("Unknown snapshot {0}")]
    UnknownSnapshot(SnapId),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for String {
    fn from(err: Error) -> String {
        format!("{}", err)
    }
}
