//!
//! Crate errors
//!
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("Missing or invalid config value {0}")]
    InvalidConfigValue(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for String {
    fn from(err: Error) -> String {
        format!("{}", err)
    }
}
