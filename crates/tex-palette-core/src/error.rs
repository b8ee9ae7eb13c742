use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaletteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    /// Fatal: raised before any record is processed.
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Cannot read {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("Cannot write {path}: {reason}")]
    Write { path: String, reason: String },
    #[error("Session error: {0}")]
    Session(#[from] serde_json::Error),
    #[error("Rules error: {0}")]
    Rules(String),
}

impl PaletteError {
    pub fn read(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Read {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn write(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for PaletteError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Rules(e.to_string())
    }
}

impl From<globset::Error> for PaletteError {
    fn from(e: globset::Error) -> Self {
        Self::Rules(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PaletteError>;
