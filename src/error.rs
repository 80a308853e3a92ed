//! Error types shared by every neutorch module.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NeutorchError {
    /// Two shapes that must agree do not.
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A crop or sample box falls outside the chunk it is taken from.
    #[error("Box at {start:?} with size {size:?} does not fit in shape {shape:?}")]
    OutOfBounds {
        start: [usize; 3],
        size: [usize; 3],
        shape: [usize; 3],
    },

    /// A patch came out of the augmentation pipeline with the wrong size.
    #[error("Patch shape {actual:?} after transform, expected {expected:?}")]
    PatchShape {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    /// `backward` was called on a module that has not run `forward`.
    #[error("Module not initialized: {0} must run forward before backward")]
    NotInitialized(&'static str),

    /// Invalid experiment or transform configuration.
    #[error("Configuration error in `{field}`: {message}")]
    Config { field: String, message: String },

    /// Slice-stack decoding or encoding failed.
    #[error("Image error for {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },

    /// A directory that should hold a volume does not.
    #[error("Volume error for {path}: {message}")]
    Volume { path: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl NeutorchError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        NeutorchError::Config {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NeutorchError>;
