pub mod compositing;
pub mod resize;
pub mod storage;

pub use compositing::{
    CollageCell, CollageRequest, CompositingService, HttpCompositor, LocalCompositor,
};
pub use resize::{fit_to_position, PreparedImage};
pub use storage::{HttpObjectStorage, MemoryObjectStorage, ObjectStorage};

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("unsupported image format")]
    UnsupportedFormat,
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("could not encode image: {0}")]
    Encode(String),
    #[error("object storage failed: {0}")]
    Storage(String),
    #[error("compositing failed: {0}")]
    Compositing(String),
}
