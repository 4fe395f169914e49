//! Image upload and listing for the Hogflix client.

mod client;
mod error;
mod filter;

pub use client::{MediaStore, StorageClient};
pub use error::{MediaError, MediaResult};
pub use filter::{
    content_type_for, filter_unique_images, has_image_extension, is_storage_image,
    IMAGE_EXTENSIONS,
};
