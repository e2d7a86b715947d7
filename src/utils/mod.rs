pub mod format;
pub mod mime;

pub use format::{format_bytes, format_duration, format_eta, format_file_size, format_speed};
pub use mime::{mime_from_path, DEFAULT_MIME_TYPE};
