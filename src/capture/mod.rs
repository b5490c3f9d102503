/// The `capture` module prepares captured tab images for the backend.
/// Capturing itself goes through `browser::BrowserApi`.
pub mod encode;

pub use encode::{prepare_for_upload, strip_data_url, CaptureError, DataUrl, UploadOptions};
