pub mod error;
pub mod manager;

pub use error::DownloadError;
pub use manager::{BatchReport, DownloadManager, LineError, Statistics, Submission};
