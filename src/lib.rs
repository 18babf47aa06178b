//! 基于外部下载守护进程（aria2）的下载编排与状态同步引擎

pub mod broadcast;
pub mod common;
pub mod downloader;
pub mod engine;
pub mod parser;
pub mod registry;
pub mod rpc;
#[cfg(feature = "http")]
pub mod server;
pub mod sync;

pub use downloader::{DownloadError, DownloadManager};
pub use engine::Engine;
