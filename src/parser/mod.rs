//! 提交内容的本地校验
//!
//! 所有输入在到达守护进程之前都要先经过这里，
//! 校验失败的输入不会创建任何任务。

pub mod batch;
pub mod detector;
pub mod errors;
pub mod magnet;
pub mod torrent;
pub mod url_parser;

pub use batch::{BatchLine, parse_batch_lines};
pub use detector::{SourceType, detect_source_type};
pub use errors::ParseError;
pub use magnet::{MagnetLink, parse_magnet};
pub use torrent::{TorrentMeta, parse_torrent};
pub use url_parser::{ParsedUrl, UrlParser};
