use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("输入不能为空")]
    EmptyInput,
    #[error("无效的URL: {0}")]
    InvalidUrl(String),
    #[error("不支持的协议: {0}")]
    UnsupportedScheme(String),
    #[error("URL缺少主机名: {0}")]
    MissingHost(String),
    #[error("无效的磁力链接: {0}")]
    InvalidMagnet(String),
    #[error("无效的种子文件: {0}")]
    InvalidTorrent(String),
    #[error("文件过大: {size} 字节 (最大 {max} 字节)")]
    TooLarge { size: usize, max: usize },
}
