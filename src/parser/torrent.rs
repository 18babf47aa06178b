// 种子文件校验：在转发给守护进程之前先在本地确认是合法的 bencode 字典

use serde::Deserialize;
use serde_bencode::value::Value;

use super::errors::ParseError;

/// 上传种子文件的最大体积
pub const MAX_TORRENT_SIZE: usize = 10 * 1024 * 1024;

/// 校验通过的种子元数据
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentMeta {
    /// `info.name`，用作文件名提示
    pub name: Option<String>,
    pub file_count: usize,
}

#[derive(Deserialize)]
struct MetaInfo {
    info: Value,
}

/// 校验上传的种子内容：必须是 bencode 字典，并且包含 `info` 字典
pub fn parse_torrent(data: &[u8]) -> Result<TorrentMeta, ParseError> {
    if data.is_empty() {
        return Err(ParseError::EmptyInput);
    }
    if data.len() > MAX_TORRENT_SIZE {
        return Err(ParseError::TooLarge {
            size: data.len(),
            max: MAX_TORRENT_SIZE,
        });
    }
    if data.first() != Some(&b'd') {
        return Err(ParseError::InvalidTorrent("顶层不是字典".to_string()));
    }

    let meta: MetaInfo = serde_bencode::from_bytes(data)
        .map_err(|e| ParseError::InvalidTorrent(e.to_string()))?;
    let Value::Dict(info) = meta.info else {
        return Err(ParseError::InvalidTorrent("info 不是字典".to_string()));
    };

    let name = match info.get(b"name".as_slice()) {
        Some(Value::Bytes(raw)) => Some(String::from_utf8_lossy(raw).into_owned()),
        _ => None,
    };
    let file_count = match info.get(b"files".as_slice()) {
        Some(Value::List(files)) => files.len(),
        _ => 1,
    };

    Ok(TorrentMeta { name, file_count })
}
