use data_encoding::{BASE32, HEXLOWER, HEXLOWER_PERMISSIVE};
use magnet_url::Magnet;
use url::Url;

use super::errors::ParseError;

pub const MAGNET_PREFIX: &str = "magnet:";

/// 校验通过的磁力链接
#[derive(Debug, Clone, PartialEq)]
pub struct MagnetLink {
    pub uri: String,
    /// 小写的 info-hash（v1 为 40 位十六进制，v2 为 multihash 十六进制）
    pub info_hash: String,
    /// `dn` 参数给出的显示名称
    pub display_name: Option<String>,
}

pub fn parse_magnet(input: &str) -> Result<MagnetLink, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::EmptyInput);
    }
    if !input.to_ascii_lowercase().starts_with(MAGNET_PREFIX) {
        return Err(ParseError::InvalidMagnet("缺少 magnet: 前缀".to_string()));
    }

    let magnet =
        Magnet::new(input).map_err(|e| ParseError::InvalidMagnet(format!("{:?}", e)))?;
    let url = Url::parse(input).map_err(|e| ParseError::InvalidMagnet(e.to_string()))?;

    // 没有 btih 时从 xt 参数里取 btmh
    let candidate = magnet.hash().map(|h| h.to_string()).or_else(|| {
        url.query_pairs()
            .filter(|(key, _)| key == "xt")
            .find_map(|(_, value)| value.rsplit(':').next().map(str::to_string))
    });
    let info_hash = candidate
        .as_deref()
        .and_then(normalize_info_hash)
        .ok_or_else(|| ParseError::InvalidMagnet("缺少可解析的 info-hash (xt)".to_string()))?;

    let display_name = url
        .query_pairs()
        .find(|(key, _)| key == "dn")
        .map(|(_, value)| value.into_owned())
        .filter(|name| !name.is_empty());

    Ok(MagnetLink {
        uri: input.to_string(),
        info_hash,
        display_name,
    })
}

/// 统一成小写十六进制：v1 可以是 40 位十六进制或 32 位 base32，v2 是 sha2-256 multihash
fn normalize_info_hash(hash: &str) -> Option<String> {
    let hash = hash.rsplit(':').next()?;
    let bytes = match hash.len() {
        40 | 68 => HEXLOWER_PERMISSIVE.decode(hash.as_bytes()).ok()?,
        32 => BASE32.decode(hash.to_ascii_uppercase().as_bytes()).ok()?,
        _ => return None,
    };
    match bytes.as_slice() {
        v1 if v1.len() == 20 => Some(HEXLOWER.encode(v1)),
        [0x12, 0x20, digest @ ..] if digest.len() == 32 => Some(HEXLOWER.encode(&bytes)),
        _ => None,
    }
}
