use super::magnet::MAGNET_PREFIX;

// 下载来源的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Magnet,
    Http,
    Https,
    Ftp,
    Ftps,
}

/// 根据地址前缀判断下载来源类型，无法判断时按 HTTP 处理
pub fn detect_source_type(input: &str) -> SourceType {
    let lower = input.trim().to_ascii_lowercase();

    if lower.starts_with(MAGNET_PREFIX) {
        SourceType::Magnet
    } else if lower.starts_with("https:") {
        SourceType::Https
    } else if lower.starts_with("http:") {
        SourceType::Http
    } else if lower.starts_with("ftps:") {
        SourceType::Ftps
    } else if lower.starts_with("ftp:") {
        SourceType::Ftp
    } else {
        SourceType::Http
    }
}
