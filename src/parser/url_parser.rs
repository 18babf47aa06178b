use url::Url;

use super::errors::ParseError;

// 支持的协议
const ALLOWED_SCHEMES: [&str; 4] = ["http", "https", "ftp", "ftps"];

/// 校验通过的下载地址
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUrl {
    pub url: String,
    pub scheme: String,
    /// 从路径最后一段推断出的文件名（已做百分号解码）
    pub file_name: Option<String>,
}

pub struct UrlParser;

impl UrlParser {
    pub fn parse(input: &str) -> Result<ParsedUrl, ParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseError::EmptyInput);
        }

        let url = Url::parse(input)
            .map_err(|e| ParseError::InvalidUrl(format!("{}: {}", input, e)))?;

        let scheme = url.scheme().to_ascii_lowercase();
        if !ALLOWED_SCHEMES.contains(&scheme.as_str()) {
            return Err(ParseError::UnsupportedScheme(scheme));
        }

        match url.host_str() {
            Some(host) if !host.is_empty() => {}
            _ => return Err(ParseError::MissingHost(input.to_string())),
        }

        Ok(ParsedUrl {
            file_name: Self::file_name_hint(&url),
            url: input.to_string(),
            scheme,
        })
    }

    fn file_name_hint(url: &Url) -> Option<String> {
        let last = url.path_segments()?.next_back()?;
        if last.is_empty() {
            return None;
        }
        let decoded = urlencoding::decode(last)
            .map(|name| name.into_owned())
            .unwrap_or_else(|_| last.to_string());
        Some(decoded)
    }
}
