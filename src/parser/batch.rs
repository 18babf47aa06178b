// 批量提交的文本解析：每行一个地址，忽略空行和 # 注释

/// 批量输入中的一行有效内容
#[derive(Debug, Clone, PartialEq)]
pub struct BatchLine {
    /// 从 1 开始的原始行号
    pub line_no: usize,
    pub url: String,
}

/// 行内只取第一个空白分隔的片段，后面的内容当作备注
pub fn parse_batch_lines<S: AsRef<str>>(lines: &[S]) -> Vec<BatchLine> {
    lines
        .iter()
        .enumerate()
        .filter_map(|(idx, line)| {
            let trimmed = line.as_ref().trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return None;
            }
            let url = trimmed.split_whitespace().next()?;
            Some(BatchLine {
                line_no: idx + 1,
                url: url.to_string(),
            })
        })
        .collect()
}

/// 把整段文本拆成行，兼容 CRLF
pub fn split_batch_text(text: &str) -> Vec<String> {
    text.lines().map(|line| line.trim_end_matches('\r').to_string()).collect()
}
