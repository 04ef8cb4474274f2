//! 文本判定辅助

/// 把模型的简短回答解释为布尔值
///
/// 去掉首尾空白、引号、反引号和句末标点后大小写不敏感比较；
/// `true` / `yes` / `y` / `t` / `1` 视为真，其余一律为假。
pub fn parse_bool(text: &str) -> bool {
    let cleaned = text
        .trim()
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '.' | '!' | '。'))
        .to_ascii_lowercase();
    matches!(cleaned.as_str(), "true" | "yes" | "y" | "t" | "1")
}
