//! 从自由文本中提取 JSON
//!
//! 模型回复常夹带说明文字或 ```json 代码块；扫描器逐个找出顶层的 JSON 对象 / 数组，
//! 字符串内的括号不计入配对，无法解析的片段跳过。

use serde_json::Value;

/// 返回文本中所有顶层 JSON 对象 / 数组（按出现顺序）
pub fn find_json_objects(text: &str) -> Vec<Value> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let Some(offset) = bytes[pos..].iter().position(|b| *b == b'{' || *b == b'[') else {
            break;
        };
        let start = pos + offset;
        match balanced_end(bytes, start) {
            Some(end) => match serde_json::from_str::<Value>(&text[start..=end]) {
                Ok(value) => {
                    found.push(value);
                    pos = end + 1;
                }
                Err(_) => pos = start + 1,
            },
            None => pos = start + 1,
        }
    }
    found
}

/// 从 start 处的开括号出发，找到与之配对的闭括号位置
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                if stack.pop() != Some(b) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
