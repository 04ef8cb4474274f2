//! 通用工具：JSON 提取、布尔判定

pub mod json;
pub mod text;

pub use json::find_json_objects;
pub use text::parse_bool;
