//! 上传文件命名：字符清洗、长度截断与时间戳消歧。

use crate::config::MAX_BASE_NAME_LEN;

/// 清洗原始文件名：`[A-Za-z0-9._-]` 之外的字符一律替换为 `_`。
/// 空名回退为 `file`，过长的主干截断并保留扩展名。
pub fn sanitize_file_name(original: &str) -> String {
    let mut name: String = original
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name.chars().all(|c| c == '.') {
        name.clear();
    }
    if name.is_empty() {
        return "file".to_string();
    }

    if name.len() > MAX_BASE_NAME_LEN {
        let ext_len = extension_len(&name).min(MAX_BASE_NAME_LEN.saturating_sub(1));
        let stem_len = MAX_BASE_NAME_LEN - ext_len;
        let (stem, ext) = name.split_at(name.len() - ext_len);
        name = format!("{}{}", &stem[..stem_len], ext);
    }

    name
}

/// 生成落盘名：`{毫秒时间戳}-{清洗后的名字}`。
/// 重试时把尝试序号并入时间戳，前缀始终是一段纯数字。
pub fn stored_name(millis: i64, attempt: u32, sanitized: &str) -> String {
    format!("{}-{}", millis + i64::from(attempt), sanitized)
}

/// 从落盘名剥离消歧前缀，还原原始文件名。
pub fn original_name_from_stored(stored: &str) -> Option<&str> {
    let (prefix, rest) = stored.split_once('-')?;
    if prefix.is_empty() || rest.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(rest)
}

// 含 `.` 的扩展名字节数；`.tar.gz` 按双段整体处理。
fn extension_len(name: &str) -> usize {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") {
        return ".tar.gz".len();
    }
    match name.rfind('.') {
        Some(0) | None => 0,
        Some(pos) => name.len() - pos,
    }
}
