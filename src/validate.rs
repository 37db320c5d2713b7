//! 上传前置校验：扩展名、声明内容类型与声明大小。

use std::collections::HashSet;
use tracing::warn;

use crate::error::ApiError;

/// 上传校验策略，构造后不可变。
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub allowed_extensions: HashSet<String>,
    /// `None` 时只做扩展名检查。
    pub allowed_content_types: Option<HashSet<String>>,
    /// 浏览器对归档 MIME 的识别并不可靠；默认只告警放行。
    pub strict_content_types: bool,
    pub max_bytes: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ValidateError {
    UnsupportedType(String),
    TooLarge(u64),
}

impl From<ValidateError> for ApiError {
    fn from(error: ValidateError) -> Self {
        match error {
            ValidateError::UnsupportedType(msg) => ApiError::UnsupportedType(msg),
            ValidateError::TooLarge(limit) => ApiError::TooLarge(limit),
        }
    }
}

/// 纯判定函数：不读字节、无副作用。
/// 扩展名始终强制；内容类型仅在配置了允许列表时参与，且默认宽松。
/// 声明大小超限时在读取任何内容之前拒绝。
pub fn validate(
    file_name: &str,
    content_type: Option<&str>,
    declared_len: Option<u64>,
    policy: &ValidationPolicy,
) -> Result<(), ValidateError> {
    let ext = file_extension(file_name)
        .ok_or_else(|| ValidateError::UnsupportedType(unsupported_message(policy)))?;
    if !policy.allowed_extensions.contains(&ext) {
        return Err(ValidateError::UnsupportedType(unsupported_message(policy)));
    }

    if let (Some(allowed), Some(declared)) = (&policy.allowed_content_types, content_type) {
        let essence = declared
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if !allowed.contains(&essence) {
            if policy.strict_content_types {
                return Err(ValidateError::UnsupportedType(format!(
                    "content type {essence} is not allowed"
                )));
            }
            warn!(
                content_type = %essence,
                file_name,
                "declared content type not in allow list, accepting by extension"
            );
        }
    }

    if let Some(len) = declared_len
        && len > policy.max_bytes
    {
        return Err(ValidateError::TooLarge(policy.max_bytes));
    }

    Ok(())
}

/// 提取小写扩展名：取最后一个点，唯独结尾的 `.tar.gz` 作为双段整体。
pub fn file_extension(file_name: &str) -> Option<String> {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") {
        return Some("tar.gz".to_string());
    }
    match lower.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => Some(ext.to_string()),
        _ => None,
    }
}

/// 解析逗号分隔的配置列表：去空白、去前导点、统一小写。
pub fn parse_list(value: &str) -> HashSet<String> {
    value
        .split(',')
        .map(|item| item.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

fn unsupported_message(policy: &ValidationPolicy) -> String {
    let mut extensions: Vec<&str> = policy
        .allowed_extensions
        .iter()
        .map(String::as_str)
        .collect();
    extensions.sort_unstable();
    format!(
        "only compressed archives are allowed (.{})",
        extensions.join(", .")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ALLOWED_EXTENSIONS;

    fn make_policy() -> ValidationPolicy {
        ValidationPolicy {
            allowed_extensions: parse_list(DEFAULT_ALLOWED_EXTENSIONS),
            allowed_content_types: None,
            strict_content_types: false,
            max_bytes: 100 * 1024 * 1024,
        }
    }

    #[test]
    fn extension_takes_last_dot() {
        assert_eq!(file_extension("a.b.zip").as_deref(), Some("zip"));
        assert_eq!(file_extension("ARCHIVE.ZIP").as_deref(), Some("zip"));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_extension("trailing."), None);
    }

    #[test]
    fn tar_gz_is_a_single_extension() {
        assert_eq!(file_extension("backup.tar.gz").as_deref(), Some("tar.gz"));
        assert_eq!(file_extension("BACKUP.TAR.GZ").as_deref(), Some("tar.gz"));
        // 其他双段组合仍按最后一个点处理。
        assert_eq!(file_extension("backup.tar.bz2").as_deref(), Some("bz2"));
    }

    #[test]
    fn accepts_allowed_archive() {
        let policy = make_policy();
        assert_eq!(validate("release.tar.gz", None, Some(10), &policy), Ok(()));
        assert_eq!(validate("data.zip", None, None, &policy), Ok(()));
    }

    #[test]
    fn rejects_unsupported_extension() {
        let policy = make_policy();
        let result = validate("malware.exe", None, None, &policy);
        assert!(matches!(result, Err(ValidateError::UnsupportedType(_))));
        let result = validate("no_extension", None, None, &policy);
        assert!(matches!(result, Err(ValidateError::UnsupportedType(_))));
    }

    #[test]
    fn rejects_declared_length_over_limit() {
        let policy = make_policy();
        let result = validate("big.zip", None, Some(4 * 1024 * 1024 * 1024), &policy);
        assert_eq!(result, Err(ValidateError::TooLarge(policy.max_bytes)));
    }

    #[test]
    fn lenient_content_type_passes_mismatch() {
        let mut policy = make_policy();
        policy.allowed_content_types = Some(parse_list("application/zip,application/gzip"));
        assert_eq!(
            validate("data.zip", Some("application/octet-stream"), None, &policy),
            Ok(())
        );
    }

    #[test]
    fn strict_content_type_rejects_mismatch() {
        let mut policy = make_policy();
        policy.allowed_content_types = Some(parse_list("application/zip,application/gzip"));
        policy.strict_content_types = true;
        let result = validate("data.zip", Some("application/octet-stream"), None, &policy);
        assert!(matches!(result, Err(ValidateError::UnsupportedType(_))));
        // 命中允许列表时严格模式也放行，参数部分被忽略。
        assert_eq!(
            validate("data.zip", Some("Application/Zip; charset=binary"), None, &policy),
            Ok(())
        );
    }

    #[test]
    fn parse_list_normalizes_entries() {
        let parsed = parse_list(" .ZIP, tar.gz ,,rar");
        assert!(parsed.contains("zip"));
        assert!(parsed.contains("tar.gz"));
        assert!(parsed.contains("rar"));
        assert_eq!(parsed.len(), 3);
    }
}
