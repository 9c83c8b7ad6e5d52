pub mod ip;
pub mod password;
pub mod time_parser;
pub mod url_validator;

pub use time_parser::TimeParser;
pub use url_validator::validate_target_url;

/// 短码最大长度
pub const MAX_SHORT_CODE_LEN: usize = 128;

/// 短码只允许字母数字、`_`、`-`、`.`、`/`
///
/// 存储 key 以 `:` 分段，Redis 列举使用 glob，两者的特殊字符都不能出现在短码里。
pub fn is_valid_short_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_SHORT_CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'/'))
}
