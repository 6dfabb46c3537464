//! 转发会话标识符的生成与语法校验。
//!
//! 标识符形如 `fwds_<32 位小写 base36>`。会话目录按标识符命名文件，
//! 管理器在加载时先做语法校验再读取内容。

use rand::Rng;

/// 转发会话标识符前缀。
pub const PREFIX: &str = "fwds";

const SEPARATOR: char = '_';
const BODY_LENGTH: usize = 32;
const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// 生成新的会话标识符。
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    let mut identifier = String::with_capacity(PREFIX.len() + 1 + BODY_LENGTH);
    identifier.push_str(PREFIX);
    identifier.push(SEPARATOR);
    for _ in 0..BODY_LENGTH {
        let index = rng.gen_range(0..ALPHABET.len());
        identifier.push(ALPHABET[index] as char);
    }
    identifier
}

/// 校验标识符语法：前缀、分隔符、体长度与字母表。
pub fn is_valid(identifier: &str) -> bool {
    let Some(body) = identifier
        .strip_prefix(PREFIX)
        .and_then(|rest| rest.strip_prefix(SEPARATOR))
    else {
        return false;
    };
    body.len() == BODY_LENGTH
        && body
            .bytes()
            .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identifiers_are_valid_and_distinct() {
        let first = generate();
        let second = generate();
        assert!(is_valid(&first));
        assert!(is_valid(&second));
        assert_ne!(first, second);
    }

    #[test]
    fn validation_rejects_malformed_identifiers() {
        assert!(!is_valid(""));
        assert!(!is_valid("fwds_"));
        assert!(!is_valid("sync_00000000000000000000000000000000"));
        assert!(!is_valid("fwds_TOOSHORT"));
        assert!(!is_valid("fwds_0000000000000000000000000000000!"));
        assert!(is_valid("fwds_0123456789abcdefghij0123456789ab"));
    }
}
