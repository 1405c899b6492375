//! 输入校验 - 业务能力层
//!
//! 在表达式到达 BC 进程之前拦截危险输入，防止命令注入

use regex::Regex;

use crate::error::Result;
use crate::models::ValidationResult;

/// 表达式最大长度（字符数）
pub const DEFAULT_MAX_LENGTH: usize = 10_000;

/// 允许的字符：数字、字母、运算符、BC 语法符号和空白
const ALLOWED_CHARS: &str = r"^[0-9a-zA-Z+\-*/^().,;\s=<>!&|%{}\[\]]+$";

/// 可能导致命令注入或滥用系统的模式
const DANGEROUS_PATTERNS: &[&str] = &[
    r"(?i)system\s*\(",
    r"(?i)exec\s*\(",
    r"`",
    r"\$\(",
    r">\s*[/\w]",
    r"<\s*[/\w]",
    r"\|\s*[/\w]",
    r"(?i);\s*(?:bash|sh|rm|cat|ls|pwd|chmod|chown)",
];

/// 输入校验器
///
/// 纯函数式：不持有可变状态，可在多个任务间共享。
#[derive(Debug, Clone)]
pub struct InputValidator {
    max_length: usize,
    allowed: Regex,
    dangerous: Vec<Regex>,
}

impl InputValidator {
    /// 创建校验器
    pub fn new(max_length: usize) -> Result<Self> {
        let dangerous = DANGEROUS_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            max_length,
            allowed: Regex::new(ALLOWED_CHARS)?,
            dangerous,
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// 校验表达式，通过时返回去除首尾空白后的文本
    pub fn validate(&self, expression: &str) -> ValidationResult {
        if expression.is_empty() {
            return ValidationResult::reject("表达式不能为空");
        }

        let length = expression.chars().count();
        if length > self.max_length {
            return ValidationResult::reject(format!(
                "表达式过长 (最多 {} 个字符，实际 {} 个)",
                self.max_length, length
            ));
        }

        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return ValidationResult::reject("表达式不能只包含空白");
        }

        if !self.allowed.is_match(trimmed) {
            return ValidationResult::reject("表达式包含非法字符，只允许字母、数字和数学运算符");
        }

        if self.dangerous.iter().any(|pattern| pattern.is_match(trimmed)) {
            return ValidationResult::reject("表达式包含不安全的模式");
        }

        if let Err(message) = check_balanced(trimmed) {
            return ValidationResult::reject(message);
        }

        ValidationResult::ok(trimmed)
    }
}

/// 检查圆括号、花括号、方括号是否配对
fn check_balanced(expression: &str) -> std::result::Result<(), String> {
    const PAIRS: [(char, char, &str); 3] = [('(', ')', "圆括号"), ('{', '}', "花括号"), ('[', ']', "方括号")];

    let mut depth = [0i64; 3];
    for c in expression.chars() {
        for (i, (open, close, name)) in PAIRS.iter().enumerate() {
            if c == *open {
                depth[i] += 1;
            } else if c == *close {
                depth[i] -= 1;
                if depth[i] < 0 {
                    return Err(format!("{}不匹配: 右括号出现在左括号之前", name));
                }
            }
        }
    }

    for (i, (_, _, name)) in PAIRS.iter().enumerate() {
        if depth[i] > 0 {
            return Err(format!("{}不匹配: 缺少右括号", name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> InputValidator {
        InputValidator::new(DEFAULT_MAX_LENGTH).unwrap()
    }

    #[test]
    fn test_accepts_plain_arithmetic() {
        let v = validator();
        for expr in ["2+2", "355/113", "sqrt(2)", "a=5;b=10;a+b", "s(1)^2 + c(1)^2", "x[1] = 3"] {
            let result = v.validate(expr);
            assert!(result.valid, "{} 应该通过校验: {:?}", expr, result.error);
        }
    }

    #[test]
    fn test_trims_whitespace() {
        let result = validator().validate("  1 + 2\n");
        assert_eq!(result.sanitized.as_deref(), Some("1 + 2"));
    }

    #[test]
    fn test_rejects_injection_patterns() {
        let v = validator();
        for expr in [
            "system(ls)",
            "SYSTEM (ls)",
            "exec(1)",
            "`ls`",
            "$(whoami)",
            "1 | cat",
            "1 > out",
            "1 < /etc/passwd",
            "1; rm x",
        ] {
            assert!(!v.validate(expr).valid, "{} 应该被拒绝", expr);
        }
    }

    #[test]
    fn test_rejects_empty_and_blank() {
        let v = validator();
        assert!(!v.validate("").valid);
        assert!(!v.validate("   ").valid);
    }

    #[test]
    fn test_rejects_too_long() {
        let v = InputValidator::new(10).unwrap();
        assert!(v.validate("1+1+1+1+1").valid);
        let result = v.validate("1+1+1+1+1+1");
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("10"));
    }

    #[test]
    fn test_rejects_unbalanced_delimiters() {
        let v = validator();
        assert!(!v.validate("(1+2").valid);
        assert!(!v.validate("1+2)").valid);
        assert!(!v.validate(")(").valid);
        assert!(!v.validate("{1").valid);
        assert!(!v.validate("a[1").valid);
        assert!(v.validate("((1+2)*(3))").valid);
    }

    #[test]
    fn test_rejects_disallowed_characters() {
        let v = validator();
        assert!(!v.validate("1 + 2 # comment").valid);
        assert!(!v.validate("\"hello\"").valid);
        assert!(!v.validate("1 @ 2").valid);
    }
}
