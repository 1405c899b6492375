use serde::{Deserialize, Serialize};

/// 计算请求
#[derive(Debug, Clone, Deserialize)]
pub struct CalculationRequest {
    pub expression: String,
    /// 小数位数，缺省时使用会话默认精度
    #[serde(default)]
    pub precision: Option<u32>,
    /// 超时（毫秒），缺省时使用进程池默认超时
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 计算结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationResult {
    pub result: String,
    /// 表达式（高级脚本时为截断后的预览）
    pub expression: String,
    pub precision: u32,
    pub execution_time_ms: f64,
}

/// 输入校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub error: Option<String>,
    pub sanitized: Option<String>,
}

impl ValidationResult {
    pub fn ok(sanitized: impl Into<String>) -> Self {
        Self {
            valid: true,
            error: None,
            sanitized: Some(sanitized.into()),
        }
    }

    pub fn reject(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            sanitized: None,
        }
    }
}
