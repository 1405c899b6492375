//! 计算服务 - 业务能力层
//!
//! 对外暴露 `compute()`：获取进程 → 设置精度 → 计算 → 归还。
//! 无论成功、失败还是 future 被取消，进程都会被归还给进程池。

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{CalcError, Result};
use crate::infrastructure::{check_precision, BcWorker};
use crate::models::{CalculationRequest, CalculationResult};
use crate::orchestrator::BcPool;
use crate::services::InputValidator;
use crate::utils::logging::truncate_text;

/// 高级脚本在响应中回显的最大长度
const SCRIPT_PREVIEW_LEN: usize = 100;

/// 计算服务
///
/// 精度总是由调用方显式传入，服务本身不保存"当前精度"。
#[derive(Clone)]
pub struct CalculatorService {
    pool: BcPool,
    validator: InputValidator,
}

impl CalculatorService {
    pub fn new(pool: BcPool, validator: InputValidator) -> Self {
        Self { pool, validator }
    }

    pub fn pool(&self) -> &BcPool {
        &self.pool
    }

    /// 计算一个已经过校验的表达式
    ///
    /// `timeout` 为 `None` 时使用进程池的默认超时。
    pub async fn compute(
        &self,
        sanitized: &str,
        precision: u32,
        timeout: Option<Duration>,
    ) -> Result<String> {
        check_precision(precision)?;

        let worker = self.pool.acquire().await?;
        let outcome = run_on(&worker, sanitized, precision, timeout).await;
        if let Err(e) = &outcome {
            if e.is_worker_fatal() {
                warn!("[进程 {}] 计算失败，归还后将被替换: {}", worker.id(), e);
            }
        }
        worker.release();
        outcome
    }

    /// 处理一次普通计算请求
    pub async fn calculate(
        &self,
        request: &CalculationRequest,
        default_precision: u32,
    ) -> Result<CalculationResult> {
        let started = Instant::now();
        let precision = request.precision.unwrap_or(default_precision);
        check_precision(precision)?;

        let sanitized = self.sanitize(&request.expression)?;
        let timeout = request.timeout_ms.map(Duration::from_millis);
        let result = self.compute(&sanitized, precision, timeout).await?;

        Ok(CalculationResult {
            result,
            expression: request.expression.clone(),
            precision,
            execution_time_ms: elapsed_ms(started),
        })
    }

    /// 执行多语句脚本（变量、循环、函数定义等）
    ///
    /// 脚本应只在最后一行产生输出：第一次读到的完整行即为结果，
    /// 之后才到达的输出行会被丢弃或串到下一次请求。响应中的脚本被截断为预览。
    pub async fn calculate_advanced(
        &self,
        script: &str,
        precision: u32,
        timeout: Option<Duration>,
    ) -> Result<CalculationResult> {
        let started = Instant::now();
        check_precision(precision)?;

        let sanitized = self.sanitize(script)?;
        let result = self.compute(&sanitized, precision, timeout).await?;

        Ok(CalculationResult {
            result,
            expression: truncate_text(script, SCRIPT_PREVIEW_LEN),
            precision,
            execution_time_ms: elapsed_ms(started),
        })
    }

    fn sanitize(&self, text: &str) -> Result<String> {
        let validation = self.validator.validate(text);
        if !validation.valid {
            return Err(CalcError::Validation(
                validation.error.unwrap_or_else(|| "表达式无效".to_string()),
            ));
        }
        Ok(validation
            .sanitized
            .unwrap_or_else(|| text.trim().to_string()))
    }
}

async fn run_on(
    worker: &BcWorker,
    sanitized: &str,
    precision: u32,
    timeout: Option<Duration>,
) -> Result<String> {
    if worker.precision() != precision {
        debug!(
            "[进程 {}] 精度 {} → {}",
            worker.id(),
            worker.precision(),
            precision
        );
        worker.set_precision(precision).await?;
    }
    worker.evaluate(sanitized, timeout).await
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PoolConfig;
    use crate::services::input_validator::DEFAULT_MAX_LENGTH;

    fn service() -> CalculatorService {
        CalculatorService::new(
            BcPool::new(PoolConfig::default()),
            InputValidator::new(DEFAULT_MAX_LENGTH).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_invalid_expression_never_reaches_pool() {
        let request = CalculationRequest {
            expression: "system(ls)".to_string(),
            precision: None,
            timeout_ms: None,
        };
        let err = service().calculate(&request, 20).await.unwrap_err();
        assert!(matches!(err, CalcError::Validation(_)));
    }

    #[tokio::test]
    async fn test_invalid_precision_is_rejected_first() {
        let err = service().compute("1+1", 101, None).await.unwrap_err();
        assert!(matches!(err, CalcError::Validation(_)));

        let err = service()
            .calculate_advanced("x=1;x", 500, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CalcError::Validation(_)));
    }

    #[tokio::test]
    async fn test_uninitialized_pool_is_not_ready() {
        let err = service().compute("1+1", 5, None).await.unwrap_err();
        assert!(matches!(err, CalcError::NotReady(_)));
    }
}
