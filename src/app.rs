//! 服务入口 - JSON 行协议
//!
//! 每行一个请求 `{"id", "tool", "arguments"}`，每行一个响应
//! `{"id", "ok", "data" | "error"}`。请求并发处理，响应经由单一写入任务输出。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::CalcError;
use crate::infrastructure::check_precision;
use crate::models::CalculationRequest;
use crate::orchestrator::BcPool;
use crate::services::{CalculatorService, InputValidator};
use crate::utils::logging::{log_pool_status, log_startup};

#[derive(Debug, Deserialize)]
struct ToolRequest {
    #[serde(default)]
    id: JsonValue,
    tool: String,
    #[serde(default)]
    arguments: JsonValue,
}

#[derive(Debug, Serialize)]
struct ToolResponse {
    id: JsonValue,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Debug, Deserialize)]
struct AdvancedArgs {
    script: String,
    #[serde(default)]
    precision: Option<u32>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PrecisionArgs {
    precision: u32,
}

/// 请求处理器
///
/// 会话默认精度只在这里保存；每次计算读取一次后显式传给服务。
#[derive(Clone)]
pub struct Handler {
    service: CalculatorService,
    default_precision: Arc<AtomicU32>,
}

impl Handler {
    pub fn new(service: CalculatorService, default_precision: u32) -> Self {
        Self {
            service,
            default_precision: Arc::new(AtomicU32::new(default_precision)),
        }
    }

    pub fn default_precision(&self) -> u32 {
        self.default_precision.load(Ordering::SeqCst)
    }

    /// 处理一行请求，返回一行响应
    pub async fn handle_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<ToolRequest>(line) {
            Ok(request) => {
                let outcome = self.dispatch(&request.tool, request.arguments).await;
                respond(request.id, outcome)
            }
            Err(e) => respond(
                JsonValue::Null,
                Err(CalcError::validation(format!("请求格式无效: {}", e))),
            ),
        };

        serde_json::to_string(&response).unwrap_or_else(|e| {
            error!("序列化响应失败: {}", e);
            r#"{"id":null,"ok":false,"error":{"code":"INTERNAL_ERROR","message":"序列化响应失败"}}"#
                .to_string()
        })
    }

    async fn dispatch(&self, tool: &str, arguments: JsonValue) -> Result<JsonValue, CalcError> {
        match tool {
            "calculate" => {
                let request: CalculationRequest = parse_arguments(arguments)?;
                let result = self
                    .service
                    .calculate(&request, self.default_precision())
                    .await?;
                to_json(&result)
            }
            "calculate_advanced" => {
                let args: AdvancedArgs = parse_arguments(arguments)?;
                let precision = args.precision.unwrap_or(self.default_precision());
                let timeout = args.timeout_ms.map(Duration::from_millis);
                let result = self
                    .service
                    .calculate_advanced(&args.script, precision, timeout)
                    .await?;
                to_json(&result)
            }
            "set_precision" => {
                let args: PrecisionArgs = parse_arguments(arguments)?;
                check_precision(args.precision)?;
                self.default_precision
                    .store(args.precision, Ordering::SeqCst);
                info!("默认精度已更新为 {}", args.precision);
                Ok(json!({
                    "message": "精度已更新",
                    "precision": args.precision,
                }))
            }
            "status" => to_json(&self.service.pool().status()),
            other => Err(CalcError::validation(format!("未知工具: {}", other))),
        }
    }
}

fn parse_arguments<T: serde::de::DeserializeOwned>(arguments: JsonValue) -> Result<T, CalcError> {
    serde_json::from_value(arguments).map_err(|e| CalcError::validation(format!("参数无效: {}", e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<JsonValue, CalcError> {
    serde_json::to_value(value).map_err(|e| CalcError::internal(format!("序列化结果失败: {}", e)))
}

fn respond(id: JsonValue, outcome: Result<JsonValue, CalcError>) -> ToolResponse {
    match outcome {
        Ok(data) => ToolResponse {
            id,
            ok: true,
            data: Some(data),
            error: None,
        },
        Err(e) => {
            debug!("请求失败 [{}]: {}", e.kind(), e);
            ToolResponse {
                id,
                ok: false,
                data: None,
                error: Some(ErrorBody {
                    code: e.kind().as_str(),
                    message: e.to_string(),
                }),
            }
        }
    }
}

/// 应用主结构
pub struct App {
    handler: Handler,
    pool: BcPool,
}

impl App {
    /// 初始化应用：校验配置并启动进程池
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate()?;
        log_startup(&config);

        let validator = InputValidator::new(config.max_expression_length)?;
        let pool = BcPool::new(config.pool_config());
        pool.initialize()
            .await
            .context("BC 进程池初始化失败")?;
        log_pool_status(&pool.status());

        let service = CalculatorService::new(pool.clone(), validator);
        Ok(Self {
            handler: Handler::new(service, config.default_precision),
            pool,
        })
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// 运行请求循环，直到 stdin 关闭或收到 Ctrl-C
    pub async fn run(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(line) = rx.recv().await {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            Ok::<_, std::io::Error>(())
        });

        info!("BC 计算服务已在 stdio 上运行");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("读取 stdin 失败")? else {
                        debug!("stdin 已关闭");
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let handler = self.handler.clone();
                    let tx = tx.clone();
                    tasks.spawn(async move {
                        let response = handler.handle_line(&line).await;
                        if tx.send(response).is_err() {
                            warn!("响应通道已关闭，丢弃响应");
                        }
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("收到中断信号");
                    break;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("请求任务执行失败: {}", e);
            }
        }
        drop(tx);
        writer.await.context("输出任务异常退出")??;

        self.shutdown().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        log_pool_status(&self.pool.status());
        self.pool.shutdown().await;
    }
}
