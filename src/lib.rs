//! # BC Calculator
//!
//! 通过常驻的 `bc` 进程池提供任意精度计算服务
//!
//! ## 架构设计
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（BC 子进程），只暴露能力
//! - `BcWorker` - 唯一的进程 owner，提供 evaluate() 能力
//!
//! ### ② 编排层（Orchestration）
//! - `orchestrator/` - 固定大小的进程池，负责分配、回收、替换
//! - `BcPool` - acquire() / release() / shutdown()
//! - `PooledWorker` - 借出的进程，离开作用域即归还
//!
//! ### ③ 业务能力层（Services）
//! - `InputValidator` - 拦截危险输入
//! - `CalculatorService` - 校验 → 获取进程 → 计算 → 归还
//!
//! ### ④ 服务入口
//! - `app` - stdin/stdout 上的 JSON 行协议
//!
//! ## 模块结构

pub mod app;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use app::{App, Handler};
pub use config::Config;
pub use error::{CalcError, ErrorKind, Result};
pub use infrastructure::{BcWorker, ExitReason};
pub use models::{CalculationRequest, CalculationResult, PoolConfig, PoolStatus, ValidationResult, WorkerOptions, WorkerState};
pub use orchestrator::{BcPool, PooledWorker};
pub use services::{CalculatorService, InputValidator};
