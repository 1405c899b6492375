//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 持有并调度 BC 进程，是整个系统唯一的进程所有者。
//!
//! ## 层次关系
//!
//! ```text
//! app (JSON 行协议)
//!     ↓
//! services::CalculatorService (校验 → 获取 → 计算 → 归还)
//!     ↓
//! orchestrator::BcPool (分配 / 回收 / 替换)
//!     ↓
//! infrastructure::BcWorker (单个 BC 进程)
//! ```

pub mod bc_pool;

pub use bc_pool::{BcPool, PooledWorker};
