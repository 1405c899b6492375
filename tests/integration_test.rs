//! 需要本机安装 `bc` 的集成测试：数值结果和真实错误输出；找不到 bc 时跳过
//!
//! 进程生命周期和进程池行为由 `pool_test.rs` 用脚本替身覆盖，不依赖 bc

use std::process::{Command, Stdio};
use std::time::Duration;

use bc_calculator::models::EngineCommand;
use bc_calculator::{
    BcPool, BcWorker, CalcError, CalculationRequest, CalculatorService, InputValidator,
    PoolConfig, WorkerOptions, WorkerState,
};
use tokio_test::{assert_err, assert_ok};

fn bc_installed() -> bool {
    let found = Command::new("bc")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if !found {
        eprintln!("未找到 bc，跳过测试");
    }
    found
}

fn options(precision: u32) -> WorkerOptions {
    WorkerOptions {
        precision,
        timeout: Duration::from_secs(10),
        engine: EngineCommand::default(),
    }
}

fn pool_config(pool_size: usize, acquire_timeout: Duration) -> PoolConfig {
    PoolConfig {
        pool_size,
        acquire_timeout,
        ..PoolConfig::default()
    }
}

fn fraction_digits(result: &str) -> usize {
    result.split('.').nth(1).map(str::len).unwrap_or(0)
}

// ========== 数值结果 ==========

#[tokio::test]
async fn test_fresh_worker_evaluates() {
    if !bc_installed() {
        return;
    }
    let worker = assert_ok!(BcWorker::spawn(options(20)).await);
    assert_eq!(worker.state(), WorkerState::Ready);
    assert!(worker.pid().is_some());
    assert_eq!(assert_ok!(worker.evaluate("2+2", None).await), "4");
    assert!(worker.is_available());
    worker.kill();
}

#[tokio::test]
async fn test_precision_controls_fraction_digits() {
    if !bc_installed() {
        return;
    }
    let worker = assert_ok!(BcWorker::spawn(options(20)).await);
    for precision in [0, 1, 5, 20, 50, 70, 100] {
        assert_ok!(worker.set_precision(precision).await);
        assert_eq!(worker.precision(), precision);
        let result = assert_ok!(worker.evaluate("1/3", None).await);
        assert_eq!(fraction_digits(&result), precision as usize, "精度 {}: {}", precision, result);
    }
    worker.kill();
}

#[tokio::test]
async fn test_known_values() {
    if !bc_installed() {
        return;
    }
    let worker = assert_ok!(BcWorker::spawn(options(20)).await);
    assert_eq!(
        assert_ok!(worker.evaluate("355/113", None).await),
        "3.14159292035398230088"
    );

    assert_ok!(worker.set_precision(15).await);
    let root = assert_ok!(worker.evaluate("sqrt(2)", None).await);
    assert!(root.starts_with("1.414213562373095"), "{}", root);
    worker.kill();
}

#[tokio::test]
async fn test_runtime_error_keeps_worker_usable() {
    if !bc_installed() {
        return;
    }
    let worker = assert_ok!(BcWorker::spawn(options(20)).await);
    let err = assert_err!(worker.evaluate("1/0", None).await);
    assert!(matches!(err, CalcError::Runtime(_)), "{:?}", err);
    assert!(worker.is_available());
    assert_eq!(assert_ok!(worker.evaluate("1+1", None).await), "2");
    worker.kill();
}

// ========== 计算服务 ==========

#[tokio::test]
async fn test_service_compute_and_scripts() {
    if !bc_installed() {
        return;
    }
    let pool = BcPool::new(pool_config(2, Duration::from_secs(5)));
    assert_ok!(pool.initialize().await);
    let service = CalculatorService::new(pool.clone(), assert_ok!(InputValidator::new(10_000)));

    assert_eq!(assert_ok!(service.compute("2^10", 0, None).await), "1024");

    let request = CalculationRequest {
        expression: "10/4".to_string(),
        precision: Some(2),
        timeout_ms: None,
    };
    let result = assert_ok!(service.calculate(&request, 20).await);
    assert_eq!(result.result, "2.50");
    assert_eq!(result.precision, 2);
    assert_eq!(result.expression, "10/4");

    let script = "define sq(n) { return (n * n); }\nsq(12)";
    let result = assert_ok!(service.calculate_advanced(script, 0, None).await);
    assert_eq!(result.result, "144");

    let err = assert_err!(service.compute("1/0", 5, None).await);
    assert!(matches!(err, CalcError::Runtime(_)));
    assert_eq!(pool.status().available, 2);

    pool.shutdown().await;
}
