//! BC 进程 - 基础设施层
//!
//! 持有唯一的 BC 子进程，只暴露"计算一条语句"的能力
//!
//! ## 协议
//!
//! - stdin：每行一条语句
//! - stdout：每条语句最多一行有效输出，即本次请求的结果
//! - stderr：任何非空的完整行都视为最近一次请求的运行时错误
//!
//! 同一进程任意时刻最多只有一个未完成的请求（`PendingRequest`），
//! 输出与请求的对应关系完全依赖这一点。一条语句产生多行输出时，
//! 只有同一次读取到的最后一行算作结果，晚到的行无法与请求区分。

use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CalcError, Result};
use crate::infrastructure::exit::ExitReason;
use crate::infrastructure::framing::take_result_line;
use crate::models::worker::MAX_PRECISION;
use crate::models::{WorkerOptions, WorkerState};

static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(1);

/// 校验精度是否在 `0..=100` 之间
pub fn check_precision(precision: u32) -> Result<()> {
    if precision > MAX_PRECISION {
        return Err(CalcError::validation(format!(
            "精度无效: {}，必须在 0 到 {} 之间",
            precision, MAX_PRECISION
        )));
    }
    Ok(())
}

/// 未完成的请求
struct PendingRequest {
    id: u64,
    sink: oneshot::Sender<Result<String>>,
    deadline: JoinHandle<()>,
}

impl PendingRequest {
    fn resolve(self, outcome: Result<String>) {
        self.deadline.abort();
        // 调用方可能已经放弃等待
        let _ = self.sink.send(outcome);
    }
}

/// 读写任务与调用方共享的状态
struct Shared {
    state: WorkerState,
    precision: u32,
    pid: Option<u32>,
    spawned: bool,
    pending: Option<PendingRequest>,
    stdout_buf: String,
    stderr_buf: String,
    kill_switch: Option<oneshot::Sender<()>>,
}

struct Inner {
    id: usize,
    options: WorkerOptions,
    shared: Mutex<Shared>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    next_request: AtomicU64,
    exited: watch::Sender<bool>,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// BC 进程
///
/// 职责：
/// - 持有唯一的 BC 子进程
/// - 暴露 evaluate() / set_precision() 能力
/// - 维护 `Starting → Ready ⇄ Busy → Dead` 状态机
/// - 不关心进程池，也不做输入校验
///
/// 句柄可以廉价 clone；最后一个句柄被丢弃时子进程随之终止。
#[derive(Clone)]
pub struct BcWorker {
    inner: Arc<Inner>,
}

impl BcWorker {
    /// 创建一个尚未启动的进程包装
    pub fn new(options: WorkerOptions) -> Self {
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        let precision = options.precision;
        let (exited, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                id,
                options,
                shared: Mutex::new(Shared {
                    state: WorkerState::Starting,
                    precision,
                    pid: None,
                    spawned: false,
                    pending: None,
                    stdout_buf: String::new(),
                    stderr_buf: String::new(),
                    kill_switch: None,
                }),
                stdin: tokio::sync::Mutex::new(None),
                next_request: AtomicU64::new(0),
                exited,
            }),
        }
    }

    /// 创建并启动
    pub async fn spawn(options: WorkerOptions) -> Result<Self> {
        let worker = Self::new(options);
        worker.start().await?;
        Ok(worker)
    }

    /// 启动 BC 进程并设置默认精度
    pub async fn start(&self) -> Result<()> {
        {
            let mut shared = self.inner.shared();
            if shared.spawned || shared.state != WorkerState::Starting {
                return Err(CalcError::not_ready(format!(
                    "BC 进程 #{} 不能重复启动 (状态: {})",
                    self.id(),
                    shared.state
                )));
            }
            shared.spawned = true;
        }

        let engine = &self.inner.options.engine;
        // 直接执行程序，不经过 shell
        let spawned = Command::new(&engine.program)
            .args(&engine.args)
            .env("BC_LINE_LENGTH", "0")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                self.inner.shared().state = WorkerState::Dead;
                self.inner.exited.send_replace(true);
                return Err(spawn_error(&engine.program, e));
            }
        };

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (Some(stdin), Some(stdout), Some(stderr)) = pipes else {
            self.inner.shared().state = WorkerState::Dead;
            drop(child);
            self.inner.exited.send_replace(true);
            return Err(CalcError::spawn_failed("无法获取 BC 进程的标准流", None));
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        let pid = child.id();
        {
            let mut shared = self.inner.shared();
            shared.pid = pid;
            shared.kill_switch = Some(kill_tx);
        }
        *self.inner.stdin.lock().await = Some(stdin);

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(pump(weak.clone(), stdout, Stream::Stdout));
        tokio::spawn(pump(weak.clone(), stderr, Stream::Stderr));
        tokio::spawn(supervise(weak, self.id(), child, kill_rx));

        let precision = self.inner.options.precision;
        if let Err(e) = self.apply_precision(precision, WorkerState::Starting).await {
            self.kill();
            return Err(CalcError::spawn_failed(
                format!("BC 进程 #{} 初始化精度失败: {}", self.id(), e),
                None,
            ));
        }

        info!("[进程 {}] 启动成功 (PID: {:?})", self.id(), pid);
        Ok(())
    }

    /// 计算一条语句
    ///
    /// `timeout` 为 `None` 时使用默认超时。超时后进程会被终止并进入 `Dead`。
    pub async fn evaluate(&self, expression: &str, timeout: Option<Duration>) -> Result<String> {
        let timeout = timeout.unwrap_or(self.inner.options.timeout);
        self.dispatch(expression, timeout, WorkerState::Ready).await
    }

    /// 设置精度（小数位数，0-100）
    pub async fn set_precision(&self, precision: u32) -> Result<()> {
        check_precision(precision)?;
        self.apply_precision(precision, WorkerState::Ready).await
    }

    /// 当前精度（最后一次成功设置的值）
    pub fn precision(&self) -> u32 {
        self.inner.shared().precision
    }

    /// 是否可以接受新请求
    pub fn is_available(&self) -> bool {
        let shared = self.inner.shared();
        shared.state == WorkerState::Ready && shared.pending.is_none()
    }

    pub fn state(&self) -> WorkerState {
        self.inner.shared().state
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.shared().pid
    }

    /// 强制终止进程（幂等）
    pub fn kill(&self) {
        self.inner.kill();
    }

    /// 等待子进程真正退出（从未启动过的进程立即返回）
    pub async fn wait_exit(&self) {
        let mut exited = self.inner.exited.subscribe();
        let spawned = self.inner.shared().spawned;
        if !spawned {
            return;
        }
        let _ = exited.wait_for(|done| *done).await;
    }

    /// 两个句柄是否指向同一个进程
    pub fn same_as(&self, other: &BcWorker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    async fn apply_precision(&self, precision: u32, expected: WorkerState) -> Result<()> {
        // 单独的 scale 赋值没有输出，追加一次回显作为确认
        let statement = format!("scale={};scale", precision);
        let echoed = self
            .dispatch(&statement, self.inner.options.timeout, expected)
            .await?;

        if echoed != precision.to_string() {
            self.kill();
            return Err(CalcError::internal(format!(
                "设置精度 {} 后 BC 返回了意外的输出: {}",
                precision, echoed
            )));
        }

        self.inner.shared().precision = precision;
        debug!("[进程 {}] 精度已设置为 {}", self.id(), precision);
        Ok(())
    }

    /// 提交一条语句并等待结果
    async fn dispatch(
        &self,
        statement: &str,
        timeout: Duration,
        expected: WorkerState,
    ) -> Result<String> {
        let (sink, outcome) = oneshot::channel();
        let request_id = self.inner.next_request.fetch_add(1, Ordering::Relaxed);

        {
            let mut shared = self.inner.shared();
            if shared.pending.is_some() {
                return Err(CalcError::Busy {
                    worker_id: self.id(),
                });
            }
            if shared.state != expected {
                return Err(CalcError::not_ready(format!(
                    "BC 进程 #{} 未就绪 (状态: {})",
                    self.id(),
                    shared.state
                )));
            }

            // 清理上一次请求遗留的输出
            shared.stdout_buf.clear();
            shared.stderr_buf.clear();

            let deadline = tokio::spawn(expire(
                Arc::downgrade(&self.inner),
                request_id,
                timeout,
            ));
            shared.pending = Some(PendingRequest {
                id: request_id,
                sink,
                deadline,
            });
            shared.state = WorkerState::Busy;
        }

        if let Err(e) = self.write_line(statement).await {
            warn!("[进程 {}] 写入 stdin 失败: {}", self.id(), e);
            self.inner.fail_request(
                request_id,
                CalcError::internal(format!("无法向 BC 进程 #{} 写入表达式: {}", self.id(), e)),
            );
            self.kill();
        }

        match outcome.await {
            Ok(result) => result,
            Err(_) => Err(CalcError::internal(format!(
                "BC 进程 #{} 的请求未得到响应",
                self.id()
            ))),
        }
    }

    async fn write_line(&self, statement: &str) -> Result<()> {
        let mut guard = self.inner.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| CalcError::not_ready("BC 进程的 stdin 已关闭"))?;

        let mut line = String::with_capacity(statement.len() + 1);
        line.push_str(statement);
        line.push('\n');

        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }
}

impl fmt::Debug for BcWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.shared();
        f.debug_struct("BcWorker")
            .field("id", &self.inner.id)
            .field("pid", &shared.pid)
            .field("state", &shared.state)
            .field("precision", &shared.precision)
            .finish()
    }
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn kill(&self) {
        let mut shared = self.shared();
        let was = shared.state;
        shared.state = WorkerState::Dead;

        if let Some(pending) = shared.pending.take() {
            pending.resolve(Err(CalcError::ProcessExit {
                worker_id: self.id,
                reason: ExitReason::Killed,
            }));
        }
        if let Some(switch) = shared.kill_switch.take() {
            let _ = switch.send(());
        }
        drop(shared);

        // 写入方持有锁时不等待，子进程退出后管道自然关闭
        if let Ok(mut stdin) = self.stdin.try_lock() {
            stdin.take();
        }

        if was != WorkerState::Dead {
            debug!("[进程 {}] 已终止 (原状态: {})", self.id, was);
        }
    }

    /// 仅当 `request_id` 仍是当前请求时以错误结束它
    fn fail_request(&self, request_id: u64, error: CalcError) {
        let mut shared = self.shared();
        if shared.pending.as_ref().map(|p| p.id) == Some(request_id) {
            if let Some(pending) = shared.pending.take() {
                pending.resolve(Err(error));
            }
        }
    }

    fn on_output(&self, stream: Stream, text: &str) {
        let mut shared = self.shared();
        match stream {
            Stream::Stdout => {
                shared.stdout_buf.push_str(text);
                let Some(line) = take_result_line(&mut shared.stdout_buf) else {
                    return;
                };
                match shared.pending.take() {
                    Some(pending) => {
                        shared.state = WorkerState::Ready;
                        pending.resolve(Ok(line));
                    }
                    None => debug!("[进程 {}] 丢弃无对应请求的输出: {}", self.id, line),
                }
            }
            Stream::Stderr => {
                shared.stderr_buf.push_str(text);
                // bc 会分几次写出同一条错误，等到整行到齐再处理
                let Some(end) = shared.stderr_buf.rfind('\n') else {
                    return;
                };
                let rest = shared.stderr_buf.split_off(end + 1);
                let complete = std::mem::replace(&mut shared.stderr_buf, rest);
                let message = complete.trim().to_string();
                if message.is_empty() {
                    return;
                }
                match shared.pending.take() {
                    Some(pending) => {
                        // 进程本身仍然可用
                        shared.state = WorkerState::Ready;
                        pending.resolve(Err(CalcError::Runtime(message)));
                    }
                    None => debug!("[进程 {}] 丢弃无对应请求的错误输出: {}", self.id, message),
                }
            }
        }
    }

    fn on_exit(&self, reason: ExitReason) {
        let mut shared = self.shared();
        shared.state = WorkerState::Dead;
        shared.kill_switch = None;

        match shared.pending.take() {
            Some(pending) => {
                warn!("[进程 {}] 在请求未完成时退出: {}", self.id, reason);
                pending.resolve(Err(CalcError::ProcessExit {
                    worker_id: self.id,
                    reason,
                }));
            }
            None if reason.is_success() || reason == ExitReason::Killed => {
                debug!("[进程 {}] 已退出: {}", self.id, reason)
            }
            None => warn!("[进程 {}] 空闲时异常退出: {}", self.id, reason),
        }
        drop(shared);
        self.exited.send_replace(true);

        if let Ok(mut stdin) = self.stdin.try_lock() {
            stdin.take();
        }
    }
}

/// 持续读取一个输出流，直到 EOF 或进程句柄全部被丢弃
async fn pump<R>(inner: Weak<Inner>, mut reader: R, stream: Stream)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("读取 {:?} 失败: {}", stream, e);
                break;
            }
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_output(stream, &String::from_utf8_lossy(&chunk[..n]));
    }
}

/// 等待子进程退出，或在收到终止信号（包括所有句柄被丢弃）时杀掉它
async fn supervise(inner: Weak<Inner>, worker_id: usize, mut child: Child, kill_rx: oneshot::Receiver<()>) {
    let reason = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => ExitReason::from_status(status),
            Err(e) => {
                warn!("[进程 {}] 等待退出失败: {}", worker_id, e);
                ExitReason::Unknown
            }
        },
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                debug!("[进程 {}] 发送终止信号失败: {}", worker_id, e);
            }
            let _ = child.wait().await;
            ExitReason::Killed
        }
    };

    if let Some(inner) = inner.upgrade() {
        inner.on_exit(reason);
    }
}

/// 请求的截止计时器
async fn expire(inner: Weak<Inner>, request_id: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    let pending = {
        let mut shared = inner.shared();
        match shared.pending.as_ref() {
            Some(p) if p.id == request_id => shared.pending.take(),
            _ => None,
        }
    };
    let Some(pending) = pending else {
        return;
    };

    warn!(
        "[进程 {}] 计算超时 ({}ms)，终止进程",
        inner.id,
        timeout.as_millis()
    );
    // 先终止进程，调用方收到超时时进程已是 Dead
    inner.kill();
    // 不经过 resolve()：当前任务就是 deadline 本身
    let _ = pending.sink.send(Err(CalcError::Timeout {
        timeout_ms: timeout.as_millis(),
    }));
}

fn spawn_error(program: &str, err: std::io::Error) -> CalcError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return CalcError::spawn_failed(
            format!(
                "未找到 BC 计算器 ({})，请先安装 bc（例如 'sudo apt-get install bc'）",
                program
            ),
            Some(err),
        );
    }
    CalcError::spawn_failed(format!("无法启动 {}: {}", program, err), Some(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EngineCommand;

    fn options_for(program: &str) -> WorkerOptions {
        WorkerOptions {
            engine: EngineCommand {
                program: program.to_string(),
                args: vec![],
            },
            ..WorkerOptions::default()
        }
    }

    #[test]
    fn test_check_precision() {
        assert!(check_precision(0).is_ok());
        assert!(check_precision(100).is_ok());
        assert!(matches!(check_precision(101), Err(CalcError::Validation(_))));
    }

    #[test]
    fn test_new_worker_is_starting() {
        let worker = BcWorker::new(WorkerOptions::default());
        assert_eq!(worker.state(), WorkerState::Starting);
        assert!(!worker.is_available());
        assert_eq!(worker.precision(), 20);
        assert_eq!(worker.pid(), None);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = BcWorker::new(WorkerOptions::default());
        let b = BcWorker::new(WorkerOptions::default());
        assert_ne!(a.id(), b.id());
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }

    #[tokio::test]
    async fn test_evaluate_before_start_is_not_ready() {
        let worker = BcWorker::new(WorkerOptions::default());
        let err = worker.evaluate("1+1", None).await.unwrap_err();
        assert!(matches!(err, CalcError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_invalid_precision_is_rejected_without_process() {
        let worker = BcWorker::new(WorkerOptions::default());
        let err = worker.set_precision(101).await.unwrap_err();
        assert!(matches!(err, CalcError::Validation(_)));
        assert_eq!(worker.precision(), 20);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let worker = BcWorker::new(options_for("/nonexistent/definitely-not-bc"));
        let err = worker.start().await.unwrap_err();
        assert!(matches!(err, CalcError::Spawn { .. }));
        assert_eq!(worker.state(), WorkerState::Dead);
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let worker = BcWorker::new(WorkerOptions::default());
        worker.kill();
        worker.kill();
        assert_eq!(worker.state(), WorkerState::Dead);
        assert!(worker.start().await.is_err());
    }
}
