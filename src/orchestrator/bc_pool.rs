//! BC 进程池 - 编排层
//!
//! ## 职责
//!
//! 持有固定数量的 `BcWorker`，负责分配、回收和替换。
//!
//! ## 核心功能
//!
//! 1. **并发初始化**：同时启动 `pool_size` 个进程，任一失败则整体失败并清理
//! 2. **获取/归还**：`acquire()` 只返回健康进程；没有空闲进程时排队等待，超时后失败。
//!    借出的进程包在 `PooledWorker` 里，离开作用域即归还，调用方被取消也不会漏还
//! 3. **自动替换**：归还的进程若已不健康，后台启动替换进程，不阻塞归还方
//! 4. **关闭**：终止所有进程并唤醒所有等待者
//!
//! ## 并发模型
//!
//! - 空闲进程数由 `Semaphore` 计数，等待者通过它排队
//! - `members` / `available` 只在持锁的同步代码中修改，锁从不跨越 `.await`

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{CalcError, Result};
use crate::infrastructure::BcWorker;
use crate::models::{PoolConfig, PoolStatus};

/// 进程池
///
/// 句柄可以廉价 clone，所有 clone 共享同一组进程。
#[derive(Clone)]
pub struct BcPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    /// 许可数 == `available.len()`
    permits: Semaphore,
    init_lock: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct PoolState {
    initialized: bool,
    members: Vec<BcWorker>,
    available: VecDeque<BcWorker>,
}

/// 从进程池借出的进程
///
/// 通过 `Deref` 当作 `BcWorker` 使用。被丢弃时自动归还给进程池，
/// 包括持有它的 future 在 `.await` 中途被取消的情况。
pub struct PooledWorker {
    pool: BcPool,
    worker: BcWorker,
}

impl PooledWorker {
    /// 立即归还
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for PooledWorker {
    type Target = BcWorker;

    fn deref(&self) -> &BcWorker {
        &self.worker
    }
}

impl Drop for PooledWorker {
    fn drop(&mut self) {
        self.pool.release(self.worker.clone());
    }
}

impl fmt::Debug for PooledWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledWorker").field(&self.worker).finish()
    }
}

impl PoolState {
    fn is_member(&self, worker: &BcWorker) -> bool {
        self.members.iter().any(|m| m.same_as(worker))
    }
}

impl BcPool {
    /// 创建进程池（尚未启动任何进程）
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(PoolState::default()),
                permits: Semaphore::new(0),
                init_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// 并发启动所有进程
    ///
    /// 任一进程启动失败时，已启动的进程全部终止，进程池保持未初始化状态。
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.inner.init_lock.lock().await;

        if self.inner.permits.is_closed() {
            return Err(CalcError::not_ready("BC 进程池已关闭，不能再次初始化"));
        }
        let initialized = self.inner.state().initialized;
        if initialized {
            warn!("BC 进程池已经初始化");
            return Ok(());
        }

        let pool_size = self.inner.config.pool_size;
        info!("正在初始化 BC 进程池 ({} 个进程)...", pool_size);

        let starts = (0..pool_size).map(|_| BcWorker::spawn(self.inner.config.worker_options()));
        let mut started = Vec::with_capacity(pool_size);
        let mut first_error = None;
        for (index, result) in join_all(starts).await.into_iter().enumerate() {
            match result {
                Ok(worker) => started.push(worker),
                Err(e) => {
                    error!("[进程池 {}] 启动失败: {}", index, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            for worker in &started {
                worker.kill();
            }
            error!("初始化 BC 进程池失败，已清理 {} 个进程", started.len());
            return Err(e);
        }

        {
            let mut state = self.inner.state();
            if self.inner.permits.is_closed() {
                drop(state);
                for worker in &started {
                    worker.kill();
                }
                return Err(CalcError::not_ready("BC 进程池在初始化期间被关闭"));
            }
            state.members = started.clone();
            state.available = started.into();
            state.initialized = true;
        }
        self.inner.permits.add_permits(pool_size);

        info!("BC 进程池初始化完成，共 {} 个进程", pool_size);
        Ok(())
    }

    /// 获取一个空闲进程
    ///
    /// 返回时保证 `is_available()` 为真。没有空闲进程时等待，最长等待
    /// `acquire_timeout`。等待者之间的顺序不作保证。
    pub async fn acquire(&self) -> Result<PooledWorker> {
        let wait = self.inner.config.acquire_timeout;
        let deadline = Instant::now() + wait;

        loop {
            let initialized = self.inner.state().initialized;
            if !initialized {
                return Err(CalcError::not_ready("BC 进程池未初始化"));
            }

            let permit = match tokio::time::timeout_at(deadline, self.inner.permits.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(CalcError::not_ready("BC 进程池已关闭")),
                Err(_) => {
                    return Err(CalcError::not_ready(format!(
                        "等待 {}ms 后仍没有可用的 BC 进程",
                        wait.as_millis()
                    )))
                }
            };
            permit.forget();

            let candidate = self.inner.state().available.pop_front();
            let Some(worker) = candidate else {
                return Err(CalcError::not_ready("BC 进程池已关闭"));
            };

            if worker.is_available() {
                debug!("[进程 {}] 已分配", worker.id());
                return Ok(PooledWorker {
                    pool: self.clone(),
                    worker,
                });
            }

            // 进程在空闲期间死亡：丢弃并就地替换，然后重新排队
            warn!(
                "[进程 {}] 已不可用 (状态: {})，替换后重试",
                worker.id(),
                worker.state()
            );
            self.discard(&worker);
            // 替换在独立任务中完成，调用方中途放弃也会被加入进程池
            let pool = self.clone();
            let replaced = tokio::spawn(async move { pool.replace().await })
                .await
                .map_err(|e| CalcError::internal(format!("替换进程任务异常: {}", e)))?;
            if let Err(e) = replaced {
                // 调用方拿到错误，进程池在后台继续补齐
                error!("创建替换进程失败: {}", e);
                if !matches!(e, CalcError::NotReady(_)) {
                    self.spawn_replacement();
                }
                return Err(e);
            }
        }
    }

    /// 归还进程
    ///
    /// 健康的进程回到空闲队列；不健康的进程被移除并终止，替换进程在后台启动。
    /// 通常由 `PooledWorker` 在被丢弃时调用。
    pub fn release(&self, worker: BcWorker) {
        let mut state = self.inner.state();

        if !state.is_member(&worker) {
            drop(state);
            warn!("[进程 {}] 不属于进程池，直接终止", worker.id());
            worker.kill();
            return;
        }
        if state.available.iter().any(|w| w.same_as(&worker)) {
            warn!("[进程 {}] 重复归还，忽略", worker.id());
            return;
        }

        if worker.is_available() {
            state.available.push_back(worker);
            drop(state);
            self.inner.permits.add_permits(1);
            return;
        }

        state.members.retain(|m| !m.same_as(&worker));
        drop(state);

        warn!(
            "[进程 {}] 状态异常 ({})，正在替换...",
            worker.id(),
            worker.state()
        );
        worker.kill();
        self.spawn_replacement();
    }

    /// 终止所有进程
    ///
    /// 可重复调用；返回时所有子进程都已退出。
    pub async fn shutdown(&self) {
        info!("正在关闭 BC 进程池...");
        self.inner.permits.close();

        let members = {
            let mut state = self.inner.state();
            state.initialized = false;
            state.available.clear();
            std::mem::take(&mut state.members)
        };

        for worker in &members {
            worker.kill();
        }
        join_all(members.iter().map(BcWorker::wait_exit)).await;

        info!("BC 进程池已关闭");
    }

    /// 状态快照
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state();
        let total = state.members.len();
        let available = state.available.len();
        PoolStatus {
            initialized: state.initialized,
            total,
            available,
            busy: total.saturating_sub(available),
        }
    }

    /// 在后台启动替换进程
    ///
    /// 尽力而为：失败只记录日志，不影响调用方。
    fn spawn_replacement(&self) {
        // 借出的进程可能在运行时之外被丢弃
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("当前没有 tokio 运行时，跳过替换进程");
            return;
        };
        let pool = self.clone();
        runtime.spawn(async move {
            if let Err(e) = pool.replace().await {
                error!("创建替换进程失败: {}", e);
            }
        });
    }

    /// 启动一个新进程并加入进程池
    async fn replace(&self) -> Result<()> {
        let worker = BcWorker::spawn(self.inner.config.worker_options()).await?;
        let id = worker.id();
        if !self.admit(worker) {
            return Err(CalcError::not_ready("BC 进程池已关闭，替换进程已丢弃"));
        }
        info!("[进程 {}] 替换进程已就绪", id);
        Ok(())
    }

    /// 把新进程加入进程池；进程池已关闭时终止它
    fn admit(&self, worker: BcWorker) -> bool {
        let mut state = self.inner.state();
        if !state.initialized {
            drop(state);
            debug!("[进程 {}] 进程池已关闭，丢弃替换进程", worker.id());
            worker.kill();
            return false;
        }
        state.members.push(worker.clone());
        state.available.push_back(worker);
        drop(state);
        self.inner.permits.add_permits(1);
        true
    }

    fn discard(&self, worker: &BcWorker) {
        self.inner
            .state()
            .members
            .retain(|m| !m.same_as(worker));
        worker.kill();
    }
}

impl PoolInner {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::BcWorker;
    use crate::models::{EngineCommand, WorkerOptions, WorkerState};
    use std::time::Duration;

    fn missing_engine_config() -> PoolConfig {
        PoolConfig {
            pool_size: 2,
            engine: EngineCommand {
                program: "/nonexistent/definitely-not-bc".to_string(),
                args: vec![],
            },
            acquire_timeout: Duration::from_millis(50),
            ..PoolConfig::default()
        }
    }

    #[test]
    fn test_new_pool_is_empty() {
        let pool = BcPool::new(PoolConfig::default());
        assert_eq!(
            pool.status(),
            PoolStatus {
                initialized: false,
                total: 0,
                available: 0,
                busy: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_acquire_before_initialize() {
        let pool = BcPool::new(PoolConfig::default());
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, CalcError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_initialize_failure_leaves_no_members() {
        let pool = BcPool::new(missing_engine_config());
        let err = pool.initialize().await.unwrap_err();
        assert!(matches!(err, CalcError::Spawn { .. }));
        assert_eq!(pool.status().total, 0);
        assert!(!pool.status().initialized);
    }

    #[tokio::test]
    async fn test_release_foreign_worker_kills_it() {
        let pool = BcPool::new(PoolConfig::default());
        let stranger = BcWorker::new(WorkerOptions::default());
        pool.release(stranger.clone());
        assert_eq!(stranger.state(), WorkerState::Dead);
        assert_eq!(pool.status().available, 0);
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_worker() {
        let pool = BcPool::new(PoolConfig::default());
        let stranger = BcWorker::new(WorkerOptions::default());
        drop(PooledWorker {
            pool: pool.clone(),
            worker: stranger.clone(),
        });
        assert_eq!(stranger.state(), WorkerState::Dead);
    }

    #[test]
    fn test_unhealthy_guard_dropped_outside_runtime() {
        let pool = BcPool::new(missing_engine_config());
        let member = BcWorker::new(WorkerOptions::default());
        {
            let mut state = pool.inner.state();
            state.initialized = true;
            state.members.push(member.clone());
        }

        // 没有运行时可用时跳过替换，而不是 panic
        drop(PooledWorker {
            pool: pool.clone(),
            worker: member.clone(),
        });
        assert_eq!(member.state(), WorkerState::Dead);
        assert_eq!(pool.status().total, 0);
    }

    #[tokio::test]
    async fn test_initialize_after_shutdown_fails() {
        let pool = BcPool::new(PoolConfig::default());
        pool.shutdown().await;
        pool.shutdown().await;
        let err = pool.initialize().await.unwrap_err();
        assert!(matches!(err, CalcError::NotReady(_)));
        assert_eq!(pool.status().total, 0);
    }
}
