//! 协程调度器
//!
//! 单线程协作式调度：同一时刻最多一个协程在共享栈上运行。
//! `resume` 把控制权交给协程，直到它 `yield` 或返回才回到调用者
//!
//! 调度器由调用者持有（`Pin<Box<Scheduler>>`），协程栈上保存着
//! 指向它的指针，因此它的地址在销毁前不能改变

use std::any::Any;
use std::cell::Cell;
use std::marker::PhantomPinned;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::ptr;

use parking_lot::Mutex;

use super::context::{self, Context};
use super::coroutine::{Coroutine, CoroutineStatus};
use super::error::{fatal, CoroutineError, Result};
use super::slots::SlotTable;
use super::stack::{self, SharedStack, StackBackup};
use super::CoroutineId;
use crate::config::{DEFAULT_COROUTINE, GUARD_PAGE, STACK_SIZE};

/// 调度器配置
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 共享栈大小（向上取整到页大小）
    pub stack_size: usize,
    /// 协程表初始容量
    pub initial_capacity: usize,
    /// 是否在共享栈下方放置保护页
    pub guard_page: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stack_size: STACK_SIZE,
            initial_capacity: DEFAULT_COROUTINE,
            guard_page: GUARD_PAGE,
        }
    }
}

/// 协程调度器
pub struct Scheduler {
    /// 所有协程共用的栈
    stack: SharedStack,
    /// 调用 resume 的执行流的上下文
    main: Context,
    /// 协程表
    slots: Mutex<SlotTable>,
    /// 正在运行的协程
    running: Cell<Option<CoroutineId>>,
    /// 协程内未捕获的 panic，等待在 resume 中重新抛出
    panic: Cell<Option<Box<dyn Any + Send>>>,
    _pin: PhantomPinned,
}

impl Scheduler {
    /// 使用默认配置创建调度器
    pub fn open() -> Result<Pin<Box<Self>>> {
        Self::with_config(SchedulerConfig::default())
    }

    /// 使用指定配置创建调度器
    pub fn with_config(config: SchedulerConfig) -> Result<Pin<Box<Self>>> {
        let stack = SharedStack::new(config.stack_size, config.guard_page)?;
        log::debug!(
            "scheduler open: {} byte shared stack, {} slots",
            stack.size(),
            config.initial_capacity
        );

        Ok(Box::pin(Self {
            stack,
            main: Context::new(),
            slots: Mutex::new(SlotTable::with_capacity(config.initial_capacity)),
            running: Cell::new(None),
            panic: Cell::new(None),
            _pin: PhantomPinned,
        }))
    }

    /// 销毁调度器及其所有协程
    ///
    /// 挂起中的协程不会被展开，它们栈上的值不会被析构
    pub fn close(self: Pin<Box<Self>>) {
        drop(self);
    }

    /// 创建协程，返回它的 ID
    ///
    /// 协程处于 Ready 状态，第一次 resume 时才开始执行 `entry`
    pub fn create<F>(&self, entry: F) -> CoroutineId
    where
        F: FnOnce(&Scheduler) + 'static,
    {
        let co = Box::new(Coroutine::new(Box::new(entry)));
        let id = self.slots.lock().insert(co);
        log::debug!("coroutine {} created", id);
        id
    }

    /// 启动或继续协程，直到它让出或结束
    ///
    /// 已死亡的协程什么也不做；协程内的 panic 会从这里继续抛出
    pub fn try_resume(&self, id: CoroutineId) -> Result<()> {
        if let Some(running) = self.running.get() {
            return Err(CoroutineError::AlreadyRunning { running });
        }

        let target: *const Context = {
            let mut slots = self.slots.lock();
            slots.check(id)?;
            let Some(co) = slots.get_mut(id) else {
                return Ok(());
            };

            match co.status {
                CoroutineStatus::Ready => {
                    // SAFETY: 共享栈和 main 都属于已固定的调度器，比协程活得久
                    unsafe {
                        co.context.make(
                            self.stack.base(),
                            self.stack.size(),
                            Some(&self.main),
                            trampoline,
                            self as *const Self as usize,
                        )?;
                    }
                    log::trace!("coroutine {} started", id);
                }
                CoroutineStatus::Suspended => {
                    // SAFETY: 没有协程在运行，当前执行流不在共享栈上
                    unsafe { self.stack.restore(&co.backup) };
                    log::trace!("coroutine {} resumed ({} bytes restored)", id, co.backup.size());
                }
                status => unreachable!("coroutine {} is {:?} while nothing runs", id, status),
            }

            co.status = CoroutineStatus::Running;
            ptr::addr_of!(co.context)
        };

        self.running.set(Some(id));
        // SAFETY: 协程对象在堆上，地址不随协程表扩容改变
        unsafe { context::swap(&self.main, target)? };

        if let Some(payload) = self.panic.take() {
            panic::resume_unwind(payload);
        }
        Ok(())
    }

    /// 同 [`try_resume`](Self::try_resume)，出错时终止
    pub fn resume(&self, id: CoroutineId) {
        if let Err(err) = self.try_resume(id) {
            fatal(err);
        }
    }

    /// 挂起当前协程，回到调用 resume 的地方
    pub fn try_yield(&self) -> Result<()> {
        let id = self.running.get().ok_or(CoroutineError::NotRunning)?;
        self.stack.live_extent(stack::stack_marker())?;

        let (from, backup) = {
            let mut slots = self.slots.lock();
            let co = slots
                .get_mut(id)
                .unwrap_or_else(|| unreachable!("running coroutine {} has no slot", id));
            co.status = CoroutineStatus::Suspended;
            (ptr::addr_of!(co.context), ptr::addr_of_mut!(co.backup))
        };
        self.running.set(None);

        // SAFETY: 正在共享栈上运行；协程对象在 resume 回来之前不会被释放
        unsafe { self.suspend(id, from, backup) };
        Ok(())
    }

    /// 同 [`try_yield`](Self::try_yield)，出错时终止
    pub fn yield_now(&self) {
        if let Err(err) = self.try_yield() {
            fatal(err);
        }
    }

    /// 保存栈并切回 main
    ///
    /// 栈快照之后到切换之前不能再写入需要在恢复后读取的栈数据，
    /// 所以日志放在快照之前，切换之后直接返回
    #[inline(never)]
    unsafe fn suspend(&self, id: CoroutineId, from: *const Context, backup: *mut StackBackup) {
        log::trace!("coroutine {} yield", id);

        let sp = stack::stack_marker();
        if let Err(err) = self.stack.save(sp, &mut *backup) {
            fatal(err);
        }

        if let Err(err) = context::swap(from, &self.main) {
            fatal(err.into());
        }
    }

    /// 在共享栈上执行当前协程的入口函数，然后回收它
    fn run_current(&self) {
        let Some(id) = self.running.get() else {
            unreachable!("coroutine trampoline entered with nothing running");
        };

        let entry = self.slots.lock().get_mut(id).and_then(Coroutine::take_entry);
        if let Some(entry) = entry {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| entry(self))) {
                self.panic.set(Some(payload));
            }
        }

        self.complete(id);
    }

    /// 协程结束：清空槽位并释放栈备份
    fn complete(&self, id: CoroutineId) {
        let co = self.slots.lock().remove(id);
        drop(co);
        self.running.set(None);
        log::debug!("coroutine {} dead", id);
    }

    /// 查询协程状态
    pub fn try_status(&self, id: CoroutineId) -> Result<CoroutineStatus> {
        let slots = self.slots.lock();
        slots.check(id)?;
        Ok(slots.get(id).map_or(CoroutineStatus::Dead, |co| co.status))
    }

    /// 同 [`try_status`](Self::try_status)，出错时终止
    pub fn status(&self, id: CoroutineId) -> CoroutineStatus {
        self.try_status(id).unwrap_or_else(|err| fatal(err))
    }

    /// 正在运行的协程 ID
    #[inline]
    pub fn running_id(&self) -> Option<CoroutineId> {
        self.running.get()
    }

    /// 存活协程数量
    pub fn live_count(&self) -> usize {
        self.slots.lock().live_count()
    }

    /// 协程表容量
    pub fn capacity(&self) -> usize {
        self.slots.lock().capacity()
    }

    /// 共享栈大小
    pub fn stack_size(&self) -> usize {
        self.stack.size()
    }

    /// 存活协程的栈备份使用情况
    pub fn backup_usage(&self, id: CoroutineId) -> Option<BackupUsage> {
        self.slots.lock().get(id).map(|co| BackupUsage {
            size: co.backup.size(),
            capacity: co.backup.capacity(),
        })
    }

    /// 获取调度统计信息
    pub fn stats(&self) -> SchedulerStats {
        let slots = self.slots.lock();
        SchedulerStats {
            live_count: slots.live_count(),
            capacity: slots.capacity(),
            stack_size: self.stack.size(),
            backup_bytes: slots.iter().map(|(_, co)| co.backup.capacity()).sum(),
            running: self.running.get(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let dropped = self.slots.get_mut().clear();
        log::debug!("scheduler closed, {} coroutines destroyed", dropped);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("stack", &self.stack)
            .field("running", &self.running.get())
            .field("slots", &*self.slots.lock())
            .finish()
    }
}

/// 协程在共享栈上的入口
extern "C" fn trampoline(lo: u32, hi: u32) {
    // SAFETY: 参数是 try_resume 传入的调度器地址，调度器已固定
    let sched = unsafe { &*(context::join_arg(lo, hi) as *const Scheduler) };
    sched.run_current();
    // 协程对象已释放，直接回到 resume 的调用者
    unsafe { context::set(&sched.main) }
}

/// 栈备份使用情况
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupUsage {
    /// 最近一次挂起时保存的字节数
    pub size: usize,
    /// 已分配容量
    pub capacity: usize,
}

/// 调度统计信息
#[derive(Debug)]
pub struct SchedulerStats {
    /// 存活协程数量
    pub live_count: usize,
    /// 协程表容量
    pub capacity: usize,
    /// 共享栈大小
    pub stack_size: usize,
    /// 所有存活协程栈备份的已分配容量之和
    pub backup_bytes: usize,
    /// 正在运行的协程
    pub running: Option<CoroutineId>,
}
