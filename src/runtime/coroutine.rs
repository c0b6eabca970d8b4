//! 协程结构
//!
//! 协程是调度的基本单位：入口函数、执行上下文、状态和栈备份

use super::context::Context;
use super::scheduler::Scheduler;
use super::stack::StackBackup;

/// 协程入口，参数通过闭包捕获
pub type Entry = Box<dyn FnOnce(&Scheduler) + 'static>;

/// 协程状态
///
/// `Dead` 不会保存在协程里：协程死亡时它所在的槽位被清空
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    /// 已创建，尚未运行
    Ready,
    /// 正在运行
    Running,
    /// 已让出，等待 resume
    Suspended,
    /// 已结束
    Dead,
}

/// 协程
pub struct Coroutine {
    /// 入口函数，第一次运行时取走
    entry: Option<Entry>,
    /// 协程状态
    pub status: CoroutineStatus,
    /// 执行上下文，至少运行过一次后才有效
    pub context: Context,
    /// 挂起时的栈备份
    pub backup: StackBackup,
}

impl Coroutine {
    /// 创建新的协程
    pub fn new(entry: Entry) -> Self {
        Self {
            entry: Some(entry),
            status: CoroutineStatus::Ready,
            context: Context::new(),
            backup: StackBackup::new(),
        }
    }

    /// 取走入口函数（每个协程只会取到一次）
    pub fn take_entry(&mut self) -> Option<Entry> {
        self.entry.take()
    }
}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("status", &self.status)
            .field("started", &self.entry.is_none())
            .field("backup", &self.backup)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_taken_once() {
        let mut co = Coroutine::new(Box::new(|_| {}));
        assert_eq!(co.status, CoroutineStatus::Ready);
        assert!(co.take_entry().is_some());
        assert!(co.take_entry().is_none());
        assert_eq!(co.backup.capacity(), 0);
    }
}
