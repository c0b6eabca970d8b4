//! 调度器错误
//!
//! 所有错误都是编程错误：`try_*` 接口把它们作为值返回，
//! 其余接口通过 [`fatal`] 直接终止

use std::io;

use thiserror::Error;

use super::CoroutineId;

/// 调度器错误
#[derive(Debug, Error)]
pub enum CoroutineError {
    /// 协程 ID 超出协程表范围
    #[error("coroutine id {id} out of range (capacity {capacity})")]
    OutOfRange { id: CoroutineId, capacity: usize },

    /// 已有协程在运行时再次 resume
    #[error("coroutine {running} is already running")]
    AlreadyRunning { running: CoroutineId },

    /// 没有协程运行时调用 yield
    #[error("yield called with no coroutine running")]
    NotRunning,

    /// 当前栈指针不在这块共享栈上（在别的栈上调用了 yield）
    #[error("stack pointer {sp:#x} is not on the shared stack (top {top:#x})")]
    NotOnStack { sp: usize, top: usize },

    /// 活跃栈超出共享栈容量
    #[error("stack overflow: {used} bytes live on a {capacity} byte shared stack")]
    StackOverflow { used: usize, capacity: usize },

    /// 内存分配失败
    #[error("failed to allocate {size} bytes")]
    Alloc { size: usize },

    /// 平台上下文接口失败
    #[error("execution context error: {0}")]
    Context(#[from] io::Error),
}

/// 调度器结果类型
pub type Result<T> = std::result::Result<T, CoroutineError>;

/// 不变量被破坏，立即终止
#[cold]
#[track_caller]
pub fn fatal(err: CoroutineError) -> ! {
    log::error!("{}", err);
    panic!("{}", err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoroutineError::OutOfRange { id: 20, capacity: 16 };
        assert_eq!(err.to_string(), "coroutine id 20 out of range (capacity 16)");

        let err = CoroutineError::StackOverflow { used: 2048, capacity: 1024 };
        assert!(err.to_string().starts_with("stack overflow"));
    }

    #[test]
    #[should_panic(expected = "yield called with no coroutine running")]
    fn test_fatal_panics() {
        fatal(CoroutineError::NotRunning);
    }
}
