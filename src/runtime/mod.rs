//! 协程运行时模块
//!
//! 实现共享栈的协作式协程调度
//!
//! 核心组件：
//! - Scheduler: 调度器，持有共享栈、调用者上下文和协程表
//! - Coroutine: 协程，包含入口函数、执行上下文和栈备份
//! - Context: 平台执行上下文的最小封装

pub mod context;
pub mod coroutine;
pub mod error;
pub mod scheduler;
pub mod slots;
pub mod stack;

pub use coroutine::{Coroutine, CoroutineStatus};
pub use error::{CoroutineError, Result};
pub use scheduler::{BackupUsage, Scheduler, SchedulerConfig, SchedulerStats};
pub use stack::{SharedStack, StackBackup};

/// 协程 ID 类型
pub type CoroutineId = usize;
