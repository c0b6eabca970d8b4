//! 共享栈协程库
//!
//! 调度器只持有一块固定大小的栈，正在运行的协程独占它；
//! 其他协程挂起时把自己的活跃栈拷贝到私有备份中
//!
//! ```no_run
//! use costack::{CoroutineStatus, Scheduler};
//!
//! let s = Scheduler::open().unwrap();
//! let id = s.create(|s| {
//!     println!("first");
//!     s.yield_now();
//!     println!("second");
//! });
//! s.resume(id);
//! assert_eq!(s.status(id), CoroutineStatus::Suspended);
//! s.resume(id);
//! assert_eq!(s.status(id), CoroutineStatus::Dead);
//! ```

pub mod config;
pub mod runtime;

pub use runtime::{
    BackupUsage, CoroutineError, CoroutineId, CoroutineStatus, Result, Scheduler,
    SchedulerConfig, SchedulerStats,
};
