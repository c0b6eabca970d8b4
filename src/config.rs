//! 配置常量模块
//!
//! 调度器的默认参数都在这里定义，便于后期修改

/// 库名称
pub const LIB_NAME: &str = "costack";

/// 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 共享栈大小：1MB
pub const STACK_SIZE: usize = 1024 * 1024;

/// 协程表初始容量
pub const DEFAULT_COROUTINE: usize = 16;

/// 栈对齐：16 字节
pub const STACK_ALIGNMENT: usize = 16;

/// 是否在共享栈低地址端放置保护页
pub const GUARD_PAGE: bool = true;
