//! 共享栈与栈备份
//!
//! 所有协程都在同一块固定大小的共享栈上运行。协程挂起时，
//! 它在共享栈上的活跃部分（从当前栈指针到栈顶）被拷贝到自己的
//! 备份缓冲区；恢复时再原样拷回同一地址范围

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};

use super::error::{CoroutineError, Result};
use crate::config::STACK_ALIGNMENT;

/// 获取系统页大小
pub fn page_size() -> usize {
    // SAFETY: sysconf 没有前置条件
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// 当前栈指针的近似值
///
/// 返回的是一个更深一层栈帧里的局部变量地址，
/// 因此一定低于调用者栈帧中的所有数据
#[inline(never)]
pub fn stack_marker() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

/// 共享栈
///
/// 按页对齐分配；启用保护页时，最低的一页被设为不可访问，
/// 栈真正溢出时触发 SIGSEGV 而不是悄悄破坏堆
pub struct SharedStack {
    /// 分配起点（含保护页）
    alloc: NonNull<u8>,
    /// 分配布局
    layout: Layout,
    /// 保护页字节数，0 表示未启用
    guard: usize,
    /// 可用栈大小
    size: usize,
}

impl SharedStack {
    /// 分配共享栈，`size` 向上取整到页大小
    pub fn new(size: usize, guard_page: bool) -> Result<Self> {
        let page = page_size();
        let size = size.max(page).div_ceil(page) * page;
        let guard = if guard_page { page } else { 0 };
        let total = size + guard;

        let layout = Layout::from_size_align(total, page.max(STACK_ALIGNMENT))
            .map_err(|_| CoroutineError::Alloc { size: total })?;

        // SAFETY: layout 大小非零
        let alloc = NonNull::new(unsafe { alloc::alloc(layout) })
            .ok_or(CoroutineError::Alloc { size: total })?;

        if guard > 0 {
            // SAFETY: 分配按页对齐，保护页完全位于分配范围内
            let rc = unsafe { libc::mprotect(alloc.as_ptr().cast(), guard, libc::PROT_NONE) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                unsafe { alloc::dealloc(alloc.as_ptr(), layout) };
                return Err(err.into());
            }
        }

        Ok(Self { alloc, layout, guard, size })
    }

    /// 栈底地址（低地址，保护页之上）
    #[inline]
    pub fn base(&self) -> *mut u8 {
        // SAFETY: guard 不超过分配大小
        unsafe { self.alloc.as_ptr().add(self.guard) }
    }

    /// 栈顶地址（高地址，栈从这里向下增长）
    #[inline]
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base().add(self.size) }
    }

    /// 可用栈大小
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// 是否启用了保护页
    #[inline]
    pub fn has_guard(&self) -> bool {
        self.guard > 0
    }

    /// 从 `sp` 到栈顶的活跃字节数
    ///
    /// `sp` 高于栈顶说明调用者不在这块共享栈上；低于栈底说明栈已溢出
    pub fn live_extent(&self, sp: usize) -> Result<usize> {
        let top = self.top() as usize;
        if sp > top {
            return Err(CoroutineError::NotOnStack { sp, top });
        }
        let used = top - sp;
        if used > self.size {
            return Err(CoroutineError::StackOverflow { used, capacity: self.size });
        }
        Ok(used)
    }

    /// 把 `[sp, top)` 拷贝到 `backup`，返回拷贝的字节数
    ///
    /// # Safety
    ///
    /// 调用者必须运行在这块共享栈上，`sp` 不高于调用者的栈帧
    pub unsafe fn save(&self, sp: usize, backup: &mut StackBackup) -> Result<usize> {
        let used = self.live_extent(sp)?;
        backup.reserve(used)?;
        ptr::copy_nonoverlapping(self.top().sub(used), backup.as_mut_ptr(), used);
        backup.size = used;
        Ok(used)
    }

    /// 把 `backup` 拷回它挂起时所在的地址范围 `[top - size, top)`
    ///
    /// # Safety
    ///
    /// 调用者不能运行在这块共享栈上
    pub unsafe fn restore(&self, backup: &StackBackup) {
        debug_assert!(backup.size <= self.size);
        ptr::copy_nonoverlapping(backup.as_ptr(), self.top().sub(backup.size), backup.size);
    }
}

impl Drop for SharedStack {
    fn drop(&mut self) {
        unsafe {
            if self.guard > 0 {
                let rc = libc::mprotect(
                    self.alloc.as_ptr().cast(),
                    self.guard,
                    libc::PROT_READ | libc::PROT_WRITE,
                );
                if rc != 0 {
                    // 保护页仍不可访问，不能还给分配器
                    log::error!(
                        "failed to unprotect shared stack guard page, leaking {} bytes: {}",
                        self.layout.size(),
                        std::io::Error::last_os_error()
                    );
                    return;
                }
            }
            alloc::dealloc(self.alloc.as_ptr(), self.layout);
        }
    }
}

impl std::fmt::Debug for SharedStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStack")
            .field("base", &self.base())
            .field("size", &self.size)
            .field("guard", &self.guard)
            .finish()
    }
}

/// 协程的栈备份
///
/// `capacity` 只增不减：容量足够时复用，不够时释放旧缓冲区
/// 并按需要的大小重新分配
#[derive(Default)]
pub struct StackBackup {
    buf: Box<[u8]>,
    size: usize,
}

impl StackBackup {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前有效字节数
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// 已分配容量
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    fn as_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }

    #[inline]
    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.buf.as_mut_ptr()
    }

    /// 保证容量至少为 `len`
    ///
    /// 旧内容不保留，下一次 save 会整体覆盖
    pub fn reserve(&mut self, len: usize) -> Result<()> {
        if self.capacity() >= len {
            return Ok(());
        }
        self.buf = Box::default();
        self.size = 0;

        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| CoroutineError::Alloc { size: len })?;
        buf.resize(len, 0);
        self.buf = buf.into_boxed_slice();
        Ok(())
    }
}

impl std::fmt::Debug for StackBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackBackup")
            .field("size", &self.size)
            .field("capacity", &self.capacity())
            .finish()
    }
}
