//! 协程执行上下文
//!
//! 对平台上下文接口（glibc ucontext）的最小封装，只提供三种能力：
//! - 捕获当前执行流的寄存器与栈状态
//! - 在给定栈内存上构造新的上下文
//! - 保存当前上下文并切换到另一个上下文
//!
//! 所有 unsafe 的平台调用都集中在这里

use std::cell::UnsafeCell;
use std::io;
use std::mem;

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
compile_error!("costack requires Linux with glibc (getcontext/makecontext/swapcontext)");

/// 上下文入口函数，参数是拆成高低 32 位的指针
pub type EntryFn = extern "C" fn(u32, u32);

/// 执行上下文
///
/// 内部是一个 `ucontext_t`，地址在切换期间必须保持不变，
/// 因此总是放在堆上或已固定的结构体里
pub struct Context {
    inner: UnsafeCell<libc::ucontext_t>,
}

impl Context {
    /// 创建空上下文（在 capture 或 make 之前不可切换）
    pub fn new() -> Self {
        Self {
            // SAFETY: ucontext_t 是纯 C 结构体，全零是合法的初始值
            inner: UnsafeCell::new(unsafe { mem::zeroed() }),
        }
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut libc::ucontext_t {
        self.inner.get()
    }

    /// 捕获当前执行流的状态
    pub fn capture(&self) -> io::Result<()> {
        // SAFETY: 指针来自 UnsafeCell，指向有效的 ucontext_t
        if unsafe { libc::getcontext(self.as_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// 在 `stack` 指向的内存上构造新上下文
    ///
    /// 切换进去后会以 `arg` 调用 `entry`；`entry` 返回时转入 `link`
    ///
    /// # Safety
    ///
    /// `stack..stack + size` 必须可写，并且在上下文存活期间有效；
    /// `link` 必须在 `entry` 返回前一直有效
    pub unsafe fn make(
        &self,
        stack: *mut u8,
        size: usize,
        link: Option<&Context>,
        entry: EntryFn,
        arg: usize,
    ) -> io::Result<()> {
        self.capture()?;

        let uc = &mut *self.as_ptr();
        uc.uc_stack.ss_sp = stack.cast();
        uc.uc_stack.ss_size = size;
        uc.uc_stack.ss_flags = 0;
        uc.uc_link = link.map_or(std::ptr::null_mut(), Context::as_ptr);

        let (lo, hi) = split_arg(arg);
        // makecontext 只接受无参函数指针，实际参数按 int 传递
        let entry: extern "C" fn() = mem::transmute(entry);
        libc::makecontext(self.as_ptr(), entry, 2, lo, hi);
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// 把当前执行流保存到 `from`，然后切换到 `to`
///
/// 返回时说明有人又切换回了 `from`。强制内联：切换必须直接发生在
/// 调用者的栈帧里，调用者之下的栈内容在切换回来时不保证有效
///
/// # Safety
///
/// 两个指针在调用期间必须有效；`to` 必须是已捕获或已构造的上下文，
/// 其使用的栈内容必须完整
#[inline(always)]
pub unsafe fn swap(from: *const Context, to: *const Context) -> io::Result<()> {
    if libc::swapcontext(raw(from), raw(to)) != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// 切换到 `to`，不保存当前执行流
///
/// # Safety
///
/// 同 [`swap`]；当前栈上的所有值都不会再被析构
pub unsafe fn set(to: *const Context) -> ! {
    libc::setcontext(raw(to));
    // setcontext 只在失败时返回，此时已经无处可去
    log::error!("setcontext failed: {}", io::Error::last_os_error());
    std::process::abort()
}

#[inline(always)]
unsafe fn raw(ctx: *const Context) -> *mut libc::ucontext_t {
    UnsafeCell::raw_get(std::ptr::addr_of!((*ctx).inner))
}

/// 把指针大小的参数拆成 (低 32 位, 高 32 位)
#[inline]
pub fn split_arg(arg: usize) -> (u32, u32) {
    let v = arg as u64;
    (v as u32, (v >> 32) as u32)
}

/// [`split_arg`] 的逆操作
#[inline]
pub fn join_arg(lo: u32, hi: u32) -> usize {
    (((hi as u64) << 32) | lo as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_split_join_arg() {
        let ptr = 0x0000_7fff_dead_beefusize;
        let (lo, hi) = split_arg(ptr);
        assert_eq!(lo, 0xdead_beef);
        assert_eq!(hi, 0x7fff);
        assert_eq!(join_arg(lo, hi), ptr);
    }

    struct Pair {
        main: Context,
        child: Context,
        hits: Cell<u32>,
    }

    extern "C" fn bump(lo: u32, hi: u32) {
        let pair = unsafe { &*(join_arg(lo, hi) as *const Pair) };
        pair.hits.set(pair.hits.get() + 1);
        unsafe { swap(&pair.child, &pair.main).unwrap() };
        pair.hits.set(pair.hits.get() + 1);
        // 返回后经 uc_link 回到 main
    }

    #[test]
    fn test_make_and_swap() {
        let mut stack = vec![0u8; 64 * 1024];
        let pair = Box::new(Pair {
            main: Context::new(),
            child: Context::new(),
            hits: Cell::new(0),
        });
        let arg = &*pair as *const Pair as usize;

        unsafe {
            pair.child
                .make(stack.as_mut_ptr(), stack.len(), Some(&pair.main), bump, arg)
                .unwrap();
            swap(&pair.main, &pair.child).unwrap();
            assert_eq!(pair.hits.get(), 1);
            swap(&pair.main, &pair.child).unwrap();
            assert_eq!(pair.hits.get(), 2);
        }
    }
}
