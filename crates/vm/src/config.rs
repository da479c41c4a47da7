//! 虚拟内存配置 trait 定义和注册

use core::sync::atomic::{AtomicUsize, Ordering};

/// 默认页大小
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// 默认用户栈上限（8 MiB）
pub const DEFAULT_MAX_STACK_SIZE: usize = 8 * 1024 * 1024;

/// 默认允许低于栈指针的访问距离（x86 `pusha` 一次压入 32 字节）
pub const DEFAULT_STACK_SLACK: usize = 32;

/// 虚拟内存配置常量
///
/// 内核需要实现此 trait 并通过 [`register_config`] 注册。
pub trait VmConfig: Send + Sync {
    /// 页大小，必须是交换设备扇区大小的整数倍
    fn page_size(&self) -> usize {
        DEFAULT_PAGE_SIZE
    }

    /// 用户地址空间的结束地址（不包含），其上为内核地址
    fn user_space_end(&self) -> usize;

    /// 用户栈顶地址
    fn user_stack_top(&self) -> usize;

    /// 用户栈能增长到的最大字节数
    fn max_stack_size(&self) -> usize {
        DEFAULT_MAX_STACK_SIZE
    }

    /// 栈指针以下仍视为栈访问的字节数
    fn stack_slack(&self) -> usize {
        DEFAULT_STACK_SLACK
    }
}

static CONFIG_DATA: AtomicUsize = AtomicUsize::new(0);
static CONFIG_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册配置实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_config(config: &'static dyn VmConfig) {
    let ptr = config as *const dyn VmConfig;
    // SAFETY: 将 fat pointer 拆分为 data 和 vtable 两部分存储
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn VmConfig, (usize, usize)>(ptr) };
    CONFIG_DATA.store(data, Ordering::Release);
    CONFIG_VTABLE.store(vtable, Ordering::Release);
}

/// 获取已注册的配置实现
///
/// # Panics
/// 如果尚未调用 [`register_config`] 注册实现，则 panic
#[inline]
pub fn vm_config() -> &'static dyn VmConfig {
    let data = CONFIG_DATA.load(Ordering::Acquire);
    let vtable = CONFIG_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("vm: VmConfig not registered");
    }
    // SAFETY: 重组 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn VmConfig>((data, vtable)) }
}
