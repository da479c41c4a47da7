//! 原始自旋锁
//!
//! 两种 `lock_api::RawMutex` 实现：
//!
//! - [`RawSpinLock`]：纯粹的测试并设置锁，不触碰中断状态。
//! - [`RawIrqSpinLock`]：在获取锁之前屏蔽本地中断，释放锁之后恢复。
//!
//! 二者都不可重入。

use crate::arch_ops;
use core::{
    hint,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
use lock_api::{GuardNoSend, GuardSend, RawMutex};

/// 不屏蔽中断的自旋锁。
///
/// 持有者可以被抢占；等待者自旋直到锁被释放。
#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    /// 创建一个未上锁的实例。
    pub const fn new() -> Self {
        RawSpinLock {
            locked: AtomicBool::new(false),
        }
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinLock::new();

    type GuardMarker = GuardSend;

    fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // 只读等待，避免在争用时反复写缓存行
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// 屏蔽本地中断的自旋锁。
///
/// 获取时先禁用中断再自旋，把进入前的中断状态保存在锁内；
/// 释放时先清除锁标志再恢复中断状态。
/// 嵌套持有多把此类锁时必须按相反顺序释放。
#[derive(Debug)]
pub struct RawIrqSpinLock {
    inner: RawSpinLock,
    saved_flags: AtomicUsize,
}

impl RawIrqSpinLock {
    /// 创建一个未上锁的实例。
    pub const fn new() -> Self {
        RawIrqSpinLock {
            inner: RawSpinLock::new(),
            saved_flags: AtomicUsize::new(0),
        }
    }
}

impl Default for RawIrqSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl RawMutex for RawIrqSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawIrqSpinLock::new();

    // 中断状态属于获取锁的 CPU，守卫不能跨线程移动
    type GuardMarker = GuardNoSend;

    fn lock(&self) {
        // SAFETY: flags 在 unlock 时原样恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        self.inner.lock();
        self.saved_flags.store(flags, Ordering::Relaxed);
    }

    fn try_lock(&self) -> bool {
        // SAFETY: 获取失败时立即恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        if self.inner.try_lock() {
            self.saved_flags.store(flags, Ordering::Relaxed);
            true
        } else {
            unsafe { arch_ops().restore_interrupts(flags) };
            false
        }
    }

    unsafe fn unlock(&self) {
        let flags = self.saved_flags.load(Ordering::Relaxed);
        unsafe {
            self.inner.unlock();
            arch_ops().restore_interrupts(flags);
        }
    }

    fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}
