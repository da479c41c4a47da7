//! 架构相关操作的 Mock 实现

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// 中断使能位
pub const MOCK_INTR_ENABLE: usize = 0x2;

/// Mock 架构操作
///
/// 用一个原子布尔值模拟本地中断开关，并统计关中断次数。
pub struct MockArchOps {
    pub interrupt_state: AtomicBool,
    pub disable_count: AtomicUsize,
}

impl MockArchOps {
    pub const fn new() -> Self {
        Self {
            interrupt_state: AtomicBool::new(true),
            disable_count: AtomicUsize::new(0),
        }
    }

    pub unsafe fn read_and_disable_interrupts(&self) -> usize {
        self.disable_count.fetch_add(1, Ordering::Relaxed);
        if self.interrupt_state.swap(false, Ordering::SeqCst) {
            MOCK_INTR_ENABLE
        } else {
            0
        }
    }

    pub unsafe fn restore_interrupts(&self, flags: usize) {
        self.interrupt_state
            .store(flags & MOCK_INTR_ENABLE != 0, Ordering::SeqCst);
    }

    pub fn intr_enable_mask(&self) -> usize {
        MOCK_INTR_ENABLE
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupt_state.load(Ordering::SeqCst)
    }
}

/// 全局 Mock 实例
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps::new();
