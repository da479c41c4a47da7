//! 中断保护器
//!
//! 基于 RAII 实现中断保护，在创建时禁用中断，销毁时恢复。
//!
//! 缺页处理只在读取出错地址的短暂窗口内屏蔽中断，
//! 其余处理过程都在中断开启的状态下进行，可以被抢占。

use crate::arch_ops;

/// 中断保护器，基于 RAII 实现中断保护。
///
/// # 示例
/// ```ignore
/// let fault_addr = {
///     let _guard = IntrGuard::new(); // 禁用中断
///     read_fault_address()
/// }; // 离开作用域，自动恢复中断状态
/// ```
pub struct IntrGuard {
    flags: usize,
}

impl IntrGuard {
    /// 原子地禁用中断并返回一个 IntrGuard 实例。
    pub fn new() -> Self {
        // SAFETY: 保存的 flags 只会在 drop 时原样恢复
        let flags = unsafe { arch_ops().read_and_disable_interrupts() };
        IntrGuard { flags }
    }

    /// 检查进入临界区前，中断是否处于启用状态。
    pub fn was_enabled(&self) -> bool {
        self.flags & arch_ops().intr_enable_mask() != 0
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        // SAFETY: flags 是在创建 IntrGuard 时保存的
        unsafe { arch_ops().restore_interrupts(self.flags) };
    }
}
