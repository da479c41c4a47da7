//! 自旋锁封装
//!
//! 基于 `lock_api::Mutex` 的数据锁类型。
//!
//! # 示例
//! ```ignore
//! let lock = SpinLock::new(0);
//! {
//!     let mut guard = lock.lock(); // 获取锁
//!     *guard += 1; // 访问和修改数据
//! } // 离开作用域，自动释放锁
//! ```
//!
//! # 注意
//! 两种锁都不可重入。持有锁时再次获取同一把锁会导致死锁。

use crate::raw_spin_lock::{RawIrqSpinLock, RawSpinLock};

/// 不屏蔽中断的自旋锁。
pub type SpinLock<T> = lock_api::Mutex<RawSpinLock, T>;

/// [`SpinLock`] 的 RAII 保护器。
pub type SpinLockGuard<'a, T> = lock_api::MutexGuard<'a, RawSpinLock, T>;

/// 持有期间屏蔽本地中断的自旋锁。
///
/// 只应保护不涉及阻塞 I/O 的短临界区。
pub type IrqSpinLock<T> = lock_api::Mutex<RawIrqSpinLock, T>;

/// [`IrqSpinLock`] 的 RAII 保护器。
pub type IrqSpinLockGuard<'a, T> = lock_api::MutexGuard<'a, RawIrqSpinLock, T>;
