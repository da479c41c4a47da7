//! 页表抽象
//!
//! 虚拟内存子系统只通过 [`PageTable`] trait 操作硬件页表，
//! 具体的页表格式由架构层实现。每个进程的页表放在
//! [`AddressSpace`](crate::AddressSpace) 的页表锁之后，
//! 所有的安装与清除（包括驱逐其他进程的页）都必须持有该锁。

use crate::address::{Ppn, Vaddr};
use bitflags::bitflags;
use core::fmt;

bitflags! {
    /// 页表项标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u8 {
        /// 有效
        const VALID = 1 << 0;
        /// 可写
        const WRITABLE = 1 << 1;
        /// 用户态可访问
        const USER = 1 << 2;
        /// 已访问
        const ACCESSED = 1 << 3;
        /// 已修改
        const DIRTY = 1 << 4;
    }
}

/// 页表操作的错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    /// 虚拟地址未被映射
    NotMapped,
    /// 虚拟地址已被映射
    AlreadyMapped,
    /// 提供了无效的地址
    InvalidAddress,
    /// 分配中间页表失败
    OutOfMemory,
}

impl fmt::Display for PagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PagingError::NotMapped => write!(f, "address not mapped"),
            PagingError::AlreadyMapped => write!(f, "address already mapped"),
            PagingError::InvalidAddress => write!(f, "invalid address"),
            PagingError::OutOfMemory => write!(f, "out of memory for page table"),
        }
    }
}

/// 页表操作的结果类型
pub type PagingResult<T> = Result<T, PagingError>;

/// 单个进程的硬件页表
///
/// 所有地址都是页对齐的用户虚拟地址。
pub trait PageTable: Send {
    /// 安装 `va -> ppn` 映射，带用户态权限
    ///
    /// 已存在映射时返回 [`PagingError::AlreadyMapped`]。
    fn install(&mut self, va: Vaddr, ppn: Ppn, writable: bool) -> PagingResult<()>;

    /// 清除 `va` 的映射；之后对该地址的访问会触发缺页
    fn clear(&mut self, va: Vaddr);

    /// 查询 `va` 映射到的物理页
    fn translate(&self, va: Vaddr) -> Option<Ppn>;

    /// 查询 `va` 的页表项标志，未映射时返回 `None`
    fn flags(&self, va: Vaddr) -> Option<PteFlags>;

    /// 设置脏位
    fn set_dirty(&mut self, va: Vaddr, dirty: bool);

    /// 设置访问位
    fn set_accessed(&mut self, va: Vaddr, accessed: bool);

    /// 是否被写过
    fn is_dirty(&self, va: Vaddr) -> bool {
        self.flags(va).is_some_and(|f| f.contains(PteFlags::DIRTY))
    }

    /// 是否被访问过
    fn is_accessed(&self, va: Vaddr) -> bool {
        self.flags(va)
            .is_some_and(|f| f.contains(PteFlags::ACCESSED))
    }

    /// 是否可写
    fn is_writable(&self, va: Vaddr) -> bool {
        self.flags(va)
            .is_some_and(|f| f.contains(PteFlags::WRITABLE))
    }
}
