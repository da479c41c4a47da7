//! 进程地址空间
//!
//! 把一个进程的虚拟内存状态放在一起：页表（及其锁）、补充页表和映射表。
//! 由进程层创建，帧表通过 `Arc` 引用帧的所属进程。
//!
//! # 锁顺序
//!
//! `mmaps` → `spt` → `page_table`。帧表锁和交换区锁是叶子锁，
//! 持有任何一把锁时都可以获取。

use crate::address::Pid;
use crate::mmap::MmapTable;
use crate::page_table::PageTable;
use crate::spt::SupPageTable;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use sync::SpinLock;

/// 进程地址空间
pub struct AddressSpace {
    pid: Pid,
    name: String,
    page_table: SpinLock<Box<dyn PageTable>>,
    spt: SpinLock<SupPageTable>,
    mmaps: SpinLock<MmapTable>,
}

impl AddressSpace {
    /// 创建地址空间
    pub fn new(pid: Pid, name: &str, page_table: Box<dyn PageTable>) -> Arc<Self> {
        Arc::new(AddressSpace {
            pid,
            name: String::from(name),
            page_table: SpinLock::new(page_table),
            spt: SpinLock::new(SupPageTable::new()),
            mmaps: SpinLock::new(MmapTable::new()),
        })
    }

    /// 进程号
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// 进程名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 页表锁
    pub fn page_table(&self) -> &SpinLock<Box<dyn PageTable>> {
        &self.page_table
    }

    /// 补充页表
    pub fn spt(&self) -> &SpinLock<SupPageTable> {
        &self.spt
    }

    /// 映射表
    pub fn mmaps(&self) -> &SpinLock<MmapTable> {
        &self.mmaps
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
