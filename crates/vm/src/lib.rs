//! 虚拟内存子系统
//!
//! 为教学内核提供按需调页：物理帧表与页面驱逐、每进程补充页表、
//! 交换槽管理、内存映射文件以及把它们串起来的缺页处理入口。
//!
//! # 组件
//!
//! - [`swap`]：交换区，按槽位保存被换出的页
//! - [`frame`]：帧表与二次机会（时钟）驱逐
//! - [`spt`]：补充页表，记录非驻留页的数据来源
//! - [`mmap`]：每进程的文件映射表
//! - [`fault`]：缺页分发
//!
//! # 架构解耦
//!
//! 通过 trait 与内核其余部分解耦：
//! - [`PageTable`]：硬件页表（安装/清除映射、脏位与访问位）
//! - [`PageAllocator`]：物理页分配
//! - [`VmFile`]：可按偏移读写的文件
//! - [`SwapDevice`]：交换用块设备
//! - [`VmConfig`]：内存布局常量
//!
//! 使用前必须调用 [`register_config`] 注册配置，并为 `sync` crate 注册 `ArchOps`。
//! 全局状态（帧表、交换区、文件系统锁）由 [`VmManager`] 持有，
//! 启动时构造一次并以引用方式传递。

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

mod bitmap;
mod config;
mod error;
mod file;
mod manager;

pub mod address;
pub mod fault;
pub mod frame;
pub mod mmap;
pub mod page_table;
pub mod phys;
pub mod space;
pub mod spt;
pub mod swap;

pub use address::{Pid, Ppn, UsizeConvert, Vaddr};
pub use config::{
    DEFAULT_MAX_STACK_SIZE, DEFAULT_PAGE_SIZE, DEFAULT_STACK_SLACK, VmConfig, register_config,
    vm_config,
};
pub use error::{VmError, VmResult};
pub use fault::{FaultCause, FaultError, PageFault};
pub use file::{FsLock, VmFile};
pub use frame::FrameTable;
pub use manager::VmManager;
pub use mmap::{MapId, Mapping, MmapTable};
pub use page_table::{PageTable, PagingError, PagingResult, PteFlags};
pub use phys::{BitmapPageAllocator, PageAllocator};
pub use space::AddressSpace;
pub use spt::{FileSlice, PageSource, SupPage, SupPageTable};
pub use swap::{RamSwapDevice, SECTOR_SIZE, SwapDevice, SwapSlot, SwapStore};

#[cfg(test)]
mod tests;
