//! 缺页处理
//!
//! 陷入机制在每次缺页时调用 [`VmManager::handle_page_fault`]。
//! 按以下顺序判断：
//!
//! 1. 内核地址：内核态访问视为内核缺陷，用户态访问非法
//! 2. 保护错误，或写只读页：非法，不安装任何帧
//! 3. 有表项的文件页：从文件读入
//! 4. 有表项的交换页：从交换区读入
//! 5. 有表项的清零页：清零
//! 6. 栈增长区域：直接映射清零页，不建表项
//! 7. 映射区域：建立文件页表项并读入
//! 8. 其余：非法
//!
//! 内核态访问用户地址（系统调用向用户缓冲区拷贝）与用户态访问走同一条路径，
//! 只有所有调页路径都不适用时才视为非法。
//!
//! 处理失败只终止出错的进程，由调用者根据 [`FaultError`] 调用 [`VmManager::kill`]。

use crate::address::{Ppn, Vaddr};
use crate::error::{VmError, VmResult};
use crate::manager::VmManager;
use crate::page_table::PageTable;
use crate::phys::page_bytes;
use crate::space::AddressSpace;
use crate::spt::{FileSlice, PageSource, SupPage};
use alloc::sync::Arc;
use bitflags::bitflags;
use core::fmt;
use sync::IntrGuard;

bitflags! {
    /// 缺页原因
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultCause: u8 {
        /// 页存在（保护错误）；未置位表示页不存在
        const PRESENT = 1 << 0;
        /// 写访问；未置位表示读访问
        const WRITE = 1 << 1;
        /// 用户态；未置位表示内核态
        const USER = 1 << 2;
    }
}

/// 一次缺页
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// 出错地址
    pub addr: Vaddr,
    /// 缺页原因
    pub cause: FaultCause,
    /// 出错时的用户栈指针
    pub stack_pointer: Vaddr,
}

impl PageFault {
    /// 创建缺页描述
    pub fn new(addr: Vaddr, cause: FaultCause, stack_pointer: Vaddr) -> Self {
        PageFault {
            addr,
            cause,
            stack_pointer,
        }
    }

    /// 在屏蔽中断的情况下读取出错地址，构造缺页描述
    ///
    /// `read_fault_addr` 读取架构相关的出错地址寄存器；
    /// 返回后中断恢复到调用前的状态，随后的缺页处理可以被抢占。
    pub fn capture(
        read_fault_addr: impl FnOnce() -> usize,
        cause: FaultCause,
        stack_pointer: Vaddr,
    ) -> Self {
        let addr = {
            let _guard = IntrGuard::new();
            read_fault_addr()
        };
        PageFault::new(Vaddr(addr), cause, stack_pointer)
    }

    /// 是否为保护错误
    pub fn is_present(&self) -> bool {
        self.cause.contains(FaultCause::PRESENT)
    }

    /// 是否为写访问
    pub fn is_write(&self) -> bool {
        self.cause.contains(FaultCause::WRITE)
    }

    /// 是否来自用户态
    pub fn is_user(&self) -> bool {
        self.cause.contains(FaultCause::USER)
    }
}

impl fmt::Display for PageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Page fault at {:#x}: {} error {} page in {} context.",
            self.addr,
            if self.is_present() {
                "rights violation"
            } else {
                "not present"
            },
            if self.is_write() { "writing" } else { "reading" },
            if self.is_user() { "user" } else { "kernel" },
        )
    }
}

/// 缺页处理失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// 非法访问
    Illegal(PageFault),
    /// 合法访问，但调页过程中资源耗尽或 I/O 失败
    Failed {
        /// 缺页
        fault: PageFault,
        /// 失败原因
        cause: VmError,
    },
    /// 内核态访问内核地址
    KernelBug(PageFault),
}

impl FaultError {
    /// 对应的缺页
    pub fn fault(&self) -> &PageFault {
        match self {
            FaultError::Illegal(fault)
            | FaultError::Failed { fault, .. }
            | FaultError::KernelBug(fault) => fault,
        }
    }

    /// 被终止进程的退出码
    pub fn exit_status(&self) -> i32 {
        -1
    }
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultError::Illegal(fault) => write!(f, "{}", fault),
            FaultError::Failed { fault, cause } => write!(f, "{} ({})", fault, cause),
            FaultError::KernelBug(fault) => write!(f, "kernel bug: {}", fault),
        }
    }
}

/// 栈增长区域判断
fn in_stack_zone(addr: Vaddr, stack_pointer: Vaddr) -> bool {
    let config = crate::vm_config();
    let top = config.user_stack_top();
    let page = addr.page_floor().0;
    addr.0 >= stack_pointer.0.saturating_sub(config.stack_slack())
        && addr.0 < top
        && top - page <= config.max_stack_size()
}

impl VmManager {
    /// 处理一次缺页
    ///
    /// 陷入入口先用 [`PageFault::capture`] 读取出错地址，
    /// 中断恢复后再调用本函数。
    pub fn handle_page_fault(
        &self,
        space: &Arc<AddressSpace>,
        fault: &PageFault,
    ) -> Result<(), FaultError> {
        let fault = *fault;
        let addr = fault.addr;
        let page = addr.page_floor();
        let illegal = || Err(FaultError::Illegal(fault));
        let failed = |cause: VmError| FaultError::Failed { fault, cause };

        if !addr.is_user() {
            return if fault.is_user() {
                illegal()
            } else {
                Err(FaultError::KernelBug(fault))
            };
        }
        if fault.is_present() {
            return illegal();
        }

        let entry = space.spt().lock().lookup(page).cloned();
        if let Some(entry) = entry {
            if fault.is_write() && !entry.writable {
                return illegal();
            }
            if entry.loaded {
                log::error!("vm: not-present fault on loaded page {:?}", page);
                return illegal();
            }
            return match entry.source {
                PageSource::File(ref slice) => {
                    self.load_from_file(space, page, slice, entry.writable, false)
                }
                PageSource::Swap { slot, writable }
                | PageSource::FileSwapped { slot, writable, .. } => {
                    self.load_from_swap(space, page, slot, writable)
                }
                PageSource::Zero => self.load_zero(space, page, entry.writable),
            }
            .map_err(failed);
        }

        if in_stack_zone(addr, fault.stack_pointer) {
            return self.grow_stack(space, page).map_err(failed);
        }

        let slice = {
            let mmaps = space.mmaps().lock();
            mmaps.find(page).map(|map| {
                let index = (page.0 - map.base.0) / crate::vm_config().page_size();
                let (offset, read_len) = map.page_extent(index);
                FileSlice {
                    file: map.file.clone(),
                    offset,
                    read_len,
                    zero_len: crate::vm_config().page_size() - read_len,
                }
            })
        };
        match slice {
            Some(slice) => self
                .load_from_file(space, page, &slice, true, true)
                .map_err(failed),
            None => illegal(),
        }
    }

    /// 分配并钉住一个帧
    fn pinned_frame(&self, space: &Arc<AddressSpace>, zeroed: bool) -> VmResult<Ppn> {
        let ppn = self.frames.allocate(space, zeroed)?;
        self.frames.pin(ppn);
        Ok(ppn)
    }

    /// 帧已装好并安装了映射：绑定，取消钉住
    fn commit_frame(&self, ppn: Ppn, page: Vaddr) {
        self.frames.bind(ppn, page);
        self.frames.unpin(ppn);
    }

    /// 从文件读入一页
    ///
    /// `create` 为真时页来自映射区域，还没有补充页表项，读入成功后再建立。
    /// 读取失败或读到的字节不足时释放帧，不安装任何映射。
    fn load_from_file(
        &self,
        space: &Arc<AddressSpace>,
        page: Vaddr,
        slice: &FileSlice,
        writable: bool,
        create: bool,
    ) -> VmResult<()> {
        let ppn = self.pinned_frame(space, create)?;
        // SAFETY: 帧已被钉住且尚未安装
        let bytes = unsafe { page_bytes(self.frames.allocator(), ppn) };
        let (head, tail) = bytes.split_at_mut(slice.read_len);
        if let Err(err) = self.fs.read_exact_at(&*slice.file, slice.offset, head) {
            self.frames.free(ppn);
            return Err(err);
        }
        tail.fill(0);

        {
            let mut spt = space.spt().lock();
            if create {
                let mut entry = SupPage::file_backed(page, slice.clone(), writable);
                entry.mark_loaded();
                if let Err(err) = spt.insert(entry) {
                    drop(spt);
                    self.frames.free(ppn);
                    return Err(err);
                }
            }
            let mut pt = space.page_table().lock();
            if let Err(err) = pt.install(page, ppn, writable) {
                drop(pt);
                if create {
                    spt.remove(page);
                }
                drop(spt);
                self.frames.free(ppn);
                return Err(err.into());
            }
            if let Some(entry) = spt.get_mut(page) {
                entry.mark_loaded();
            }
        }
        self.commit_frame(ppn, page);
        Ok(())
    }

    /// 从交换区读入一页
    ///
    /// 先安装映射再读取：读取成功即释放槽位，之后不能再失败。
    /// 读取失败时清除映射、释放帧，槽位与表项保持不变。
    fn load_from_swap(
        &self,
        space: &Arc<AddressSpace>,
        page: Vaddr,
        slot: crate::swap::SwapSlot,
        writable: bool,
    ) -> VmResult<()> {
        let ppn = self.pinned_frame(space, false)?;
        if let Err(err) = space.page_table().lock().install(page, ppn, writable) {
            self.frames.free(ppn);
            return Err(err.into());
        }

        // SAFETY: 帧已被钉住，用户线程正在等待本次缺页处理完成
        let bytes = unsafe { page_bytes(self.frames.allocator(), ppn) };
        if let Err(err) = self.swap.release_and_read(slot, bytes) {
            space.page_table().lock().clear(page);
            self.frames.free(ppn);
            return Err(err);
        }

        {
            let mut spt = space.spt().lock();
            let keep = spt.get_mut(page).is_some_and(|entry| entry.after_swap_in());
            if keep {
                // 换入的文件页与文件内容不同，不能在下次驱逐时直接丢弃
                space.page_table().lock().set_dirty(page, true);
            } else {
                spt.remove(page);
            }
        }
        self.commit_frame(ppn, page);
        Ok(())
    }

    /// 首次访问清零页
    fn load_zero(&self, space: &Arc<AddressSpace>, page: Vaddr, writable: bool) -> VmResult<()> {
        let ppn = self.pinned_frame(space, true)?;
        {
            let mut spt = space.spt().lock();
            if let Err(err) = space.page_table().lock().install(page, ppn, writable) {
                drop(spt);
                self.frames.free(ppn);
                return Err(err.into());
            }
            spt.remove(page);
        }
        self.commit_frame(ppn, page);
        Ok(())
    }

    /// 栈增长：映射一个清零页，不建立补充页表项
    fn grow_stack(&self, space: &Arc<AddressSpace>, page: Vaddr) -> VmResult<()> {
        let ppn = self.pinned_frame(space, true)?;
        if let Err(err) = space.page_table().lock().install(page, ppn, true) {
            self.frames.free(ppn);
            return Err(err.into());
        }
        self.commit_frame(ppn, page);
        Ok(())
    }
}
