//! 虚拟内存管理器
//!
//! 持有全局共享的帧表、交换区和文件系统锁，在内核启动时创建一次，
//! 以引用的方式交给进程层与陷入处理。

use crate::address::{UsizeConvert, Vaddr};
use crate::error::{VmError, VmResult};
use crate::fault::FaultError;
use crate::file::{FsLock, VmFile};
use crate::frame::FrameTable;
use crate::mmap::{MapId, Mapping};
use crate::page_table::PageTable;
use crate::phys::PageAllocator;
use crate::space::AddressSpace;
use crate::spt::PageSource;
use crate::swap::{SwapDevice, SwapStore};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;

/// 虚拟内存管理器
pub struct VmManager {
    pub(crate) frames: FrameTable,
    pub(crate) swap: Arc<SwapStore>,
    pub(crate) fs: FsLock,
}

impl VmManager {
    /// 创建管理器
    ///
    /// 调用前必须已经注册 [`VmConfig`](crate::VmConfig)。
    pub fn new(allocator: Arc<dyn PageAllocator>, swap_device: Box<dyn SwapDevice>) -> Self {
        let swap = Arc::new(SwapStore::new(swap_device));
        VmManager {
            frames: FrameTable::new(allocator, swap.clone()),
            swap,
            fs: FsLock::new(),
        }
    }

    /// 帧表
    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    /// 交换区
    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    /// 文件系统锁
    pub fn fs(&self) -> &FsLock {
        &self.fs
    }

    /// 惰性加载一个可执行文件段
    ///
    /// 段从 `addr` 开始，前 `read_bytes` 字节来自文件的 `offset` 处，
    /// 随后 `zero_bytes` 字节清零。每一页登记一个补充页表项，
    /// 不需要读文件的页登记为清零页。
    #[allow(clippy::too_many_arguments)]
    pub fn load_segment(
        &self,
        space: &Arc<AddressSpace>,
        file: &Arc<dyn VmFile>,
        offset: usize,
        addr: Vaddr,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> VmResult<()> {
        let page_size = crate::vm_config().page_size();
        if !addr.is_page_aligned() {
            return Err(VmError::InvalidAddress);
        }
        let total = read_bytes
            .checked_add(zero_bytes)
            .ok_or(VmError::InvalidArgument)?;
        if total % page_size != 0 {
            return Err(VmError::InvalidArgument);
        }
        let end = addr
            .checked_add_pages(total / page_size)
            .ok_or(VmError::InvalidAddress)?;
        if end.as_usize() > crate::vm_config().user_space_end() {
            return Err(VmError::InvalidAddress);
        }

        let mut spt = space.spt().lock();
        let mut remaining = read_bytes;
        let mut file_offset = offset;
        for index in 0..total / page_size {
            let page = addr.add_pages(index);
            let page_read = remaining.min(page_size);
            if page_read == 0 {
                spt.register_zero_fill(page, writable)?;
            } else {
                spt.register_file_backed(
                    file.clone(),
                    file_offset,
                    page_read,
                    page_size - page_read,
                    writable,
                    page,
                )?;
            }
            remaining -= page_read;
            file_offset += page_read;
        }
        Ok(())
    }

    /// 把整个文件映射到 `addr`，返回映射号
    ///
    /// 文件为空、地址为空或未对齐、区域超出用户空间，或与已有的映射、
    /// 补充页表项、已安装的页重叠时失败。
    pub fn mmap(
        &self,
        space: &Arc<AddressSpace>,
        file: Arc<dyn VmFile>,
        addr: Vaddr,
    ) -> VmResult<MapId> {
        let file_len = self.fs.len(&*file);
        if file_len == 0 {
            return Err(VmError::InvalidArgument);
        }
        if addr.is_null() || !addr.is_page_aligned() {
            return Err(VmError::InvalidAddress);
        }
        let page_count = file_len.div_ceil(crate::vm_config().page_size());
        let end = addr
            .checked_add_pages(page_count)
            .ok_or(VmError::InvalidAddress)?;
        if end.as_usize() > crate::vm_config().user_space_end() {
            return Err(VmError::InvalidAddress);
        }

        let mut mmaps = space.mmaps().lock();
        let spt = space.spt().lock();
        let pt = space.page_table().lock();
        let occupied = mmaps.overlaps(addr, page_count)
            || spt.any_in_range(addr, page_count)
            || (0..page_count).any(|i| pt.translate(addr.add_pages(i)).is_some());
        if occupied {
            return Err(VmError::Overlap);
        }
        let id = mmaps.insert(file, addr, page_count, file_len)?;
        log::debug!(
            "vm: pid {} mapped {} pages at {:?} as mapping {}",
            space.pid(),
            page_count,
            addr,
            id
        );
        Ok(id)
    }

    /// 解除映射
    ///
    /// 被修改过的页写回文件，然后清除映射、释放帧、删除补充页表项，
    /// 最后关闭文件。某一页写回失败时继续处理其余页，返回第一个错误。
    pub fn munmap(&self, space: &Arc<AddressSpace>, id: MapId) -> VmResult<()> {
        let mapping = space
            .mmaps()
            .lock()
            .remove(id)
            .ok_or(VmError::NoSuchMapping)?;

        let mut first_err = None;
        for index in 0..mapping.page_count {
            if let Err(err) = self.unmap_page(space, &mapping, index) {
                first_err.get_or_insert(err);
            }
        }
        log::debug!("vm: pid {} unmapped mapping {}", space.pid(), id);
        self.fs.close(mapping.file);
        first_err.map_or(Ok(()), Err)
    }

    fn unmap_page(&self, space: &Arc<AddressSpace>, mapping: &Mapping, index: usize) -> VmResult<()> {
        let page = mapping.base.add_pages(index);
        let (offset, len) = mapping.page_extent(index);
        let mut spt = space.spt().lock();
        let mut result = Ok(());

        let resident = {
            let mut pt = space.page_table().lock();
            pt.translate(page).map(|ppn| {
                let dirty = pt.is_dirty(page);
                pt.clear(page);
                (ppn, dirty)
            })
        };

        if let Some((ppn, dirty)) = resident {
            if dirty {
                // SAFETY: 映射已清除，帧只会被帧表回收或转交
                let bytes = unsafe { crate::phys::page_bytes(self.frames.allocator(), ppn) };
                result = self.write_back(&*mapping.file, offset, &bytes[..len]);
            }
            self.frames.free_unless_evicting(ppn);
        } else if let Some(PageSource::FileSwapped { slot, .. }) =
            spt.lookup(page).map(|entry| entry.source.clone())
        {
            let mut buf = vec![0u8; crate::vm_config().page_size()];
            result = match self.swap.release_and_read(slot, &mut buf) {
                Ok(()) => self.write_back(&*mapping.file, offset, &buf[..len]),
                Err(err) => {
                    self.swap.discard(slot);
                    Err(err)
                }
            };
        }

        spt.remove(page);
        result
    }

    fn write_back(&self, file: &dyn VmFile, offset: usize, data: &[u8]) -> VmResult<()> {
        let written = self.fs.write_at(file, offset, data)?;
        if written != data.len() {
            log::warn!(
                "vm: short write back at offset {:#x}: {} of {} bytes",
                offset,
                written,
                data.len()
            );
            return Err(VmError::Io);
        }
        Ok(())
    }

    /// 释放进程的全部虚拟内存：解除所有映射、回收所有帧、销毁补充页表
    ///
    /// 可以重复调用，第二次调用不做任何事情。
    pub fn release_space(&self, space: &Arc<AddressSpace>) {
        let ids = space.mmaps().lock().ids();
        for id in ids {
            if let Err(err) = self.munmap(space, id) {
                log::warn!("vm: pid {} unmap of {} on exit: {}", space.pid(), id, err);
            }
        }
        self.frames.reclaim_all(space.pid());
        let released = space.spt().lock().teardown(&self.swap);
        if released > 0 {
            log::debug!("vm: pid {} released {} swap slots", space.pid(), released);
        }
    }

    /// 打印进程退出行
    pub fn report_exit(&self, space: &AddressSpace, status: i32) {
        log::error!("{}: exit({})", space.name(), status);
    }

    /// 终止缺页处理失败的进程，返回退出码
    ///
    /// # Panics
    /// [`FaultError::KernelBug`] 表示内核本身访问了无效地址，直接 panic
    pub fn kill(&self, space: &Arc<AddressSpace>, err: &FaultError) -> i32 {
        if let FaultError::KernelBug(fault) = err {
            panic!("vm: unexpected kernel page fault: {}", fault);
        }
        log::error!("vm: killing {} (pid {}): {}", space.name(), space.pid(), err);
        let status = err.exit_status();
        self.report_exit(space, status);
        self.release_space(space);
        status
    }
}
