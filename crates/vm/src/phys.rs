//! 物理页分配
//!
//! [`PageAllocator`] 是帧表消费的分配原语；[`BitmapPageAllocator`]
//! 是它基于位图的实现，管理一段连续的、可直接访问的物理内存。

use crate::address::{Ppn, UsizeConvert};
use crate::bitmap::Bitmap;
use core::ptr::NonNull;
use sync::IrqSpinLock;

/// 物理页分配器
pub trait PageAllocator: Send + Sync {
    /// 分配一个物理页，内容未定义；内存耗尽时返回 `None`
    fn alloc_page(&self) -> Option<Ppn>;

    /// 释放一个物理页
    fn free_page(&self, ppn: Ppn);

    /// 物理页在内核直接映射区中的起始指针
    fn page_ptr(&self, ppn: Ppn) -> *mut u8;
}

/// 以可变切片的形式访问一个物理页
///
/// # Safety
/// 调用者必须独占该页（帧已被钉住，或尚未安装到任何页表中），
/// 且返回的切片不能超出这段独占期。
pub(crate) unsafe fn page_bytes<'a>(alloc: &dyn PageAllocator, ppn: Ppn) -> &'a mut [u8] {
    let size = crate::vm_config().page_size();
    // SAFETY: 由调用者保证独占，page_ptr 指向 size 字节的有效内存
    unsafe { core::slice::from_raw_parts_mut(alloc.page_ptr(ppn), size) }
}

/// 位图物理页分配器
///
/// 每个 bit 对应 `[start, start + pages)` 中的一个物理页，
/// 页内容通过 `base` 开始的直接映射访问。
pub struct BitmapPageAllocator {
    /// 第一页的直接映射地址
    base: usize,
    /// 第一页的物理页号
    start: Ppn,
    bitmap: IrqSpinLock<Bitmap>,
}

impl BitmapPageAllocator {
    /// 创建分配器
    ///
    /// # Safety
    /// `base` 必须指向 `pages * page_size` 字节、在分配器生命周期内有效
    /// 且不被其他代码使用的内存。
    pub unsafe fn new(base: NonNull<u8>, start: Ppn, pages: usize) -> Self {
        BitmapPageAllocator {
            base: base.as_ptr() as usize,
            start,
            bitmap: IrqSpinLock::new(Bitmap::new(pages)),
        }
    }

    /// 管理的总页数
    pub fn total_pages(&self) -> usize {
        self.bitmap.lock().len()
    }

    /// 空闲页数
    pub fn free_pages(&self) -> usize {
        self.bitmap.lock().free()
    }

    /// 是否由本分配器管理
    pub fn contains(&self, ppn: Ppn) -> bool {
        ppn >= self.start && ppn - self.start < self.total_pages()
    }
}

impl PageAllocator for BitmapPageAllocator {
    fn alloc_page(&self) -> Option<Ppn> {
        let idx = self.bitmap.lock().scan_and_set()?;
        Some(self.start + idx)
    }

    fn free_page(&self, ppn: Ppn) {
        assert!(self.contains(ppn), "free of foreign page {:?}", ppn);
        self.bitmap.lock().clear(ppn - self.start);
    }

    fn page_ptr(&self, ppn: Ppn) -> *mut u8 {
        debug_assert!(self.contains(ppn));
        let offset = (ppn.as_usize() - self.start.as_usize()) * crate::vm_config().page_size();
        (self.base + offset) as *mut u8
    }
}
