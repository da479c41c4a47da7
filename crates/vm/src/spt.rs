//! 补充页表
//!
//! 每个进程一张，以页对齐的虚拟地址为键，记录不驻留在内存中的页
//! 应该从哪里取回：文件区间、交换槽，或者直接清零。
//!
//! # 页的状态
//!
//! ```text
//!             缺页读入                         驱逐（干净）
//!   File ──────────────▶ File(loaded) ─────────────────────▶ File
//!                              │ 驱逐（脏）
//!                              ▼
//!                        FileSwapped ──换入──▶ File(loaded, 脏)
//!
//!   无表项的驻留页 ──驱逐──▶ Swap ──换入──▶ 删除表项
//!   Zero ──首次访问──▶ 删除表项
//! ```
//!
//! 交换槽只出现在 `Swap` 与 `FileSwapped` 中，并且恰好被释放一次：
//! 换入时由交换区释放，或者在 [`SupPageTable::teardown`] 中丢弃。

use crate::address::{UsizeConvert, Vaddr};
use crate::error::{VmError, VmResult};
use crate::file::VmFile;
use crate::swap::{SwapSlot, SwapStore};
use alloc::sync::Arc;
use core::fmt;
use hashbrown::HashMap;

/// 文件中的一段区间，读入后剩余部分清零
#[derive(Clone)]
pub struct FileSlice {
    /// 文件句柄
    pub file: Arc<dyn VmFile>,
    /// 文件内偏移
    pub offset: usize,
    /// 需要读取的字节数
    pub read_len: usize,
    /// 读取之后需要清零的字节数
    pub zero_len: usize,
}

impl fmt::Debug for FileSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSlice")
            .field("offset", &self.offset)
            .field("read_len", &self.read_len)
            .field("zero_len", &self.zero_len)
            .finish()
    }
}

/// 页数据的来源
#[derive(Clone, Debug)]
pub enum PageSource {
    /// 从文件读取
    File(FileSlice),
    /// 被换出到交换区的匿名页
    Swap {
        /// 交换槽
        slot: SwapSlot,
        /// 换出时的可写性
        writable: bool,
    },
    /// 被修改过后换出到交换区的文件页，换入后恢复为 `File`
    FileSwapped {
        /// 原本的文件区间
        file: FileSlice,
        /// 交换槽
        slot: SwapSlot,
        /// 换出时的可写性
        writable: bool,
    },
    /// 首次访问时清零
    Zero,
}

/// 补充页表项
#[derive(Clone, Debug)]
pub struct SupPage {
    /// 页对齐的虚拟地址
    pub vaddr: Vaddr,
    /// 是否已安装到页表
    pub loaded: bool,
    /// 是否可写
    pub writable: bool,
    /// 数据来源
    pub source: PageSource,
}

impl SupPage {
    /// 未驻留的文件页
    pub fn file_backed(vaddr: Vaddr, slice: FileSlice, writable: bool) -> Self {
        SupPage {
            vaddr,
            loaded: false,
            writable,
            source: PageSource::File(slice),
        }
    }

    /// 被换出的匿名页
    pub fn swapped(vaddr: Vaddr, slot: SwapSlot, writable: bool) -> Self {
        SupPage {
            vaddr,
            loaded: false,
            writable,
            source: PageSource::Swap { slot, writable },
        }
    }

    /// 是否纯粹由文件提供数据（可以丢弃后重新读取）
    pub fn is_file_backed(&self) -> bool {
        matches!(self.source, PageSource::File(_))
    }

    /// 引用的交换槽
    pub fn swap_slot(&self) -> Option<SwapSlot> {
        match self.source {
            PageSource::Swap { slot, .. } | PageSource::FileSwapped { slot, .. } => Some(slot),
            _ => None,
        }
    }

    /// 页已安装
    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    /// 页被清除映射，数据仍可从原来源取回
    pub fn mark_unloaded(&mut self) {
        self.loaded = false;
    }

    /// 页的内容被写入 `slot`
    ///
    /// # Panics
    /// 表项已经引用一个交换槽时 panic：驻留页不可能还占着槽位
    pub fn swap_out(&mut self, slot: SwapSlot, writable: bool) {
        let source = core::mem::replace(&mut self.source, PageSource::Zero);
        self.source = match source {
            PageSource::File(file) => PageSource::FileSwapped {
                file,
                slot,
                writable,
            },
            PageSource::Zero => PageSource::Swap { slot, writable },
            PageSource::Swap { slot: old, .. } | PageSource::FileSwapped { slot: old, .. } => {
                panic!("vm: resident page {:?} still holds swap {}", self.vaddr, old)
            }
        };
        self.loaded = false;
    }

    /// 换入完成
    ///
    /// 换出前是文件页的恢复为文件页并标记为已安装，返回 `true`；
    /// 纯匿名页的数据只存在于帧中，表项应被删除，返回 `false`。
    pub fn after_swap_in(&mut self) -> bool {
        let source = core::mem::replace(&mut self.source, PageSource::Zero);
        match source {
            PageSource::FileSwapped { file, .. } => {
                self.source = PageSource::File(file);
                self.loaded = true;
                true
            }
            other => {
                self.source = other;
                false
            }
        }
    }
}

/// 补充页表
pub struct SupPageTable {
    entries: HashMap<Vaddr, SupPage>,
    torn_down: bool,
}

impl SupPageTable {
    /// 创建空表
    pub fn new() -> Self {
        SupPageTable {
            entries: HashMap::new(),
            torn_down: false,
        }
    }

    fn check_page(addr: Vaddr) -> VmResult<()> {
        if !addr.is_page_aligned() || !addr.is_user() {
            return Err(VmError::InvalidAddress);
        }
        Ok(())
    }

    /// 插入一个表项，地址已有表项时返回 [`VmError::AlreadyExists`]
    pub fn insert(&mut self, page: SupPage) -> VmResult<()> {
        assert!(!self.torn_down, "vm: insert into torn down page table");
        Self::check_page(page.vaddr)?;
        if self.entries.contains_key(&page.vaddr) {
            return Err(VmError::AlreadyExists);
        }
        self.entries.insert(page.vaddr, page);
        Ok(())
    }

    /// 登记一个惰性加载的文件页
    ///
    /// `read_len + zero_len` 必须恰好等于页大小。
    pub fn register_file_backed(
        &mut self,
        file: Arc<dyn VmFile>,
        offset: usize,
        read_len: usize,
        zero_len: usize,
        writable: bool,
        addr: Vaddr,
    ) -> VmResult<()> {
        if read_len.checked_add(zero_len) != Some(crate::vm_config().page_size()) {
            return Err(VmError::InvalidArgument);
        }
        let slice = FileSlice {
            file,
            offset,
            read_len,
            zero_len,
        };
        self.insert(SupPage::file_backed(addr, slice, writable))
    }

    /// 登记一个首次访问时清零的匿名页
    pub fn register_zero_fill(&mut self, addr: Vaddr, writable: bool) -> VmResult<()> {
        self.insert(SupPage {
            vaddr: addr,
            loaded: false,
            writable,
            source: PageSource::Zero,
        })
    }

    /// 为一个没有表项的驻留页记录换出位置
    pub fn insert_swapped(&mut self, addr: Vaddr, slot: SwapSlot, writable: bool) -> VmResult<()> {
        self.insert(SupPage::swapped(addr, slot, writable))
    }

    /// 查找包含 `addr` 的页的表项
    pub fn lookup(&self, addr: Vaddr) -> Option<&SupPage> {
        self.entries.get(&addr.page_floor())
    }

    /// 以可变方式查找包含 `addr` 的页的表项
    pub fn get_mut(&mut self, addr: Vaddr) -> Option<&mut SupPage> {
        self.entries.get_mut(&addr.page_floor())
    }

    /// 删除表项
    ///
    /// 表项引用的交换槽不会被释放，由调用者负责。
    pub fn remove(&mut self, addr: Vaddr) -> Option<SupPage> {
        self.entries.remove(&addr.page_floor())
    }

    /// `[base, base + pages)` 中是否有任一页存在表项
    pub fn any_in_range(&self, base: Vaddr, pages: usize) -> bool {
        (0..pages).any(|i| self.entries.contains_key(&base.add_pages(i)))
    }

    /// 释放所有表项及其交换槽，并把表标记为已销毁
    ///
    /// 返回释放的交换槽数量。再次调用不做任何事情。
    pub fn teardown(&mut self, swap: &SwapStore) -> usize {
        if self.torn_down {
            return 0;
        }
        self.torn_down = true;
        let mut released = 0;
        for (_, page) in self.entries.drain() {
            if let Some(slot) = page.swap_slot() {
                swap.discard(slot);
                released += 1;
            }
        }
        released
    }

    /// 表是否已被销毁
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// 表项数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否没有表项
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 所有表项的地址，按地址排序
    pub fn addresses(&self) -> alloc::vec::Vec<Vaddr> {
        let mut addrs: alloc::vec::Vec<Vaddr> = self.entries.keys().copied().collect();
        addrs.sort_unstable_by_key(|va| va.as_usize());
        addrs
    }
}

impl Default for SupPageTable {
    fn default() -> Self {
        Self::new()
    }
}
