//! 帧表
//!
//! 记录每个分配给用户进程的物理页：所属进程、映射的虚拟地址以及是否被钉住。
//! 列表的顺序就是时钟算法的扫描顺序，新分配和刚被驱逐重用的帧排在末尾。
//!
//! ## 帧的生命周期
//!
//! 1. [`FrameTable::allocate`]：从分配器取页，失败则驱逐一个帧；此时帧未绑定
//! 2. 调用者填充页内容并安装映射后调用 [`FrameTable::bind`]
//! 3. [`FrameTable::free`] 或 [`FrameTable::reclaim_all`] 把页还给分配器
//!
//! 未绑定或被钉住的帧不会被选为驱逐对象。

mod eviction;

use crate::address::{Pid, Ppn, Vaddr};
use crate::error::VmResult;
use crate::page_table::PageTable;
use crate::phys::{PageAllocator, page_bytes};
use crate::space::AddressSpace;
use crate::swap::SwapStore;
use alloc::sync::Arc;
use alloc::vec::Vec;
use sync::{IrqSpinLock, SpinLock};

/// 一个已分配给进程的物理页
struct Frame {
    ppn: Ppn,
    owner: Arc<AddressSpace>,
    /// 映射的用户虚拟地址，绑定前为 `None`
    vaddr: Option<Vaddr>,
    pinned: bool,
    /// 正在被某个线程驱逐，其他人不能释放它
    evicting: bool,
}

impl Frame {
    fn new(ppn: Ppn, owner: Arc<AddressSpace>) -> Self {
        Frame {
            ppn,
            owner,
            vaddr: None,
            pinned: false,
            evicting: false,
        }
    }
}

/// 帧表
pub struct FrameTable {
    allocator: Arc<dyn PageAllocator>,
    swap: Arc<SwapStore>,
    frames: IrqSpinLock<Vec<Frame>>,
    /// 串行化驱逐对象的选择
    eviction_lock: SpinLock<()>,
}

impl FrameTable {
    /// 创建帧表
    pub fn new(allocator: Arc<dyn PageAllocator>, swap: Arc<SwapStore>) -> Self {
        FrameTable {
            allocator,
            swap,
            frames: IrqSpinLock::new(Vec::new()),
            eviction_lock: SpinLock::new(()),
        }
    }

    /// 为 `owner` 分配一个帧
    ///
    /// 分配器没有空闲页时驱逐一个帧。`zeroed` 为真时页内容被清零，
    /// 包括从驱逐得到的页。返回的帧尚未绑定。
    pub fn allocate(&self, owner: &Arc<AddressSpace>, zeroed: bool) -> VmResult<Ppn> {
        let ppn = match self.allocator.alloc_page() {
            Some(ppn) => {
                self.frames.lock().push(Frame::new(ppn, owner.clone()));
                ppn
            }
            None => self.evict_one(owner)?,
        };
        if zeroed {
            // SAFETY: 帧未绑定也未安装，只有调用者能访问
            unsafe { page_bytes(&*self.allocator, ppn) }.fill(0);
        }
        Ok(ppn)
    }

    /// 记录帧映射的虚拟地址，此后它可以被驱逐
    ///
    /// # Panics
    /// 帧不在帧表中时 panic
    pub fn bind(&self, ppn: Ppn, vaddr: Vaddr) {
        let mut frames = self.frames.lock();
        let frame = Self::find_mut(&mut frames, ppn);
        frame.vaddr = Some(vaddr);
    }

    /// 删除帧记录并把页还给分配器
    ///
    /// # Panics
    /// 帧不在帧表中或正在被驱逐时 panic
    pub fn free(&self, ppn: Ppn) {
        let frame = {
            let mut frames = self.frames.lock();
            let idx = Self::position(&frames, ppn);
            assert!(!frames[idx].evicting, "vm: free of frame {:?} under eviction", ppn);
            frames.remove(idx)
        };
        self.allocator.free_page(frame.ppn);
    }

    /// 与 [`free`](Self::free) 相同，但帧正在被驱逐时什么也不做，返回 `false`
    ///
    /// 驱逐线程会发现映射已经失效，直接把页转交给新的所有者。
    pub(crate) fn free_unless_evicting(&self, ppn: Ppn) -> bool {
        let frame = {
            let mut frames = self.frames.lock();
            let idx = Self::position(&frames, ppn);
            if frames[idx].evicting {
                return false;
            }
            frames.remove(idx)
        };
        self.allocator.free_page(frame.ppn);
        true
    }

    /// 钉住帧，使其不会被驱逐
    pub fn pin(&self, ppn: Ppn) {
        Self::find_mut(&mut self.frames.lock(), ppn).pinned = true;
    }

    /// 取消钉住
    pub fn unpin(&self, ppn: Ppn) {
        Self::find_mut(&mut self.frames.lock(), ppn).pinned = false;
    }

    /// 回收进程 `pid` 的所有帧，返回回收的数量
    ///
    /// 正在被驱逐的帧留给驱逐线程处理。
    pub fn reclaim_all(&self, pid: Pid) -> usize {
        let reclaimed: Vec<Frame> = {
            let mut frames = self.frames.lock();
            let (mine, rest): (Vec<Frame>, Vec<Frame>) = frames
                .drain(..)
                .partition(|frame| frame.owner.pid() == pid && !frame.evicting);
            *frames = rest;
            mine
        };

        let count = reclaimed.len();
        for frame in reclaimed {
            if let Some(va) = frame.vaddr {
                let mut pt = frame.owner.page_table().lock();
                if pt.translate(va) == Some(frame.ppn) {
                    pt.clear(va);
                }
            }
            self.allocator.free_page(frame.ppn);
        }
        if count > 0 {
            log::debug!("vm: reclaimed {} frames of pid {}", count, pid);
        }
        count
    }

    /// 帧表中的帧数量
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// 帧表是否为空
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// 帧是否被钉住；不在帧表中时返回 `None`
    pub fn is_pinned(&self, ppn: Ppn) -> Option<bool> {
        let frames = self.frames.lock();
        frames.iter().find(|f| f.ppn == ppn).map(|f| f.pinned)
    }

    /// 帧的所属进程与绑定地址；不在帧表中时返回 `None`
    pub fn binding(&self, ppn: Ppn) -> Option<(Pid, Option<Vaddr>)> {
        let frames = self.frames.lock();
        frames
            .iter()
            .find(|f| f.ppn == ppn)
            .map(|f| (f.owner.pid(), f.vaddr))
    }

    /// 物理页分配器
    pub fn allocator(&self) -> &dyn PageAllocator {
        &*self.allocator
    }

    fn position(frames: &[Frame], ppn: Ppn) -> usize {
        match frames.iter().position(|f| f.ppn == ppn) {
            Some(idx) => idx,
            None => panic!("vm: frame {:?} not in frame table", ppn),
        }
    }

    fn find_mut(frames: &mut [Frame], ppn: Ppn) -> &mut Frame {
        let idx = Self::position(frames, ppn);
        &mut frames[idx]
    }
}
