//! 二次机会驱逐
//!
//! ## 选择
//!
//! 按时钟顺序扫描未钉住且已绑定的帧，最多两轮，每轮两遍：
//!
//! 1. 第一遍：选择既没被写过也没被访问过的帧
//! 2. 第二遍：选择没被访问过的帧（此时只剩脏帧），跳过的帧清除访问位
//!
//! 被选中的帧在帧表锁内被钉住、标记为驱逐中，并移到列表末尾。
//!
//! ## 写出
//!
//! 持有牺牲者的补充页表锁完成整个写出过程，牺牲者自己在这个页上的缺页
//! 会等到驱逐结束。干净的文件页直接丢弃，其余的页写入交换区。
//! 写交换区失败时恢复原来的映射，错误返回给请求分配的一方。
//! 恢复映射本身失败说明页表被破坏，直接 panic。
//!
//! ## 与退出、解除映射的竞争
//!
//! 选择与写出之间不持有任何锁。这期间所属进程可能解除映射或退出：
//! 它们会跳过标记为驱逐中的帧，写出时发现映射已经失效，直接把帧转交出去。

use super::FrameTable;
use crate::address::{Ppn, Vaddr};
use crate::error::{VmError, VmResult};
use crate::page_table::PageTable;
use crate::phys::page_bytes;
use crate::space::AddressSpace;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// 被选中的驱逐对象，帧已被钉住并标记为驱逐中
#[derive(Clone)]
pub(crate) struct Victim {
    pub(crate) ppn: Ppn,
    pub(crate) owner: Arc<AddressSpace>,
    pub(crate) vaddr: Vaddr,
}

impl FrameTable {
    /// 驱逐一个帧并把它转交给 `new_owner`
    ///
    /// 返回的页仍保留原来的内容，帧记录已属于 `new_owner` 且未绑定。
    /// 没有可驱逐的帧时返回 [`VmError::NoEvictableFrame`]；
    /// 交换区写入失败时牺牲者保持映射，返回对应的错误。
    pub fn evict_one(&self, new_owner: &Arc<AddressSpace>) -> VmResult<Ppn> {
        let victim = self.claim_victim()?;
        self.complete_eviction(victim, new_owner)
    }

    /// 在驱逐锁内选出并占住一个牺牲者
    pub(crate) fn claim_victim(&self) -> VmResult<Victim> {
        let _selecting = self.eviction_lock.lock();
        self.select_victim()
    }

    /// 写出已占住的牺牲者，成功后把帧转交给 `new_owner`
    pub(crate) fn complete_eviction(
        &self,
        victim: Victim,
        new_owner: &Arc<AddressSpace>,
    ) -> VmResult<Ppn> {
        log::debug!(
            "vm: evicting {:?} at {:?} of pid {} for pid {}",
            victim.ppn,
            victim.vaddr,
            victim.owner.pid(),
            new_owner.pid()
        );

        if let Err(err) = self.write_out(&victim) {
            log::warn!(
                "vm: eviction of {:?} of pid {} failed: {}",
                victim.vaddr,
                victim.owner.pid(),
                err
            );
            self.release_claim(victim.ppn);
            return Err(err);
        }

        self.hand_over(victim.ppn, new_owner);
        Ok(victim.ppn)
    }

    /// 未钉住且已绑定的帧，按时钟顺序
    fn candidates(&self) -> Vec<Victim> {
        let frames = self.frames.lock();
        frames
            .iter()
            .filter(|f| !f.pinned && !f.evicting)
            .filter_map(|f| {
                f.vaddr.map(|vaddr| Victim {
                    ppn: f.ppn,
                    owner: f.owner.clone(),
                    vaddr,
                })
            })
            .collect()
    }

    fn select_victim(&self) -> VmResult<Victim> {
        for _round in 0..2 {
            let candidates = self.candidates();
            if candidates.is_empty() {
                break;
            }

            for victim in &candidates {
                let idle = {
                    let pt = victim.owner.page_table().lock();
                    pt.translate(victim.vaddr) == Some(victim.ppn)
                        && !pt.is_dirty(victim.vaddr)
                        && !pt.is_accessed(victim.vaddr)
                };
                if idle && self.claim(victim) {
                    return Ok(victim.clone());
                }
            }

            for victim in &candidates {
                let idle = {
                    let mut pt = victim.owner.page_table().lock();
                    if pt.translate(victim.vaddr) != Some(victim.ppn) {
                        continue;
                    }
                    if pt.is_accessed(victim.vaddr) {
                        pt.set_accessed(victim.vaddr, false);
                        false
                    } else {
                        true
                    }
                };
                if idle && self.claim(victim) {
                    return Ok(victim.clone());
                }
            }
        }
        log::warn!("vm: no evictable frame");
        Err(VmError::NoEvictableFrame)
    }

    /// 在帧表锁内确认候选者仍然可以驱逐，并将其钉住、移到列表末尾
    fn claim(&self, victim: &Victim) -> bool {
        let mut frames = self.frames.lock();
        let Some(idx) = frames.iter().position(|f| f.ppn == victim.ppn) else {
            return false;
        };
        let frame = &frames[idx];
        if frame.pinned
            || frame.evicting
            || frame.vaddr != Some(victim.vaddr)
            || !Arc::ptr_eq(&frame.owner, &victim.owner)
        {
            return false;
        }
        let mut frame = frames.remove(idx);
        frame.pinned = true;
        frame.evicting = true;
        frames.push(frame);
        true
    }

    /// 把牺牲者的内容保存到它的补充页表项所描述的位置，并清除映射
    fn write_out(&self, victim: &Victim) -> VmResult<()> {
        let owner = &victim.owner;
        let va = victim.vaddr;
        let mut spt = owner.spt().lock();
        let mut pt = owner.page_table().lock();

        // 所属进程在选择之后退出或解除了映射，页已经没人用了
        if spt.is_torn_down() || pt.translate(va) != Some(victim.ppn) {
            if pt.translate(va) == Some(victim.ppn) {
                pt.clear(va);
            }
            log::debug!("vm: victim {:?} of pid {} went stale", va, owner.pid());
            return Ok(());
        }

        let dirty = pt.is_dirty(va);
        let writable = pt.is_writable(va);
        pt.clear(va);
        drop(pt);

        let clean_file = !dirty && spt.lookup(va).is_some_and(|page| page.is_file_backed());
        if clean_file {
            if let Some(page) = spt.get_mut(va) {
                page.mark_unloaded();
            }
            return Ok(());
        }

        // SAFETY: 帧已被钉住且映射已清除，只有本线程能访问
        let bytes = unsafe { page_bytes(&*self.allocator, victim.ppn) };
        match self.swap.reserve_and_write(bytes) {
            Ok(slot) => {
                match spt.get_mut(va) {
                    Some(page) => page.swap_out(slot, writable),
                    None => spt.insert_swapped(va, slot, writable)?,
                }
                Ok(())
            }
            Err(err) => {
                let mut pt = owner.page_table().lock();
                if let Err(paging) = pt.install(va, victim.ppn, writable) {
                    panic!(
                        "vm: cannot restore {:?} of pid {} after failed eviction: {}",
                        va,
                        owner.pid(),
                        paging
                    );
                }
                pt.set_dirty(va, dirty);
                Err(err)
            }
        }
    }

    /// 驱逐失败，把帧还给原来的所有者
    fn release_claim(&self, ppn: Ppn) {
        let mut frames = self.frames.lock();
        let frame = Self::find_mut(&mut frames, ppn);
        frame.pinned = false;
        frame.evicting = false;
    }

    /// 驱逐完成，帧记录转交给新的所有者
    fn hand_over(&self, ppn: Ppn, new_owner: &Arc<AddressSpace>) {
        let mut frames = self.frames.lock();
        let frame = Self::find_mut(&mut frames, ppn);
        frame.owner = new_owner.clone();
        frame.vaddr = None;
        frame.pinned = false;
        frame.evicting = false;
    }
}
