//! 交换区
//!
//! 交换设备被切分成页大小的槽位，每个槽位占 `page_size / sector_size` 个扇区。
//! 一张位图记录槽位的占用情况：某一位被置位，当且仅当有补充页表项引用该槽位。
//!
//! 查找空闲位与置位在同一个临界区内完成；设备读写在锁外进行，
//! 此时槽位已经被预留，其他线程不会再选中它。

mod device;

pub use device::{RamSwapDevice, SECTOR_SIZE, SwapDevice};

use crate::bitmap::Bitmap;
use crate::error::{VmError, VmResult};
use alloc::boxed::Box;
use core::fmt;
use sync::IrqSpinLock;

/// 交换槽编号
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SwapSlot(pub usize);

impl fmt::Display for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// 交换区
pub struct SwapStore {
    device: Box<dyn SwapDevice>,
    slots: IrqSpinLock<Bitmap>,
    sectors_per_slot: usize,
}

impl SwapStore {
    /// 在交换设备上建立交换区，设备末尾不足一个槽位的扇区不使用
    ///
    /// # Panics
    /// 页大小不是扇区大小的整数倍时 panic
    pub fn new(device: Box<dyn SwapDevice>) -> Self {
        let page_size = crate::vm_config().page_size();
        let sector_size = device.sector_size();
        assert!(
            sector_size != 0 && page_size % sector_size == 0,
            "page size {} is not a multiple of sector size {}",
            page_size,
            sector_size
        );
        let sectors_per_slot = page_size / sector_size;
        let slot_count = device.sector_count() / sectors_per_slot;
        log::debug!(
            "vm: swap store with {} slots ({} sectors each)",
            slot_count,
            sectors_per_slot
        );
        SwapStore {
            device,
            slots: IrqSpinLock::new(Bitmap::new(slot_count)),
            sectors_per_slot,
        }
    }

    /// 预留一个空闲槽位并把 `page` 写进去
    ///
    /// 没有空闲槽位时返回 [`VmError::OutOfSwap`]；
    /// 写入失败时释放槽位并返回 [`VmError::Io`]。
    pub fn reserve_and_write(&self, page: &[u8]) -> VmResult<SwapSlot> {
        debug_assert_eq!(page.len(), crate::vm_config().page_size());
        let slot = match self.slots.lock().scan_and_set() {
            Some(idx) => SwapSlot(idx),
            None => {
                log::warn!("vm: swap space exhausted");
                return Err(VmError::OutOfSwap);
            }
        };

        let sector_size = self.device.sector_size();
        let first = slot.0 * self.sectors_per_slot;
        for (i, chunk) in page.chunks(sector_size).enumerate() {
            if !self.device.write_sector(first + i, chunk) {
                log::warn!("vm: swap write of {} failed at sector {}", slot, first + i);
                self.slots.lock().clear(slot.0);
                return Err(VmError::Io);
            }
        }
        Ok(slot)
    }

    /// 把槽位的内容读进 `out` 并释放槽位
    ///
    /// 读取失败时槽位保持预留，返回 [`VmError::Io`]，调用者的补充页表项仍然有效。
    ///
    /// # Panics
    /// 槽位未被预留（包括重复释放）时 panic
    pub fn release_and_read(&self, slot: SwapSlot, out: &mut [u8]) -> VmResult<()> {
        debug_assert_eq!(out.len(), crate::vm_config().page_size());
        assert!(
            self.is_reserved(slot),
            "vm: release of unreserved swap {}",
            slot
        );

        let sector_size = self.device.sector_size();
        let first = slot.0 * self.sectors_per_slot;
        for (i, chunk) in out.chunks_mut(sector_size).enumerate() {
            if !self.device.read_sector(first + i, chunk) {
                log::warn!("vm: swap read of {} failed at sector {}", slot, first + i);
                return Err(VmError::Io);
            }
        }

        self.slots.lock().clear(slot.0);
        Ok(())
    }

    /// 不读取内容，直接释放槽位
    ///
    /// # Panics
    /// 槽位未被预留时 panic
    pub fn discard(&self, slot: SwapSlot) {
        let mut slots = self.slots.lock();
        assert!(
            slot.0 < slots.len() && slots.test(slot.0),
            "vm: discard of unreserved swap {}",
            slot
        );
        slots.clear(slot.0);
    }

    /// 槽位是否已被预留
    pub fn is_reserved(&self, slot: SwapSlot) -> bool {
        let slots = self.slots.lock();
        slot.0 < slots.len() && slots.test(slot.0)
    }

    /// 空闲槽位数
    pub fn free_slots(&self) -> usize {
        self.slots.lock().free()
    }

    /// 槽位总数
    pub fn total_slots(&self) -> usize {
        self.slots.lock().len()
    }
}
