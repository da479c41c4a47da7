//! 交换设备

use alloc::vec;
use alloc::vec::Vec;
use sync::SpinLock;

/// 交换设备的扇区大小
pub const SECTOR_SIZE: usize = 512;

/// 交换用块设备
pub trait SwapDevice: Send + Sync {
    /// 读取一个扇区
    ///
    /// # 返回值：
    /// 如果读取成功则返回 true，否则返回 false
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> bool;

    /// 写入一个扇区
    ///
    /// # 返回值：
    /// 如果写入成功则返回 true，否则返回 false
    fn write_sector(&self, sector: usize, buf: &[u8]) -> bool;

    /// 扇区大小
    fn sector_size(&self) -> usize {
        SECTOR_SIZE
    }

    /// 扇区总数
    fn sector_count(&self) -> usize;
}

/// 内存模拟的交换设备
///
/// 用于测试和没有交换分区的配置
pub struct RamSwapDevice {
    data: SpinLock<Vec<u8>>,
}

impl RamSwapDevice {
    /// 创建 `sectors` 个扇区的设备
    pub fn new(sectors: usize) -> Self {
        RamSwapDevice {
            data: SpinLock::new(vec![0u8; sectors * SECTOR_SIZE]),
        }
    }

    /// 获取原始数据（用于调试）
    pub fn raw_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl SwapDevice for RamSwapDevice {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> bool {
        if buf.len() != SECTOR_SIZE {
            return false;
        }
        let data = self.data.lock();
        let offset = sector * SECTOR_SIZE;
        if offset + SECTOR_SIZE > data.len() {
            return false;
        }
        buf.copy_from_slice(&data[offset..offset + SECTOR_SIZE]);
        true
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) -> bool {
        if buf.len() != SECTOR_SIZE {
            return false;
        }
        let mut data = self.data.lock();
        let offset = sector * SECTOR_SIZE;
        if offset + SECTOR_SIZE > data.len() {
            return false;
        }
        data[offset..offset + SECTOR_SIZE].copy_from_slice(buf);
        true
    }

    fn sector_count(&self) -> usize {
        self.data.lock().len() / SECTOR_SIZE
    }
}
