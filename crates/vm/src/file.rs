//! 文件接口与文件系统锁

use crate::error::{VmError, VmResult};
use alloc::sync::Arc;
use sync::SpinLock;

/// 可按偏移读写的文件
///
/// 文件句柄以 `Arc<dyn VmFile>` 的形式共享，最后一个 `Arc` 被释放即关闭文件。
pub trait VmFile: Send + Sync {
    /// 从指定偏移读取数据到缓冲区，返回实际读取的字节数
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize>;

    /// 将缓冲区数据写入指定偏移，返回实际写入的字节数
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize>;

    /// 文件长度
    fn len(&self) -> usize;

    /// 文件是否为空
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 文件系统锁
///
/// 文件系统本身不支持并发访问，虚拟内存子系统发起的所有文件操作都经过这把锁。
pub struct FsLock {
    lock: SpinLock<()>,
}

impl FsLock {
    /// 创建文件系统锁
    pub const fn new() -> Self {
        FsLock {
            lock: SpinLock::new(()),
        }
    }

    /// 从 `offset` 读满 `buf`
    ///
    /// 读取失败返回 [`VmError::Io`]，读到的字节不足返回 [`VmError::ShortRead`]。
    pub fn read_exact_at(&self, file: &dyn VmFile, offset: usize, buf: &mut [u8]) -> VmResult<()> {
        let result = {
            let _guard = self.lock.lock();
            file.read_at(offset, buf)
        };
        match result {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(n) => {
                log::warn!(
                    "vm: short read at offset {:#x}: wanted {} bytes, got {}",
                    offset,
                    buf.len(),
                    n
                );
                Err(VmError::ShortRead)
            }
            Err(errno) => {
                log::warn!("vm: read at offset {:#x} failed: {}", offset, errno);
                Err(VmError::Io)
            }
        }
    }

    /// 把 `buf` 写到 `offset`，返回实际写入的字节数
    pub fn write_at(&self, file: &dyn VmFile, offset: usize, buf: &[u8]) -> VmResult<usize> {
        let _guard = self.lock.lock();
        file.write_at(offset, buf).map_err(|errno| {
            log::warn!("vm: write at offset {:#x} failed: {}", offset, errno);
            VmError::Io
        })
    }

    /// 读取文件长度
    pub fn len(&self, file: &dyn VmFile) -> usize {
        let _guard = self.lock.lock();
        file.len()
    }

    /// 在锁内释放文件句柄
    pub fn close(&self, file: Arc<dyn VmFile>) {
        let _guard = self.lock.lock();
        drop(file);
    }
}

impl Default for FsLock {
    fn default() -> Self {
        Self::new()
    }
}
