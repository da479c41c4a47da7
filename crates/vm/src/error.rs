//! 虚拟内存错误类型

use crate::page_table::PagingError;
use core::fmt;

/// 虚拟内存操作的错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 没有空闲物理页，也没有可以驱逐的帧（全部被钉住或尚未绑定）
    NoEvictableFrame,
    /// 交换区已满
    OutOfSwap,
    /// 地址已有补充页表项
    AlreadyExists,
    /// 地址为空、未对齐或不在用户空间
    InvalidAddress,
    /// 参数不合法（长度为零的映射、长度不一致的段等）
    InvalidArgument,
    /// 映射区域与已有的映射或页重叠
    Overlap,
    /// 映射号不存在
    NoSuchMapping,
    /// 设备或文件读写失败
    Io,
    /// 文件读到的字节数少于请求的字节数
    ShortRead,
    /// 页表操作失败
    Paging(PagingError),
}

impl From<PagingError> for VmError {
    fn from(err: PagingError) -> Self {
        VmError::Paging(err)
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::NoEvictableFrame => write!(f, "no free frame and nothing evictable"),
            VmError::OutOfSwap => write!(f, "swap space exhausted"),
            VmError::AlreadyExists => write!(f, "page already registered"),
            VmError::InvalidAddress => write!(f, "invalid address"),
            VmError::InvalidArgument => write!(f, "invalid argument"),
            VmError::Overlap => write!(f, "range overlaps an existing mapping"),
            VmError::NoSuchMapping => write!(f, "no such mapping"),
            VmError::Io => write!(f, "I/O error"),
            VmError::ShortRead => write!(f, "short read"),
            VmError::Paging(err) => write!(f, "paging error: {}", err),
        }
    }
}

/// 虚拟内存操作的结果类型
pub type VmResult<T> = Result<T, VmError>;
