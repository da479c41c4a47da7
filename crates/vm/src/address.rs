//! 地址模块
//!
//! - [`Vaddr`]：用户虚拟地址
//! - [`Ppn`]：物理页号，同时作为帧表中帧记录的键
//! - [`UsizeConvert`]：在类型和 usize 之间进行转换

use core::fmt;

/// 进程标识
pub type Pid = usize;

/// 获取页大小
#[inline]
fn page_size() -> usize {
    crate::vm_config().page_size()
}

/// 在类型和 usize 之间进行转换
pub trait UsizeConvert: Copy {
    /// 从 usize 构造
    fn from_usize(value: usize) -> Self;
    /// 转换为 usize
    fn as_usize(&self) -> usize;
}

/// 为单字段 newtype 实现 `UsizeConvert` 与十六进制格式化
macro_rules! impl_usize_newtype {
    ($ty:ident) => {
        impl UsizeConvert for $ty {
            #[inline]
            fn from_usize(value: usize) -> Self {
                $ty(value)
            }

            #[inline]
            fn as_usize(&self) -> usize {
                self.0
            }
        }

        impl fmt::LowerHex for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

/// 用户虚拟地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Vaddr(pub usize);

impl_usize_newtype!(Vaddr);

impl fmt::Debug for Vaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vaddr({:#x})", self.0)
    }
}

impl Vaddr {
    /// 空地址
    pub const NULL: Vaddr = Vaddr(0);

    /// 是否为空地址
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// 向下对齐到页边界
    #[inline]
    pub fn page_floor(self) -> Vaddr {
        Vaddr(self.0 & !(page_size() - 1))
    }

    /// 页内偏移
    #[inline]
    pub fn page_offset(self) -> usize {
        self.0 & (page_size() - 1)
    }

    /// 是否页对齐
    #[inline]
    pub fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// 是否位于用户地址空间
    #[inline]
    pub fn is_user(self) -> bool {
        self.0 < crate::vm_config().user_space_end()
    }

    /// 加上若干页，溢出时返回 `None`
    #[inline]
    pub fn checked_add_pages(self, pages: usize) -> Option<Vaddr> {
        pages
            .checked_mul(page_size())
            .and_then(|bytes| self.0.checked_add(bytes))
            .map(Vaddr)
    }

    /// 加上若干页
    #[inline]
    pub fn add_pages(self, pages: usize) -> Vaddr {
        Vaddr(self.0 + pages * page_size())
    }
}

/// 物理页号
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ppn(pub usize);

impl_usize_newtype!(Ppn);

impl fmt::Debug for Ppn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ppn({:#x})", self.0)
    }
}

impl core::ops::Add<usize> for Ppn {
    type Output = Ppn;

    fn add(self, rhs: usize) -> Ppn {
        Ppn(self.0 + rhs)
    }
}

impl core::ops::Sub<Ppn> for Ppn {
    type Output = usize;

    fn sub(self, rhs: Ppn) -> usize {
        self.0 - rhs.0
    }
}
