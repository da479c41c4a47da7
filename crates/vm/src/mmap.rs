//! 内存映射文件表
//!
//! 每个进程一张，按起始地址排序保存映射区域。
//! 同一进程的映射区域互不重叠。

use crate::address::Vaddr;
use crate::error::{VmError, VmResult};
use crate::file::VmFile;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

/// 映射号
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MapId(pub usize);

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 一个文件映射区域
pub struct Mapping {
    /// 映射号
    pub id: MapId,
    /// 被映射的文件
    pub file: Arc<dyn VmFile>,
    /// 起始地址，页对齐
    pub base: Vaddr,
    /// 页数
    pub page_count: usize,
    /// 映射时的文件长度
    pub file_len: usize,
}

impl Mapping {
    /// 结束地址（不包含）
    pub fn end(&self) -> Vaddr {
        self.base.add_pages(self.page_count)
    }

    /// 是否包含 `addr`
    pub fn contains(&self, addr: Vaddr) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// 第 `index` 页在文件中的偏移和需要读取的长度
    pub fn page_extent(&self, index: usize) -> (usize, usize) {
        let page_size = crate::vm_config().page_size();
        let offset = index * page_size;
        (offset, page_size.min(self.file_len - offset))
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("id", &self.id)
            .field("base", &self.base)
            .field("page_count", &self.page_count)
            .field("file_len", &self.file_len)
            .finish()
    }
}

/// 映射表
pub struct MmapTable {
    maps: BTreeMap<Vaddr, Mapping>,
    next_id: usize,
}

impl MmapTable {
    /// 创建空表
    pub fn new() -> Self {
        MmapTable {
            maps: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// `[base, base + pages)` 是否与已有映射重叠
    pub fn overlaps(&self, base: Vaddr, pages: usize) -> bool {
        let end = base.add_pages(pages);
        // 起始地址小于 end 的最后一个映射是唯一可能与区间相交的候选
        self.maps
            .range(..end)
            .next_back()
            .is_some_and(|(_, map)| map.end() > base)
    }

    /// 登记一个映射，返回映射号
    pub fn insert(
        &mut self,
        file: Arc<dyn VmFile>,
        base: Vaddr,
        page_count: usize,
        file_len: usize,
    ) -> VmResult<MapId> {
        if page_count == 0 {
            return Err(VmError::InvalidArgument);
        }
        if self.overlaps(base, page_count) {
            return Err(VmError::Overlap);
        }
        let id = MapId(self.next_id);
        self.next_id += 1;
        self.maps.insert(
            base,
            Mapping {
                id,
                file,
                base,
                page_count,
                file_len,
            },
        );
        Ok(id)
    }

    /// 查找包含 `addr` 的映射
    pub fn find(&self, addr: Vaddr) -> Option<&Mapping> {
        self.maps
            .range(..=addr)
            .next_back()
            .map(|(_, map)| map)
            .filter(|map| map.contains(addr))
    }

    /// 按映射号删除
    pub fn remove(&mut self, id: MapId) -> Option<Mapping> {
        let base = self.maps.values().find(|map| map.id == id)?.base;
        self.maps.remove(&base)
    }

    /// 所有映射号
    pub fn ids(&self) -> Vec<MapId> {
        self.maps.values().map(|map| map.id).collect()
    }

    /// 映射数量
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// 是否没有映射
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl Default for MmapTable {
    fn default() -> Self {
        Self::new()
    }
}
