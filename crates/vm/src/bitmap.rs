//! 位图
//!
//! 物理页分配器与交换槽共用。每个 bit 表示一个单元（0=空闲，1=已占用），
//! 使用 `Vec<u64>` 存储，查找时整字跳过全满的 u64。

use alloc::vec::Vec;

/// 定长位图
#[derive(Debug)]
pub(crate) struct Bitmap {
    words: Vec<u64>,
    len: usize,
    used: usize,
    /// 上次分配所在的字，下次从这里开始查找
    hint: usize,
}

impl Bitmap {
    /// 创建 `len` 位全部空闲的位图
    pub(crate) fn new(len: usize) -> Self {
        Bitmap {
            words: alloc::vec![0u64; len.div_ceil(64)],
            len,
            used: 0,
            hint: 0,
        }
    }

    /// 总位数
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// 已占用位数
    pub(crate) fn used(&self) -> usize {
        self.used
    }

    /// 空闲位数
    pub(crate) fn free(&self) -> usize {
        self.len - self.used
    }

    /// 检查第 `idx` 位是否已占用
    #[inline]
    pub(crate) fn test(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        self.words[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    /// 找到第一个空闲位并置位，返回其下标
    ///
    /// 查找与置位在同一次调用中完成，调用者持锁即保证原子性。
    pub(crate) fn scan_and_set(&mut self) -> Option<usize> {
        let count = self.words.len();
        for step in 0..count {
            let word_idx = (self.hint + step) % count;
            let word = self.words[word_idx];
            if word == u64::MAX {
                continue;
            }
            let idx = word_idx * 64 + (!word).trailing_zeros() as usize;
            if idx >= self.len {
                continue;
            }
            self.words[word_idx] |= 1u64 << (idx % 64);
            self.used += 1;
            self.hint = word_idx;
            return Some(idx);
        }
        None
    }

    /// 清除第 `idx` 位
    ///
    /// # Panics
    /// 该位原本空闲时 panic（重复释放）
    pub(crate) fn clear(&mut self, idx: usize) {
        assert!(idx < self.len, "bitmap index {} out of range", idx);
        let mask = 1u64 << (idx % 64);
        let word = &mut self.words[idx / 64];
        assert!(*word & mask != 0, "bitmap bit {} released twice", idx);
        *word &= !mask;
        self.used -= 1;
    }
}
