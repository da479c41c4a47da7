//! 虚拟内存配置的 Mock 实现
//!
//! `vm` crate 在 `cfg(test)` 下为 [`MockVmConfig`] 实现 `VmConfig`。

/// Mock 的虚拟内存配置
///
/// 布局模仿 32 位教学内核：用户空间位于 `[0, 0xC000_0000)`，
/// 用户栈从用户空间顶端向下增长。
pub struct MockVmConfig;

impl MockVmConfig {
    pub const fn new() -> Self {
        Self
    }

    pub fn page_size(&self) -> usize {
        4096
    }

    pub fn user_space_end(&self) -> usize {
        0xC000_0000
    }

    pub fn user_stack_top(&self) -> usize {
        0xC000_0000
    }

    pub fn max_stack_size(&self) -> usize {
        8 * 1024 * 1024
    }

    pub fn stack_slack(&self) -> usize {
        32
    }
}

/// 全局 Mock 实例
pub static MOCK_VM_CONFIG: MockVmConfig = MockVmConfig::new();
