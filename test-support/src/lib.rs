//! 测试支持 crate
//!
//! 提供各 crate 单元测试共用的 Mock 实现。
//!
//! 这里不依赖 `sync` / `vm`（避免循环依赖），Mock 只暴露固有方法，
//! 由使用方在 `cfg(test)` 下为其实现自己的 trait。

#![no_std]

pub mod mock;
