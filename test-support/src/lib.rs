//! 测试支持 crate
//!
//! 提供与被测 crate 解耦的 Mock 数据类型。各 crate 在测试配置下为这些类型
//! 实现自己的 trait（例如 `sync::ArchOps`、`cdi::SchedOps`）。

#![no_std]

pub mod mock;
