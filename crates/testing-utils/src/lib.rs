//! 工作区共享的测试工具：仓储mock与测试数据构造器
//!
//! 所有mock都是内存实现，无需数据库即可对调度、执行、监控
//! 各路径做单元与集成测试。

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
