//! # EMS Storage 模块
//!
//! 时序存储抽象与实现：
//!
//! - [`traits`]：`TimeSeriesStore` 批量写入与历史查询接口
//! - [`models`]：存储记录与查询过滤条件
//! - [`memory`]：内存实现（接线与测试；支持模拟不可用）
//! - [`postgres`]：PostgreSQL 实现（表 `modbus_data`，不存在时创建）
//! - [`connection`]：连接池管理
//!
//! 每条记录对应一个数据点：时间戳 + 标签集 + 值。
//! 写入以批为单位，整批成功或整批失败，由存储下沉负责重试。

pub mod connection;
pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod traits;

pub use connection::*;
pub use error::*;
pub use memory::InMemoryTimeSeriesStore;
pub use models::*;
pub use postgres::PgTimeSeriesStore;
pub use traits::*;
