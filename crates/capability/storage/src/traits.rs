//! 时序存储接口。

use crate::error::StorageError;
use crate::models::{HistoryFilter, PointRecord};
use async_trait::async_trait;
use domain::DataPoint;

/// 时序存储：批量写入 + 只读历史查询。
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// 整批写入，返回写入条数。
    async fn write_batch(&self, points: &[DataPoint]) -> Result<usize, StorageError>;

    /// 按时间倒序返回最多 `filter.limit` 条。
    async fn query(&self, filter: &HistoryFilter) -> Result<Vec<PointRecord>, StorageError>;
}
