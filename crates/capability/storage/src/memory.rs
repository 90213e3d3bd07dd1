//! 时序存储内存实现
//!
//! 用于接线与测试：记录每个批次的大小，可切换为不可用以模拟存储故障。

use crate::error::StorageError;
use crate::models::{HistoryFilter, PointRecord};
use crate::traits::TimeSeriesStore;
use async_trait::async_trait;
use domain::DataPoint;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub struct InMemoryTimeSeriesStore {
    records: RwLock<Vec<PointRecord>>,
    batches: RwLock<Vec<usize>>,
    available: AtomicBool,
    rejected_writes: AtomicUsize,
}

impl Default for InMemoryTimeSeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTimeSeriesStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            batches: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
            rejected_writes: AtomicUsize::new(0),
        }
    }

    /// 切换可用状态；不可用时写入返回错误。
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// 已写入的记录数。
    pub fn len(&self) -> usize {
        self.records.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<PointRecord> {
        self.records.read().map(|v| v.clone()).unwrap_or_default()
    }

    /// 每个成功批次的大小（按写入顺序）。
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.read().map(|v| v.clone()).unwrap_or_default()
    }

    /// 因不可用被拒绝的写入次数。
    pub fn rejected_writes(&self) -> usize {
        self.rejected_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeSeriesStore for InMemoryTimeSeriesStore {
    async fn write_batch(&self, points: &[DataPoint]) -> Result<usize, StorageError> {
        if !self.available.load(Ordering::SeqCst) {
            self.rejected_writes.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::new("store unavailable"));
        }
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        records.extend(points.iter().map(PointRecord::from));
        drop(records);
        let mut batches = self
            .batches
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        batches.push(points.len());
        Ok(points.len())
    }

    async fn query(&self, filter: &HistoryFilter) -> Result<Vec<PointRecord>, StorageError> {
        let records = self
            .records
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<PointRecord> = records
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.ts_ms.cmp(&a.ts_ms));
        items.truncate(filter.limit as usize);
        Ok(items)
    }
}
