//! Postgres 时序存储实现
//!
//! 表 `modbus_data`：每行一个数据点，值统一存为 double，附类型标记。

use crate::error::StorageError;
use crate::models::{HistoryFilter, PointRecord, decode_value, encode_value};
use crate::traits::TimeSeriesStore;
use domain::{DataPoint, RegisterKind, TagSet};
use sqlx::{PgPool, Row};

const INSERT_POINT: &str = "insert into modbus_data \
     (ts, device_name, slave_id, register_name, register_type, address, value, value_kind) \
     values (to_timestamp($1 / 1000.0), $2, $3, $4, $5, $6, $7, $8)";

pub struct PgTimeSeriesStore {
    pub pool: PgPool,
}

impl PgTimeSeriesStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        Ok(Self { pool })
    }

    /// 表与索引不存在时创建。
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            "create table if not exists modbus_data ( \
             ts timestamptz not null, \
             device_name text not null, \
             slave_id integer not null, \
             register_name text not null, \
             register_type text not null, \
             address integer not null, \
             value double precision not null, \
             value_kind text not null)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "create index if not exists modbus_data_device_ts_idx \
             on modbus_data (device_name, ts desc)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TimeSeriesStore for PgTimeSeriesStore {
    async fn write_batch(&self, points: &[DataPoint]) -> Result<usize, StorageError> {
        if points.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for point in points {
            let (value, kind) = encode_value(&point.value);
            sqlx::query(INSERT_POINT)
                .bind(point.ts_ms as f64)
                .bind(&point.tags.device_name)
                .bind(i32::from(point.tags.slave_id))
                .bind(&point.tags.register_name)
                .bind(point.tags.register_type.as_str())
                .bind(i32::from(point.tags.address))
                .bind(value)
                .bind(kind)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(points.len())
    }

    async fn query(&self, filter: &HistoryFilter) -> Result<Vec<PointRecord>, StorageError> {
        if filter.limit == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "select (extract(epoch from ts) * 1000)::bigint as ts_ms, \
             device_name, slave_id, register_name, register_type, address, value, value_kind \
             from modbus_data \
             where ($1::float8 is null or ts >= to_timestamp($1 / 1000.0)) \
             and ($2::float8 is null or ts <= to_timestamp($2 / 1000.0)) \
             and ($3::text is null or device_name = $3) \
             and ($4::integer is null or slave_id = $4) \
             and ($5::text is null or register_type = $5) \
             and ($6::integer is null or address = $6) \
             order by ts desc \
             limit $7",
        )
        .bind(filter.start_ms.map(|ms| ms as f64))
        .bind(filter.end_ms.map(|ms| ms as f64))
        .bind(filter.device_name.as_deref())
        .bind(filter.slave_id.map(i32::from))
        .bind(filter.register_type.map(|kind| kind.as_str()))
        .bind(filter.address.map(i32::from))
        .bind(i64::from(filter.limit))
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let register_type: String = row.try_get("register_type")?;
            let slave_id: i32 = row.try_get("slave_id")?;
            let address: i32 = row.try_get("address")?;
            let value: f64 = row.try_get("value")?;
            let value_kind: String = row.try_get("value_kind")?;
            items.push(PointRecord {
                ts_ms: row.try_get("ts_ms")?,
                value: decode_value(value, &value_kind),
                tags: TagSet {
                    device_name: row.try_get("device_name")?,
                    slave_id: u8::try_from(slave_id)
                        .map_err(|_| StorageError::new("slave_id out of range"))?,
                    register_name: row.try_get("register_name")?,
                    address: u16::try_from(address)
                        .map_err(|_| StorageError::new("address out of range"))?,
                    register_type: register_type
                        .parse::<RegisterKind>()
                        .map_err(StorageError::new)?,
                },
            });
        }
        Ok(items)
    }
}
