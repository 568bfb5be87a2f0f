use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::config::DataConfig;
use crate::entity::{data, data_chunk};
use crate::error::{Result, StoreError};

/// Type alias for a boxed async reader, possibly borrowing its source.
pub type BoxReader<'a> = Box<dyn AsyncRead + Unpin + Send + 'a>;

/// Keyed binary payloads of one entity.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Replace the payload under `key` with `bytes`. Returns the byte count.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<u64> {
        self.put_stream(key, Box::new(bytes)).await
    }

    /// Replace the payload under `key` with everything `reader` yields.
    async fn put_stream(&self, key: &str, reader: BoxReader<'_>) -> Result<u64>;

    /// Read the whole payload into memory.
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.get_stream(key, &mut buf).await?;
        Ok(buf)
    }

    /// Write the payload into `sink` chunk by chunk, in index order.
    async fn get_stream(&self, key: &str, sink: &mut (dyn AsyncWrite + Unpin + Send))
    -> Result<u64>;

    /// Sum of chunk lengths.
    async fn size(&self, key: &str) -> Result<u64>;

    /// Verify that chunk indices run 1..N without gaps.
    async fn check_consistency(&self, key: &str) -> Result<()>;

    /// Remove the payload and its chunks.
    ///
    /// Returns `true` if the payload existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn contains(&self, key: &str) -> Result<bool>;
}

/// Database-backed payloads, split into chunks of at most
/// `DataConfig::chunk_size` bytes.
pub struct ChunkedData<'a, C: ConnectionTrait> {
    conn: &'a C,
    entity_id: i32,
    config: DataConfig,
}

impl<'a, C: ConnectionTrait> ChunkedData<'a, C> {
    pub fn new(conn: &'a C, entity_id: i32, config: DataConfig) -> Self {
        Self {
            conn,
            entity_id,
            config,
        }
    }

    pub fn entity_id(&self) -> i32 {
        self.entity_id
    }

    /// Payload keys of this entity, sorted.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let keys = data::Entity::find()
            .select_only()
            .column(data::Column::Key)
            .filter(data::Column::EntityId.eq(self.entity_id))
            .order_by_asc(data::Column::Key)
            .into_tuple::<String>()
            .all(self.conn)
            .await?;
        Ok(keys)
    }

    pub async fn mimetype(&self, key: &str) -> Result<Option<String>> {
        Ok(self.require(key).await?.mimetype)
    }

    /// Set or clear the mimetype without touching the chunks. Creates an
    /// empty payload record if `key` does not exist yet.
    pub async fn set_mimetype(&self, key: &str, mimetype: Option<&str>) -> Result<()> {
        let record = self.get_or_create(key).await?;
        data::Entity::update_many()
            .col_expr(data::Column::Mimetype, Expr::value(mimetype.map(str::to_string)))
            .filter(data::Column::Id.eq(record.id))
            .exec(self.conn)
            .await?;
        Ok(())
    }

    /// Recorded total length of the last complete `put`, if any.
    pub async fn length(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.require(key).await?.length.map(|l| l as u64))
    }

    pub async fn chunk_count(&self, key: &str) -> Result<u64> {
        Ok(self.chunk_indices(key).await?.len() as u64)
    }

    /// Chunk indices in ascending order.
    pub async fn chunk_indices(&self, key: &str) -> Result<Vec<i32>> {
        let record = self.require(key).await?;
        let indices = data_chunk::Entity::find()
            .select_only()
            .column(data_chunk::Column::ChunkIndex)
            .filter(data_chunk::Column::DataId.eq(record.id))
            .order_by_asc(data_chunk::Column::ChunkIndex)
            .into_tuple::<i32>()
            .all(self.conn)
            .await?;
        Ok(indices)
    }

    /// Drop all chunks but keep the payload record and its mimetype.
    pub async fn clear(&self, key: &str) -> Result<()> {
        let record = self.require(key).await?;
        self.clear_chunks(record.id).await?;
        self.set_length(record.id, None).await
    }

    /// Copy the payload under `key` to `target_key` of another entity,
    /// chunk by chunk, including the mimetype.
    #[instrument(skip(self), fields(source = self.entity_id))]
    pub async fn copy_to(&self, key: &str, target_entity_id: i32, target_key: &str) -> Result<u64> {
        let source = self.require(key).await?;
        let target = ChunkedData::new(self.conn, target_entity_id, self.config);
        let record = target.get_or_create(target_key).await?;
        target.clear_chunks(record.id).await?;

        let mut total = 0u64;
        for chunk_id in self.chunk_ids(source.id).await? {
            let chunk = self.chunk(chunk_id).await?;
            total += chunk.bytes.len() as u64;
            data_chunk::ActiveModel {
                data_id: Set(record.id),
                chunk_index: Set(chunk.chunk_index),
                length: Set(chunk.length),
                bytes: Set(chunk.bytes),
                ..Default::default()
            }
            .insert(self.conn)
            .await?;
        }

        data::Entity::update_many()
            .col_expr(data::Column::Mimetype, Expr::value(source.mimetype))
            .col_expr(data::Column::Length, Expr::value(source.length))
            .filter(data::Column::Id.eq(record.id))
            .exec(self.conn)
            .await?;
        Ok(total)
    }

    async fn find(&self, key: &str) -> Result<Option<data::Model>> {
        let record = data::Entity::find()
            .filter(data::Column::EntityId.eq(self.entity_id))
            .filter(data::Column::Key.eq(key))
            .one(self.conn)
            .await?;
        Ok(record)
    }

    async fn require(&self, key: &str) -> Result<data::Model> {
        self.find(key).await?.ok_or_else(|| {
            StoreError::NotFound(format!("payload '{key}' of entity {}", self.entity_id))
        })
    }

    async fn get_or_create(&self, key: &str) -> Result<data::Model> {
        if let Some(record) = self.find(key).await? {
            return Ok(record);
        }

        let record = data::ActiveModel {
            entity_id: Set(self.entity_id),
            key: Set(key.to_string()),
            mimetype: Set(None),
            length: Set(None),
            ..Default::default()
        }
        .insert(self.conn)
        .await?;
        Ok(record)
    }

    async fn clear_chunks(&self, data_id: i32) -> Result<u64> {
        let result = data_chunk::Entity::delete_many()
            .filter(data_chunk::Column::DataId.eq(data_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    async fn set_length(&self, data_id: i32, length: Option<i64>) -> Result<()> {
        data::Entity::update_many()
            .col_expr(data::Column::Length, Expr::value(length))
            .filter(data::Column::Id.eq(data_id))
            .exec(self.conn)
            .await?;
        Ok(())
    }

    /// Chunk row ids ordered by chunk index.
    async fn chunk_ids(&self, data_id: i32) -> Result<Vec<i32>> {
        let ids = data_chunk::Entity::find()
            .select_only()
            .column(data_chunk::Column::Id)
            .filter(data_chunk::Column::DataId.eq(data_id))
            .order_by_asc(data_chunk::Column::ChunkIndex)
            .into_tuple::<i32>()
            .all(self.conn)
            .await?;
        Ok(ids)
    }

    async fn chunk(&self, chunk_id: i32) -> Result<data_chunk::Model> {
        data_chunk::Entity::find_by_id(chunk_id)
            .one(self.conn)
            .await?
            .ok_or_else(|| StoreError::DataInconsistency(format!("chunk {chunk_id} vanished")))
    }

    async fn flush(&self, pending: &mut Vec<data_chunk::ActiveModel>) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(pending);
        debug!(chunks = batch.len(), entity_id = self.entity_id, "Flushing chunks");
        data_chunk::Entity::insert_many(batch)
            .exec_without_returning(self.conn)
            .await?;
        Ok(())
    }
}

/// Read until `buf` is full or the reader is exhausted.
async fn fill(reader: &mut BoxReader<'_>, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[async_trait]
impl<C: ConnectionTrait> PayloadStore for ChunkedData<'_, C> {
    #[instrument(skip(self, reader), fields(entity_id = self.entity_id))]
    async fn put_stream(&self, key: &str, mut reader: BoxReader<'_>) -> Result<u64> {
        let record = self.get_or_create(key).await?;
        self.clear_chunks(record.id).await?;
        self.set_length(record.id, None).await?;

        let chunk_size = self.config.chunk_size.max(1);
        let flush_every = self.config.flush_every.max(1);

        let mut buf = vec![0u8; chunk_size];
        let mut pending = Vec::with_capacity(flush_every);
        let mut index = 0i32;
        let mut total = 0u64;

        loop {
            let n = fill(&mut reader, &mut buf).await?;
            if n == 0 {
                break;
            }

            index += 1;
            total += n as u64;
            pending.push(data_chunk::ActiveModel {
                data_id: Set(record.id),
                chunk_index: Set(index),
                length: Set(n as i64),
                bytes: Set(buf[..n].to_vec()),
                ..Default::default()
            });

            // we flush every now and then
            if pending.len() >= flush_every {
                self.flush(&mut pending).await?;
            }

            if n < chunk_size {
                break;
            }
        }
        self.flush(&mut pending).await?;
        self.set_length(record.id, Some(total as i64)).await?;

        debug!(key, chunks = index, bytes = total, "Stored payload");
        Ok(total)
    }

    async fn get_stream(
        &self,
        key: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let record = self.require(key).await?;
        let mut total = 0u64;

        for chunk_id in self.chunk_ids(record.id).await? {
            let chunk = self.chunk(chunk_id).await?;
            sink.write_all(&chunk.bytes).await?;
            total += chunk.bytes.len() as u64;
        }
        sink.flush().await?;
        Ok(total)
    }

    async fn size(&self, key: &str) -> Result<u64> {
        let record = self.require(key).await?;
        let lengths = data_chunk::Entity::find()
            .select_only()
            .column(data_chunk::Column::Length)
            .filter(data_chunk::Column::DataId.eq(record.id))
            .into_tuple::<i64>()
            .all(self.conn)
            .await?;
        Ok(lengths.into_iter().map(|l| l as u64).sum())
    }

    async fn check_consistency(&self, key: &str) -> Result<()> {
        let record = self.require(key).await?;
        let indices = self.chunk_indices(key).await?;

        for (expected, found) in (1..).zip(indices.iter().copied()) {
            if found != expected {
                return Err(StoreError::DataInconsistency(format!(
                    "payload '{key}' of entity {}: found chunk index {found} where {expected} was expected",
                    self.entity_id
                )));
            }
        }

        if let Some(length) = record.length {
            let size = self.size(key).await?;
            if size != length as u64 {
                return Err(StoreError::DataInconsistency(format!(
                    "payload '{key}' of entity {}: chunks hold {size} bytes, {length} recorded",
                    self.entity_id
                )));
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let Some(record) = self.find(key).await? else {
            return Ok(false);
        };
        self.clear_chunks(record.id).await?;
        data::Entity::delete_by_id(record.id).exec(self.conn).await?;
        Ok(true)
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.find(key).await?.is_some())
    }
}
