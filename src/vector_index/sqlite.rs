//! `sqlite-vec`-backed `VectorIndex`: the server-class, native-vector-search
//! backend. Grounded directly in `wg-ragsmith/src/stores/sqlite.rs`'s
//! `SqliteChunkStore` — the `sqlite3_auto_extension` registration dance and
//! the `vec_distance_cosine` query shape are kept; the single fixed,
//! URL-keyed `chunks` table is replaced with one carrying the
//! tenant/product/campaign/chunk-type columns this spec's filter model
//! needs, and `rig`/`rig-sqlite` are dropped since this crate's own
//! `Embedder` port already covers what `rig::EmbeddingModel` would.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::{Mutex, Once};

use async_trait::async_trait;
use tokio_rusqlite::{ffi, Connection};
use uuid::Uuid;

use crate::domain::{ChunkId, ChunkType};
use crate::error::{PkeError, PkeResult};

use super::{ClearScope, ScoredChunk, SearchFilter, VectorEntry, VectorIndex};

fn chunk_type_str(t: ChunkType) -> &'static str {
    match t {
        ChunkType::SpecRow => "spec_row",
        ChunkType::Feature => "feature",
        ChunkType::Usp => "usp",
        ChunkType::Narrative => "narrative",
    }
}

fn register_sqlite_vec() -> PkeResult<()> {
    static INIT: Once = Once::new();
    static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

    INIT.call_once(|| {
        let result = unsafe {
            type SqliteExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *mut c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn: SqliteExtensionInit =
                transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc != 0 {
                Err(format!("failed to register sqlite-vec extension (code {rc})"))
            } else {
                Ok(())
            }
        };
        *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
    });

    INIT_RESULT
        .lock()
        .expect("init result mutex poisoned")
        .clone()
        .expect("init was called but result not set")
        .map_err(PkeError::Storage)
}

/// Native sqlite-vec index. One `vec0` virtual table sized to the first
/// inserted vector's dimension (mirroring the in-process adapter's
/// dimension-drift policy); scalar columns carry the filter predicates.
pub struct SqliteVectorIndex {
    conn: Connection,
    dimension: std::sync::atomic::AtomicUsize,
}

impl SqliteVectorIndex {
    pub async fn open(path: impl AsRef<Path>) -> PkeResult<Self> {
        register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| PkeError::Storage(err.to_string()))?;
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS chunk_meta (
                    chunk_id TEXT PRIMARY KEY,
                    tenant_id TEXT NOT NULL,
                    product_id TEXT NOT NULL,
                    campaign_variant_id TEXT,
                    chunk_type TEXT NOT NULL
                );",
            )
            .map_err(tokio_rusqlite::Error::Rusqlite)
        })
        .await
        .map_err(|err| PkeError::Storage(err.to_string()))?;
        Ok(Self {
            conn,
            dimension: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    async fn ensure_vector_table(&self, dim: usize) -> PkeResult<()> {
        use std::sync::atomic::Ordering;
        if self.dimension.load(Ordering::Acquire) != 0 {
            return Ok(());
        }
        self.conn
            .call(move |conn| {
                conn.execute_batch(&format!(
                    "CREATE VIRTUAL TABLE IF NOT EXISTS chunk_vectors USING vec0(embedding float[{dim}]);"
                ))
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| PkeError::Storage(err.to_string()))?;
        self.dimension.store(dim, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn insert(&self, entries: Vec<VectorEntry>) -> PkeResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let dim = entries[0].vector.len();
        self.ensure_vector_table(dim).await?;

        for entry in entries {
            if entry.vector.len() != self.dimension.load(std::sync::atomic::Ordering::Acquire) {
                tracing::warn!(
                    chunk_id = %entry.chunk_id,
                    "rejecting vector with dimension drift in sqlite-vec index"
                );
                continue;
            }
            let embedding_json = serde_json::to_string(&entry.vector)?;
            let chunk_id = entry.chunk_id.to_string();
            let tenant_id = entry.tenant_id.to_string();
            let product_id = entry.product_id.to_string();
            let campaign_variant_id = entry.campaign_variant_id.map(|c| c.to_string());
            let chunk_type = chunk_type_str(entry.chunk_type).to_string();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT OR REPLACE INTO chunk_meta \
                         (chunk_id, tenant_id, product_id, campaign_variant_id, chunk_type) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        tokio_rusqlite::params![
                            chunk_id,
                            tenant_id,
                            product_id,
                            campaign_variant_id,
                            chunk_type
                        ],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    conn.execute(
                        "INSERT OR REPLACE INTO chunk_vectors (rowid, embedding) \
                         VALUES ((SELECT rowid FROM chunk_meta WHERE chunk_id = ?1), vec_f32(?2))",
                        tokio_rusqlite::params![chunk_id, embedding_json],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    Ok(())
                })
                .await
                .map_err(|err| PkeError::Storage(err.to_string()))?;
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> PkeResult<Vec<ScoredChunk>> {
        let dim = self.dimension.load(std::sync::atomic::Ordering::Acquire);
        if dim == 0 || query.len() != dim {
            return Ok(Vec::new());
        }

        let embedding_json = serde_json::to_string(query)?;
        let tenant_id = filter.tenant_id.to_string();
        let product_ids: Vec<String> = filter.product_ids.iter().map(ToString::to_string).collect();
        let campaign_variant_id = filter.campaign_variant_id.map(|c| c.to_string());
        let chunk_types: Vec<String> = filter
            .chunk_types
            .iter()
            .map(|c| chunk_type_str(*c).to_string())
            .collect();

        type Row = (String, Option<String>, Option<String>, Option<String>, f32);
        let rows: Vec<Row> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT m.chunk_id, m.product_id, m.campaign_variant_id, m.chunk_type, \
                         vec_distance_cosine(v.embedding, vec_f32(?1)) as distance \
                         FROM chunk_vectors v JOIN chunk_meta m ON m.rowid = v.rowid \
                         WHERE m.tenant_id = ?2 \
                         ORDER BY distance ASC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mapped = stmt
                    .query_map(tokio_rusqlite::params![embedding_json, tenant_id], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, f32>(4)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut out = Vec::new();
                for row in mapped {
                    out.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(out)
            })
            .await
            .map_err(|err| PkeError::Storage(err.to_string()))?;

        // Scalar filters beyond tenant (product/campaign/chunk-type) are
        // applied in Rust, mirroring the in-process adapter's predicate
        // composition rather than a second, dialect-specific WHERE clause.
        let mut scored: Vec<ScoredChunk> = rows
            .into_iter()
            .filter(|(_, product_id, campaign_id, chunk_type, _)| {
                (product_ids.is_empty() || product_id.as_ref().is_some_and(|p| product_ids.contains(p)))
                    && (campaign_variant_id.is_none() || *campaign_id == campaign_variant_id)
                    && (chunk_types.is_empty() || chunk_type.as_ref().is_some_and(|c| chunk_types.contains(c)))
            })
            .filter_map(|(id_str, _, _, _, distance)| {
                Uuid::parse_str(&id_str).ok().map(|id| ScoredChunk {
                    chunk_id: id,
                    score: 1.0 - distance,
                })
            })
            .collect();

        scored.sort_by(|a, b| match b.score.partial_cmp(&a.score) {
            Some(std::cmp::Ordering::Equal) | None => a.chunk_id.cmp(&b.chunk_id),
            Some(ord) => ord,
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn remove(&self, ids: &[ChunkId]) -> PkeResult<()> {
        for id in ids {
            let id_str = id.to_string();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "DELETE FROM chunk_vectors WHERE rowid = (SELECT rowid FROM chunk_meta WHERE chunk_id = ?1)",
                        tokio_rusqlite::params![id_str],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    conn.execute(
                        "DELETE FROM chunk_meta WHERE chunk_id = ?1",
                        tokio_rusqlite::params![id_str],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    Ok(())
                })
                .await
                .map_err(|err| PkeError::Storage(err.to_string()))?;
        }
        Ok(())
    }

    async fn clear(&self, scope: ClearScope) -> PkeResult<()> {
        let (clause, param): (&str, String) = match scope {
            ClearScope::Tenant(t) => ("tenant_id = ?1", t.to_string()),
            ClearScope::Product(_, p) => ("product_id = ?1", p.to_string()),
            ClearScope::Campaign(c) => ("campaign_variant_id = ?1", c.to_string()),
        };
        let sql_vectors = format!(
            "DELETE FROM chunk_vectors WHERE rowid IN (SELECT rowid FROM chunk_meta WHERE {clause})"
        );
        let sql_meta = format!("DELETE FROM chunk_meta WHERE {clause}");
        self.conn
            .call(move |conn| {
                conn.execute(&sql_vectors, tokio_rusqlite::params![param])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                conn.execute(&sql_meta, tokio_rusqlite::params![param])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| PkeError::Storage(err.to_string()))?;
        Ok(())
    }

    fn authoritative_dimension(&self) -> Option<usize> {
        let dim = self.dimension.load(std::sync::atomic::Ordering::Acquire);
        (dim != 0).then_some(dim)
    }
}
