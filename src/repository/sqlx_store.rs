//! Server-class `FactStore` implementation shared across the `sqlite` and
//! `postgres` features via `sqlx::Any`.
//!
//! Grounded in `weavegraph`'s dual `sqlite-migrations`/`postgres-migrations`
//! checkpointer features: one `FactStore` struct, one portable-SQL
//! implementation, selected at pool-construction time by connection string
//! scheme rather than by a second copy of the trait impl.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::domain::{
    CampaignVariant, CampaignVariantId, ChunkMetadata, ChunkType, CompletionStatus,
    DocumentSourceId, KnowledgeChunk, LineageEntry, SpecDataType, SpecItem, SpecValue,
    SpecValueStatus, TenantId,
};
use crate::error::{PkeError, PkeResult};

use super::{FactStore, SpecValueFilter};

/// `sqlx`-backed fact store. Connection pool size defaults to 20 per
/// `spec.md` §5's resource model.
pub struct SqlxFactStore {
    pool: AnyPool,
}

const DEFAULT_POOL_SIZE: u32 = 20;

impl SqlxFactStore {
    /// Connects and runs the embedded schema migration. `database_url`
    /// determines the backend (`sqlite:...` or `postgres://...`); both are
    /// compiled in only when their corresponding crate feature is enabled.
    pub async fn connect(database_url: &str) -> PkeResult<Self> {
        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(DEFAULT_POOL_SIZE)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> PkeResult<()> {
        for stmt in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS spec_items (
    id TEXT PRIMARY KEY,
    category TEXT NOT NULL,
    display_name TEXT NOT NULL,
    unit TEXT,
    data_type TEXT NOT NULL,
    validation_rule TEXT
);
CREATE TABLE IF NOT EXISTS campaign_variants (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    product_id TEXT NOT NULL,
    locale TEXT NOT NULL,
    trim TEXT NOT NULL,
    version INTEGER NOT NULL,
    is_draft INTEGER NOT NULL,
    effective_from TEXT,
    effective_through TEXT
);
CREATE TABLE IF NOT EXISTS spec_values (
    spec_item_id TEXT NOT NULL,
    campaign_variant_id TEXT NOT NULL,
    numeric_value REAL,
    text_value TEXT,
    unit TEXT,
    confidence REAL NOT NULL,
    source_document_id TEXT,
    status TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (spec_item_id, campaign_variant_id)
);
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    product_id TEXT NOT NULL,
    campaign_variant_id TEXT,
    chunk_type TEXT NOT NULL,
    text TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    embedding_model TEXT NOT NULL,
    embedding_version INTEGER NOT NULL,
    completion_status TEXT NOT NULL,
    metadata_json TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS lineage (
    resource_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    action TEXT NOT NULL,
    document_source_id TEXT,
    occurred_at TEXT NOT NULL
);
"#;

fn parse_data_type(raw: &str) -> SpecDataType {
    match raw {
        "numeric" => SpecDataType::Numeric,
        "boolean" => SpecDataType::Boolean,
        _ => SpecDataType::Text,
    }
}

fn data_type_str(t: SpecDataType) -> &'static str {
    match t {
        SpecDataType::Numeric => "numeric",
        SpecDataType::Text => "text",
        SpecDataType::Boolean => "boolean",
    }
}

fn status_str(s: SpecValueStatus) -> &'static str {
    match s {
        SpecValueStatus::Ok => "ok",
        SpecValueStatus::Conflict => "conflict",
    }
}

fn parse_status(raw: &str) -> SpecValueStatus {
    if raw == "conflict" {
        SpecValueStatus::Conflict
    } else {
        SpecValueStatus::Ok
    }
}

fn chunk_type_str(t: ChunkType) -> &'static str {
    match t {
        ChunkType::SpecRow => "spec_row",
        ChunkType::Feature => "feature",
        ChunkType::Usp => "usp",
        ChunkType::Narrative => "narrative",
    }
}

fn parse_chunk_type(raw: &str) -> ChunkType {
    match raw {
        "feature" => ChunkType::Feature,
        "usp" => ChunkType::Usp,
        "narrative" => ChunkType::Narrative,
        _ => ChunkType::SpecRow,
    }
}

fn completion_str(c: CompletionStatus) -> &'static str {
    match c {
        CompletionStatus::Complete => "complete",
        CompletionStatus::EmbeddingFailed => "embedding_failed",
    }
}

fn parse_completion(raw: &str) -> CompletionStatus {
    if raw == "complete" {
        CompletionStatus::Complete
    } else {
        CompletionStatus::EmbeddingFailed
    }
}

fn chunk_from_row(row: &sqlx::any::AnyRow) -> PkeResult<KnowledgeChunk> {
    let id: String = row.try_get("id")?;
    let campaign_variant_id: Option<String> = row.try_get("campaign_variant_id")?;
    let metadata_json: String = row.try_get("metadata_json")?;
    let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)?;

    Ok(KnowledgeChunk {
        id: Uuid::parse_str(&id).map_err(|e| PkeError::Storage(e.to_string()))?,
        tenant_id: parse_uuid_col(row, "tenant_id")?,
        product_id: parse_uuid_col(row, "product_id")?,
        campaign_variant_id: campaign_variant_id
            .map(|s| Uuid::parse_str(&s).map_err(|e| PkeError::Storage(e.to_string())))
            .transpose()?,
        chunk_type: parse_chunk_type(&row.try_get::<String, _>("chunk_type")?),
        text: row.try_get("text")?,
        content_hash: row.try_get("content_hash")?,
        embedding: None,
        embedding_model: row.try_get("embedding_model")?,
        embedding_version: row.try_get::<i64, _>("embedding_version")? as u32,
        completion_status: parse_completion(&row.try_get::<String, _>("completion_status")?),
        metadata,
    })
}

fn parse_uuid_col(row: &sqlx::any::AnyRow, col: &str) -> PkeResult<Uuid> {
    let raw: String = row
        .try_get(col)
        .map_err(|e| PkeError::Storage(e.to_string()))?;
    Uuid::parse_str(&raw).map_err(|e| PkeError::Storage(e.to_string()))
}

#[async_trait]
impl FactStore for SqlxFactStore {
    async fn find_spec_values(&self, filter: &SpecValueFilter) -> PkeResult<Vec<SpecValue>> {
        // Portable-subset query: filter in Rust after a broad fetch rather
        // than building a dynamic WHERE clause per backend dialect.
        let rows = sqlx::query("SELECT * FROM spec_values")
            .fetch_all(&self.pool)
            .await?;

        let campaign_rows = sqlx::query("SELECT * FROM campaign_variants")
            .fetch_all(&self.pool)
            .await?;
        let variants: Vec<CampaignVariant> = campaign_rows
            .iter()
            .map(campaign_from_row)
            .collect::<PkeResult<_>>()?;

        let mut out = Vec::new();
        for row in &rows {
            let spec_item_id = parse_uuid_col(row, "spec_item_id")?;
            let campaign_variant_id = parse_uuid_col(row, "campaign_variant_id")?;
            if !filter.spec_item_ids.is_empty() && !filter.spec_item_ids.contains(&spec_item_id) {
                continue;
            }
            if let Some(cv) = filter.campaign_variant_id {
                if cv != campaign_variant_id {
                    continue;
                }
            }
            let variant = variants.iter().find(|v| v.id == campaign_variant_id);
            if !filter.product_ids.is_empty() {
                let Some(v) = variant else { continue };
                if !filter.product_ids.contains(&v.product_id) {
                    continue;
                }
            }
            if filter.published_only {
                let Some(v) = variant else { continue };
                if v.is_draft {
                    continue;
                }
            }

            out.push(SpecValue {
                spec_item_id,
                campaign_variant_id,
                numeric_value: row.try_get("numeric_value").ok(),
                text_value: row.try_get("text_value").ok(),
                unit: row.try_get("unit").ok(),
                confidence: row.try_get("confidence")?,
                source_document_id: row
                    .try_get::<Option<String>, _>("source_document_id")?
                    .map(|s| Uuid::parse_str(&s))
                    .transpose()
                    .map_err(|e| PkeError::Storage(e.to_string()))?,
                status: parse_status(&row.try_get::<String, _>("status")?),
                updated_at: row
                    .try_get::<String, _>("updated_at")?
                    .parse::<DateTime<Utc>>()
                    .map_err(|e| PkeError::Storage(e.to_string()))?,
            });
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn upsert_spec_values(&self, values: Vec<SpecValue>) -> PkeResult<()> {
        for v in values {
            sqlx::query(
                "DELETE FROM spec_values WHERE spec_item_id = ? AND campaign_variant_id = ?",
            )
            .bind(v.spec_item_id.to_string())
            .bind(v.campaign_variant_id.to_string())
            .execute(&self.pool)
            .await?;

            sqlx::query(
                "INSERT INTO spec_values (spec_item_id, campaign_variant_id, numeric_value, \
                 text_value, unit, confidence, source_document_id, status, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(v.spec_item_id.to_string())
            .bind(v.campaign_variant_id.to_string())
            .bind(v.numeric_value)
            .bind(v.text_value)
            .bind(v.unit)
            .bind(v.confidence)
            .bind(v.source_document_id.map(|d| d.to_string()))
            .bind(status_str(v.status))
            .bind(v.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn find_spec_item_by_name(&self, canonical_name: &str) -> PkeResult<Option<SpecItem>> {
        let row = sqlx::query("SELECT * FROM spec_items WHERE display_name = ?")
            .bind(canonical_name)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(SpecItem {
            id: parse_uuid_col(&row, "id")?,
            category: row.try_get("category")?,
            display_name: row.try_get("display_name")?,
            unit: row.try_get("unit").ok(),
            data_type: parse_data_type(&row.try_get::<String, _>("data_type")?),
            validation_rule: row.try_get("validation_rule").ok(),
        }))
    }

    async fn list_spec_items(&self) -> PkeResult<Vec<SpecItem>> {
        let rows = sqlx::query("SELECT * FROM spec_items")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(SpecItem {
                    id: parse_uuid_col(row, "id")?,
                    category: row.try_get("category")?,
                    display_name: row.try_get("display_name")?,
                    unit: row.try_get("unit").ok(),
                    data_type: parse_data_type(&row.try_get::<String, _>("data_type")?),
                    validation_rule: row.try_get("validation_rule").ok(),
                })
            })
            .collect()
    }

    async fn upsert_spec_item(&self, item: SpecItem) -> PkeResult<()> {
        sqlx::query("DELETE FROM spec_items WHERE id = ?")
            .bind(item.id.to_string())
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "INSERT INTO spec_items (id, category, display_name, unit, data_type, \
             validation_rule) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(item.id.to_string())
        .bind(item.category)
        .bind(item.display_name)
        .bind(item.unit)
        .bind(data_type_str(item.data_type))
        .bind(item.validation_rule)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_campaign_version(
        &self,
        campaign_variant_id: CampaignVariantId,
    ) -> PkeResult<Option<CampaignVariant>> {
        let row = sqlx::query("SELECT * FROM campaign_variants WHERE id = ?")
            .bind(campaign_variant_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(campaign_from_row).transpose()
    }

    async fn upsert_campaign_variant(&self, variant: CampaignVariant) -> PkeResult<()> {
        sqlx::query("DELETE FROM campaign_variants WHERE id = ?")
            .bind(variant.id.to_string())
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "INSERT INTO campaign_variants (id, tenant_id, product_id, locale, trim, version, \
             is_draft, effective_from, effective_through) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(variant.id.to_string())
        .bind(variant.tenant_id.to_string())
        .bind(variant.product_id.to_string())
        .bind(variant.locale)
        .bind(variant.trim)
        .bind(variant.version as i64)
        .bind(i64::from(variant.is_draft))
        .bind(variant.effective_from.map(|d| d.to_rfc3339()))
        .bind(variant.effective_through.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn promote_version(
        &self,
        campaign_variant_id: CampaignVariantId,
        effective_from: DateTime<Utc>,
    ) -> PkeResult<CampaignVariant> {
        let target = self
            .get_campaign_version(campaign_variant_id)
            .await?
            .ok_or_else(|| PkeError::validation("unknown campaign variant"))?;

        let rows = sqlx::query(
            "SELECT * FROM campaign_variants WHERE product_id = ? AND locale = ? AND trim = ? \
             AND is_draft = 0 AND effective_through IS NULL",
        )
        .bind(target.product_id.to_string())
        .bind(&target.locale)
        .bind(&target.trim)
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let predecessor = campaign_from_row(row)?;
            if predecessor.id != target.id {
                self.upsert_campaign_variant(CampaignVariant {
                    effective_through: Some(effective_from),
                    ..predecessor
                })
                .await?;
            }
        }

        let promoted = CampaignVariant {
            is_draft: false,
            effective_from: Some(effective_from),
            ..target
        };
        self.upsert_campaign_variant(promoted.clone()).await?;
        Ok(promoted)
    }

    async fn find_chunk_by_content_hash(
        &self,
        tenant_id: TenantId,
        content_hash: &str,
    ) -> PkeResult<Option<KnowledgeChunk>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE tenant_id = ? AND content_hash = ?")
            .bind(tenant_id.to_string())
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(chunk_from_row).transpose()
    }

    async fn find_incomplete_chunks(&self, tenant_id: TenantId) -> PkeResult<Vec<KnowledgeChunk>> {
        let rows = sqlx::query(
            "SELECT * FROM chunks WHERE tenant_id = ? AND completion_status = 'embedding_failed'",
        )
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn find_chunks_by_tenant(&self, tenant_id: TenantId) -> PkeResult<Vec<KnowledgeChunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE tenant_id = ?")
            .bind(tenant_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn upsert_chunks(&self, chunks: Vec<KnowledgeChunk>) -> PkeResult<()> {
        for chunk in chunks {
            let metadata_json = serde_json::to_string(&chunk.metadata)?;
            sqlx::query("DELETE FROM chunks WHERE id = ?")
                .bind(chunk.id.to_string())
                .execute(&self.pool)
                .await?;
            sqlx::query(
                "INSERT INTO chunks (id, tenant_id, product_id, campaign_variant_id, \
                 chunk_type, text, content_hash, embedding_model, embedding_version, \
                 completion_status, metadata_json) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(chunk.id.to_string())
            .bind(chunk.tenant_id.to_string())
            .bind(chunk.product_id.to_string())
            .bind(chunk.campaign_variant_id.map(|c| c.to_string()))
            .bind(chunk_type_str(chunk.chunk_type))
            .bind(chunk.text)
            .bind(chunk.content_hash)
            .bind(chunk.embedding_model)
            .bind(i64::from(chunk.embedding_version))
            .bind(completion_str(chunk.completion_status))
            .bind(metadata_json)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn update_chunk_metadata(
        &self,
        chunk_id: Uuid,
        document_source_id: DocumentSourceId,
    ) -> PkeResult<()> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(chunk_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PkeError::validation("unknown chunk id"))?;
        let mut chunk = chunk_from_row(&row)?;
        if !chunk.metadata.parsed_spec_ids.contains(&document_source_id) {
            chunk.metadata.parsed_spec_ids.push(document_source_id);
        }
        self.upsert_chunks(vec![chunk]).await
    }

    async fn get_chunk(&self, chunk_id: Uuid) -> PkeResult<Option<KnowledgeChunk>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(chunk_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(chunk_from_row).transpose()
    }

    async fn delete_chunks_by_campaign(
        &self,
        campaign_variant_id: CampaignVariantId,
    ) -> PkeResult<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE campaign_variant_id = ?")
            .bind(campaign_variant_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn record_lineage(&self, entry: LineageEntry) -> PkeResult<()> {
        sqlx::query(
            "INSERT INTO lineage (resource_type, resource_id, action, document_source_id, \
             occurred_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entry.resource_type)
        .bind(entry.resource_id.to_string())
        .bind(entry.action)
        .bind(entry.document_source_id.map(|d| d.to_string()))
        .bind(entry.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_lineage(
        &self,
        _tenant_id: TenantId,
        resource_type: &str,
        resource_id: Uuid,
    ) -> PkeResult<Vec<LineageEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM lineage WHERE resource_type = ? AND resource_id = ? \
             ORDER BY occurred_at DESC",
        )
        .bind(resource_type)
        .bind(resource_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LineageEntry {
                    resource_type: row.try_get("resource_type")?,
                    resource_id: parse_uuid_col(row, "resource_id")?,
                    action: row.try_get("action")?,
                    document_source_id: row
                        .try_get::<Option<String>, _>("document_source_id")?
                        .map(|s| Uuid::parse_str(&s))
                        .transpose()
                        .map_err(|e| PkeError::Storage(e.to_string()))?,
                    occurred_at: row
                        .try_get::<String, _>("occurred_at")?
                        .parse::<DateTime<Utc>>()
                        .map_err(|e| PkeError::Storage(e.to_string()))?,
                })
            })
            .collect()
    }
}

fn campaign_from_row(row: &sqlx::any::AnyRow) -> PkeResult<CampaignVariant> {
    Ok(CampaignVariant {
        id: parse_uuid_col(row, "id")?,
        tenant_id: parse_uuid_col(row, "tenant_id")?,
        product_id: parse_uuid_col(row, "product_id")?,
        locale: row.try_get("locale")?,
        trim: row.try_get("trim")?,
        version: row.try_get::<i64, _>("version")? as u64,
        is_draft: row.try_get::<i64, _>("is_draft")? != 0,
        effective_from: row
            .try_get::<Option<String>, _>("effective_from")?
            .map(|s| s.parse::<DateTime<Utc>>())
            .transpose()
            .map_err(|e| PkeError::Storage(e.to_string()))?,
        effective_through: row
            .try_get::<Option<String>, _>("effective_through")?
            .map(|s| s.parse::<DateTime<Utc>>())
            .transpose()
            .map_err(|e| PkeError::Storage(e.to_string()))?,
    })
}
