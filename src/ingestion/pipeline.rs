//! The ingestion pipeline: `parse → dedupe-by-content-hash → embed-batch →
//! persist → version-bump`. Grounded directly in
//! `wg-ragsmith/src/ingestion/mod.rs` + `chunk.rs`'s staged-pipeline shape.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{
    CampaignVariantId, ChunkMetadata, ChunkType, CompletionStatus, DocumentSourceId,
    KnowledgeChunk, ProductId, SpecDataType, SpecItem, SpecValue, SpecValueStatus, TenantId,
};
use crate::embedder::{EmbedOutcome, Embedder, EmbeddingBatcher};
use crate::error::PkeResult;
use crate::parser::{parse_document, row_metadata, Frontmatter, ParseWarning, ParsedSpecRow};
use crate::repository::FactStore;
use crate::vector_index::{VectorEntry, VectorIndex};

/// Status of a completed ingest job, as returned by the `ingest` entry
/// point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed,
}

/// Outcome of one `ingest` call.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub chunks_inserted: usize,
    pub chunks_deduped: usize,
    pub chunks_embedding_failed: usize,
    pub warnings: Vec<ParseWarning>,
}

/// Sequences `parse → dedupe → embed-batch → persist` for one markdown
/// document against a single `(tenant, product, campaign)` scope.
pub struct IngestionPipeline {
    fact_store: Arc<dyn FactStore>,
    vector_index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    batcher: EmbeddingBatcher,
}

impl IngestionPipeline {
    #[must_use]
    pub fn new(
        fact_store: Arc<dyn FactStore>,
        vector_index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Self {
        Self {
            fact_store,
            vector_index,
            embedder,
            batcher: EmbeddingBatcher::new(batch_size),
        }
    }

    /// Finds or registers the canonical `SpecItem` for a parsed row (global
    /// across tenants, per `spec.md` §3), then builds the `SpecValue` this
    /// ingest contributes for it. Confidence is 1.0: the value comes
    /// straight from a brochure table cell, not an inferred/fuzzy match.
    async fn resolve_spec_value(
        &self,
        row: &ParsedSpecRow,
        campaign_variant_id: CampaignVariantId,
        document_source_id: DocumentSourceId,
    ) -> PkeResult<SpecValue> {
        let spec_item_id = match self.fact_store.find_spec_item_by_name(&row.name).await? {
            Some(existing) => existing.id,
            None => {
                let item = SpecItem {
                    id: Uuid::new_v4(),
                    category: row.category.clone(),
                    display_name: row.name.clone(),
                    unit: row.unit.clone(),
                    data_type: if row.value.trim().parse::<f64>().is_ok() {
                        SpecDataType::Numeric
                    } else {
                        SpecDataType::Text
                    },
                    validation_rule: None,
                };
                let id = item.id;
                self.fact_store.upsert_spec_item(item).await?;
                id
            }
        };

        let trimmed = row.value.trim();
        let (numeric_value, text_value) = match trimmed.parse::<f64>() {
            Ok(n) => (Some(n), None),
            Err(_) => (None, Some(trimmed.to_string())),
        };

        Ok(SpecValue {
            spec_item_id,
            campaign_variant_id,
            numeric_value,
            text_value,
            unit: row.unit.clone(),
            confidence: 1.0,
            source_document_id: Some(document_source_id),
            status: SpecValueStatus::Ok,
            updated_at: Utc::now(),
        })
    }

    /// Ingests one markdown document. All pages failing to parse (i.e. the
    /// document yields zero spec rows and zero bullets) reports `Failed`
    /// with no partial writes; otherwise rows are deduped by content hash,
    /// embedded, and persisted.
    pub async fn ingest(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        campaign_variant_id: CampaignVariantId,
        document_source_id: DocumentSourceId,
        markdown: &str,
        frontmatter: Frontmatter,
    ) -> PkeResult<IngestReport> {
        let job_id = Uuid::new_v4();
        let parsed = parse_document(markdown, frontmatter);

        if parsed.is_empty() {
            return Ok(IngestReport {
                job_id,
                status: JobStatus::Failed,
                chunks_inserted: 0,
                chunks_deduped: 0,
                chunks_embedding_failed: 0,
                warnings: parsed.warnings,
            });
        }

        let mut new_chunks = Vec::new();
        let mut deduped = 0usize;
        let mut spec_values = Vec::with_capacity(parsed.spec_rows.len());

        for row in &parsed.spec_rows {
            spec_values.push(
                self.resolve_spec_value(row, campaign_variant_id, document_source_id)
                    .await?,
            );

            if let Some(existing) = self
                .fact_store
                .find_chunk_by_content_hash(tenant_id, &row.content_hash)
                .await?
            {
                self.fact_store
                    .update_chunk_metadata(existing.id, document_source_id)
                    .await?;
                deduped += 1;
                continue;
            }

            new_chunks.push((
                row.canonical_text.clone(),
                ChunkType::SpecRow,
                row_metadata(row, None),
            ));
        }

        if !spec_values.is_empty() {
            self.fact_store.upsert_spec_values(spec_values).await?;
        }

        for bullet in &parsed.bullets {
            let content_hash = KnowledgeChunk::hash_text(&bullet.body);
            if let Some(existing) = self
                .fact_store
                .find_chunk_by_content_hash(tenant_id, &content_hash)
                .await?
            {
                self.fact_store
                    .update_chunk_metadata(existing.id, document_source_id)
                    .await?;
                deduped += 1;
                continue;
            }
            new_chunks.push((
                bullet.body.clone(),
                if bullet.is_usp { ChunkType::Usp } else { ChunkType::Feature },
                ChunkMetadata {
                    category: Some(bullet.section.clone()),
                    ..Default::default()
                },
            ));
        }

        let texts: Vec<String> = new_chunks.iter().map(|(text, ..)| text.clone()).collect();
        let outcomes = self.batcher.embed_all(self.embedder.as_ref(), &texts).await?;

        let mut embedding_failed = 0usize;
        let mut to_persist = Vec::with_capacity(new_chunks.len());
        let mut vector_entries = Vec::new();
        for ((text, chunk_type, mut metadata), outcome) in new_chunks.into_iter().zip(outcomes) {
            metadata.parsed_spec_ids.push(document_source_id);
            let content_hash = KnowledgeChunk::hash_text(&text);
            let chunk_id = Uuid::new_v4();
            let (embedding, completion_status) = match outcome {
                EmbedOutcome::Vector(v) => {
                    vector_entries.push(VectorEntry {
                        chunk_id,
                        tenant_id,
                        product_id,
                        campaign_variant_id: Some(campaign_variant_id),
                        chunk_type,
                        vector: v.clone(),
                    });
                    (Some(v), CompletionStatus::Complete)
                }
                EmbedOutcome::Failed(_) => {
                    embedding_failed += 1;
                    (None, CompletionStatus::EmbeddingFailed)
                }
            };
            to_persist.push(KnowledgeChunk {
                id: chunk_id,
                tenant_id,
                product_id,
                campaign_variant_id: Some(campaign_variant_id),
                chunk_type,
                text,
                content_hash,
                embedding,
                embedding_model: self.embedder.model_id().to_string(),
                embedding_version: 1,
                completion_status,
                metadata,
            });
        }

        let inserted = to_persist.len();
        self.fact_store.upsert_chunks(to_persist).await?;
        if !vector_entries.is_empty() {
            self.vector_index.insert(vector_entries).await?;
        }
        self.fact_store
            .record_lineage(crate::domain::LineageEntry {
                resource_type: "campaign_variant".to_string(),
                resource_id: campaign_variant_id,
                action: "ingest".to_string(),
                document_source_id: Some(document_source_id),
                occurred_at: Utc::now(),
            })
            .await?;

        Ok(IngestReport {
            job_id,
            status: JobStatus::Succeeded,
            chunks_inserted: inserted,
            chunks_deduped: deduped,
            chunks_embedding_failed: embedding_failed,
            warnings: parsed.warnings,
        })
    }

    /// Atomically promotes a campaign variant: flips `is_draft=false` and
    /// rolls `effective_from`/`effective_through` across the version chain.
    /// Refuses to publish while any spec value for the campaign has
    /// `status = conflict`.
    pub async fn publish(
        &self,
        campaign_variant_id: CampaignVariantId,
    ) -> PkeResult<crate::domain::CampaignVariant> {
        let conflicts = self
            .fact_store
            .find_spec_values(&crate::repository::SpecValueFilter {
                campaign_variant_id: Some(campaign_variant_id),
                ..Default::default()
            })
            .await?
            .into_iter()
            .any(|v| v.status == crate::domain::SpecValueStatus::Conflict);

        if conflicts {
            return Err(crate::error::PkeError::validation(
                "cannot publish a campaign variant with conflicting spec values",
            ));
        }

        let effective_from = Utc::now();
        let promoted = self
            .fact_store
            .promote_version(campaign_variant_id, effective_from)
            .await?;

        self.fact_store
            .record_lineage(crate::domain::LineageEntry {
                resource_type: "campaign_variant".to_string(),
                resource_id: campaign_variant_id,
                action: "publish".to_string(),
                document_source_id: None,
                occurred_at: effective_from,
            })
            .await?;

        Ok(promoted)
    }
}
