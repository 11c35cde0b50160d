//! The `FactStore` repository port: spec values, campaign versions, and the
//! canonical (non-vector) copy of chunks.
//!
//! Shaped after the teacher's `Backend` trait
//! (`wg-ragsmith/src/stores/mod.rs`) — one capability port, `async_trait`,
//! implementations swappable behind it. Two backends are pluggable per
//! `spec.md` §6: [`memory::MemoryFactStore`] (dev/embedded default) and
//! [`sqlx_store::SqlxFactStore`] (server-class, feature-gated).

pub mod memory;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod sqlx_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    CampaignVariant, CampaignVariantId, DocumentSourceId, KnowledgeChunk, LineageEntry, ProductId,
    SpecItem, SpecItemId, SpecValue, TenantId,
};
use crate::error::PkeResult;

/// Conjunctive filter over spec-value lookups, always tenant-scoped.
#[derive(Debug, Clone, Default)]
pub struct SpecValueFilter {
    pub tenant_id: Option<TenantId>,
    pub product_ids: Vec<ProductId>,
    pub campaign_variant_id: Option<CampaignVariantId>,
    pub spec_item_ids: Vec<SpecItemId>,
    /// Only published (non-draft) variants.
    pub published_only: bool,
}

/// Fact-store + chunk-record repository port. The router depends only on
/// this trait, never on a concrete backend.
#[async_trait]
pub trait FactStore: Send + Sync {
    async fn find_spec_values(&self, filter: &SpecValueFilter) -> PkeResult<Vec<SpecValue>>;
    async fn upsert_spec_values(&self, values: Vec<SpecValue>) -> PkeResult<()>;
    async fn find_spec_item_by_name(&self, canonical_name: &str) -> PkeResult<Option<SpecItem>>;
    async fn upsert_spec_item(&self, item: SpecItem) -> PkeResult<()>;
    /// All known spec items, global across tenants. Backs the
    /// Structured-Batch Path's fuzzy (token-overlap) name resolution tier.
    async fn list_spec_items(&self) -> PkeResult<Vec<SpecItem>>;

    async fn get_campaign_version(
        &self,
        campaign_variant_id: CampaignVariantId,
    ) -> PkeResult<Option<CampaignVariant>>;
    async fn upsert_campaign_variant(&self, variant: CampaignVariant) -> PkeResult<()>;
    /// Atomically flips `is_draft = false`, sets `effective_from`, and
    /// closes out the previously active variant for the same
    /// `(product, locale, trim)` by setting its `effective_through` to the
    /// new variant's `effective_from`.
    async fn promote_version(
        &self,
        campaign_variant_id: CampaignVariantId,
        effective_from: DateTime<Utc>,
    ) -> PkeResult<CampaignVariant>;

    async fn find_chunk_by_content_hash(
        &self,
        tenant_id: TenantId,
        content_hash: &str,
    ) -> PkeResult<Option<KnowledgeChunk>>;
    async fn find_incomplete_chunks(&self, tenant_id: TenantId) -> PkeResult<Vec<KnowledgeChunk>>;
    /// All chunks for a tenant regardless of `completion_status`. Backs the
    /// Hybrid Path's keyword-fallback scan, which must cover every in-scope
    /// chunk, not only ones still awaiting embedding.
    async fn find_chunks_by_tenant(&self, tenant_id: TenantId) -> PkeResult<Vec<KnowledgeChunk>>;
    async fn upsert_chunks(&self, chunks: Vec<KnowledgeChunk>) -> PkeResult<()>;
    async fn update_chunk_metadata(
        &self,
        chunk_id: uuid::Uuid,
        document_source_id: DocumentSourceId,
    ) -> PkeResult<()>;
    async fn get_chunk(&self, chunk_id: uuid::Uuid) -> PkeResult<Option<KnowledgeChunk>>;
    async fn delete_chunks_by_campaign(
        &self,
        campaign_variant_id: CampaignVariantId,
    ) -> PkeResult<usize>;

    async fn record_lineage(&self, entry: LineageEntry) -> PkeResult<()>;
    async fn get_lineage(
        &self,
        tenant_id: TenantId,
        resource_type: &str,
        resource_id: uuid::Uuid,
    ) -> PkeResult<Vec<LineageEntry>>;
}
