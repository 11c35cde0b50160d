//! In-process `FactStore` implementation. The dev/test default, and the
//! fallback the in-memory integration tests exercise the router against.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::{
    CampaignVariant, CampaignVariantId, DocumentSourceId, KnowledgeChunk, LineageEntry, ProductId,
    SpecItem, SpecValue, TenantId,
};
use crate::error::{PkeError, PkeResult};

use super::{FactStore, SpecValueFilter};

#[derive(Default)]
struct Tables {
    spec_items: HashMap<Uuid, SpecItem>,
    spec_values: Vec<SpecValue>,
    campaign_variants: HashMap<CampaignVariantId, CampaignVariant>,
    chunks: HashMap<Uuid, KnowledgeChunk>,
    lineage: Vec<LineageEntry>,
}

/// Single-process, lock-guarded `FactStore`. Not persisted across restarts.
#[derive(Default)]
pub struct MemoryFactStore {
    tables: RwLock<Tables>,
}

impl MemoryFactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FactStore for MemoryFactStore {
    async fn find_spec_values(&self, filter: &SpecValueFilter) -> PkeResult<Vec<SpecValue>> {
        let tables = self.tables.read();
        let mut out: Vec<SpecValue> = tables
            .spec_values
            .iter()
            .filter(|sv| {
                let variant = tables.campaign_variants.get(&sv.campaign_variant_id);
                let tenant_ok = filter
                    .tenant_id
                    .is_none_or(|t| variant.is_some_and(|v| v.tenant_id == t));
                let product_ok = filter.product_ids.is_empty()
                    || variant.is_some_and(|v| filter.product_ids.contains(&v.product_id));
                let campaign_ok = filter
                    .campaign_variant_id
                    .is_none_or(|c| sv.campaign_variant_id == c);
                let spec_ok = filter.spec_item_ids.is_empty()
                    || filter.spec_item_ids.contains(&sv.spec_item_id);
                let published_ok = !filter.published_only
                    || variant.is_some_and(|v| !v.is_draft);
                tenant_ok && product_ok && campaign_ok && spec_ok && published_ok
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn upsert_spec_values(&self, values: Vec<SpecValue>) -> PkeResult<()> {
        let mut tables = self.tables.write();
        for value in values {
            if let Some(existing) = tables.spec_values.iter_mut().find(|sv| {
                sv.spec_item_id == value.spec_item_id
                    && sv.campaign_variant_id == value.campaign_variant_id
            }) {
                *existing = value;
            } else {
                tables.spec_values.push(value);
            }
        }
        Ok(())
    }

    async fn find_spec_item_by_name(&self, canonical_name: &str) -> PkeResult<Option<SpecItem>> {
        Ok(self
            .tables
            .read()
            .spec_items
            .values()
            .find(|s| s.display_name.eq_ignore_ascii_case(canonical_name))
            .cloned())
    }

    async fn upsert_spec_item(&self, item: SpecItem) -> PkeResult<()> {
        self.tables.write().spec_items.insert(item.id, item);
        Ok(())
    }

    async fn list_spec_items(&self) -> PkeResult<Vec<SpecItem>> {
        Ok(self.tables.read().spec_items.values().cloned().collect())
    }

    async fn get_campaign_version(
        &self,
        campaign_variant_id: CampaignVariantId,
    ) -> PkeResult<Option<CampaignVariant>> {
        Ok(self
            .tables
            .read()
            .campaign_variants
            .get(&campaign_variant_id)
            .cloned())
    }

    async fn upsert_campaign_variant(&self, variant: CampaignVariant) -> PkeResult<()> {
        self.tables
            .write()
            .campaign_variants
            .insert(variant.id, variant);
        Ok(())
    }

    async fn promote_version(
        &self,
        campaign_variant_id: CampaignVariantId,
        effective_from: DateTime<Utc>,
    ) -> PkeResult<CampaignVariant> {
        let mut tables = self.tables.write();
        let target = tables
            .campaign_variants
            .get(&campaign_variant_id)
            .cloned()
            .ok_or_else(|| PkeError::validation("unknown campaign variant"))?;

        let predecessor_id = tables
            .campaign_variants
            .values()
            .find(|v| {
                v.id != target.id
                    && v.product_id == target.product_id
                    && v.locale == target.locale
                    && v.trim == target.trim
                    && !v.is_draft
                    && v.effective_through.is_none()
            })
            .map(|v| v.id);

        if let Some(pred_id) = predecessor_id {
            if let Some(pred) = tables.campaign_variants.get_mut(&pred_id) {
                pred.effective_through = Some(effective_from);
            }
        }

        let variant = tables.campaign_variants.get_mut(&campaign_variant_id).unwrap();
        variant.is_draft = false;
        variant.effective_from = Some(effective_from);
        Ok(variant.clone())
    }

    async fn find_chunk_by_content_hash(
        &self,
        tenant_id: TenantId,
        content_hash: &str,
    ) -> PkeResult<Option<KnowledgeChunk>> {
        Ok(self
            .tables
            .read()
            .chunks
            .values()
            .find(|c| c.tenant_id == tenant_id && c.content_hash == content_hash)
            .cloned())
    }

    async fn find_incomplete_chunks(&self, tenant_id: TenantId) -> PkeResult<Vec<KnowledgeChunk>> {
        Ok(self
            .tables
            .read()
            .chunks
            .values()
            .filter(|c| {
                c.tenant_id == tenant_id
                    && c.completion_status == crate::domain::CompletionStatus::EmbeddingFailed
            })
            .cloned()
            .collect())
    }

    async fn find_chunks_by_tenant(&self, tenant_id: TenantId) -> PkeResult<Vec<KnowledgeChunk>> {
        Ok(self
            .tables
            .read()
            .chunks
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn upsert_chunks(&self, chunks: Vec<KnowledgeChunk>) -> PkeResult<()> {
        let mut tables = self.tables.write();
        for chunk in chunks {
            tables.chunks.insert(chunk.id, chunk);
        }
        Ok(())
    }

    async fn update_chunk_metadata(
        &self,
        chunk_id: Uuid,
        document_source_id: DocumentSourceId,
    ) -> PkeResult<()> {
        let mut tables = self.tables.write();
        let chunk = tables
            .chunks
            .get_mut(&chunk_id)
            .ok_or_else(|| PkeError::validation("unknown chunk id"))?;
        if !chunk.metadata.parsed_spec_ids.contains(&document_source_id) {
            chunk.metadata.parsed_spec_ids.push(document_source_id);
        }
        Ok(())
    }

    async fn get_chunk(&self, chunk_id: Uuid) -> PkeResult<Option<KnowledgeChunk>> {
        Ok(self.tables.read().chunks.get(&chunk_id).cloned())
    }

    async fn delete_chunks_by_campaign(
        &self,
        campaign_variant_id: CampaignVariantId,
    ) -> PkeResult<usize> {
        let mut tables = self.tables.write();
        let before = tables.chunks.len();
        tables
            .chunks
            .retain(|_, c| c.campaign_variant_id != Some(campaign_variant_id));
        Ok(before - tables.chunks.len())
    }

    async fn record_lineage(&self, entry: LineageEntry) -> PkeResult<()> {
        self.tables.write().lineage.push(entry);
        Ok(())
    }

    async fn get_lineage(
        &self,
        _tenant_id: TenantId,
        resource_type: &str,
        resource_id: Uuid,
    ) -> PkeResult<Vec<LineageEntry>> {
        Ok(self
            .tables
            .read()
            .lineage
            .iter()
            .filter(|e| e.resource_type == resource_type && e.resource_id == resource_id)
            .cloned()
            .collect())
    }
}
