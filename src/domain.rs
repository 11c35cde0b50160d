//! Domain entities and scoping keys.
//!
//! These types are backend-agnostic: repository and vector-index adapters
//! convert to/from their own wire shapes, but every module above the
//! storage tier speaks these types exclusively.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub type TenantId = Uuid;
pub type ProductId = Uuid;
pub type CampaignVariantId = Uuid;
pub type SpecItemId = Uuid;
pub type ChunkId = Uuid;
pub type DocumentSourceId = Uuid;

/// Owner of data. Externally provisioned; the core never deletes a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub plan_tier: String,
    pub policy_flags: BTreeMap<String, bool>,
}

/// Make/model within a tenant. `(tenant, product)` uniquely identifies a
/// product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub tenant_id: TenantId,
    pub segment: String,
    pub sharable_as_benchmark: bool,
}

/// Market/trim-specific slice of a product. At most one non-draft variant
/// per `(product, locale, trim)` is active at any wall-clock moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignVariant {
    pub id: CampaignVariantId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub locale: String,
    pub trim: String,
    pub version: u64,
    pub is_draft: bool,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_through: Option<DateTime<Utc>>,
}

/// Data type a `SpecItem`'s value must conform to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecDataType {
    Numeric,
    Text,
    Boolean,
}

/// Canonical leaf spec, e.g. "Fuel Economy". Global to the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecItem {
    pub id: SpecItemId,
    pub category: String,
    pub display_name: String,
    pub unit: Option<String>,
    pub data_type: SpecDataType,
    pub validation_rule: Option<String>,
}

/// Status of a stored spec value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecValueStatus {
    Ok,
    Conflict,
}

/// A concrete measurement of a `SpecItem` within a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecValue {
    pub spec_item_id: SpecItemId,
    pub campaign_variant_id: CampaignVariantId,
    pub numeric_value: Option<f64>,
    pub text_value: Option<String>,
    pub unit: Option<String>,
    pub confidence: f64,
    pub source_document_id: Option<DocumentSourceId>,
    pub status: SpecValueStatus,
    pub updated_at: DateTime<Utc>,
}

/// Marketing bullet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletType {
    Feature,
    Usp,
}

/// A single marketing bullet (feature block or USP).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureBlock {
    pub id: Uuid,
    pub campaign_variant_id: CampaignVariantId,
    pub bullet_type: BulletType,
    pub body: String,
    pub priority: u32,
    pub tags: Vec<String>,
    pub sharable: bool,
}

/// The kind of a `KnowledgeChunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    SpecRow,
    Feature,
    Usp,
    Narrative,
}

/// Whether a chunk has a usable embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Complete,
    EmbeddingFailed,
}

/// Free-form metadata carried on a chunk. Kept as a typed struct (rather
/// than a bag of `serde_json::Value`) because the fields it holds are fixed
/// by the wire contract; `parsed_spec_ids` accumulates one entry per source
/// document that contributed an identical row (content-hash dedupe).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub category: Option<String>,
    pub name: Option<String>,
    pub unit: Option<String>,
    pub source_page: Option<u32>,
    pub parsed_spec_ids: Vec<DocumentSourceId>,
    pub tags: Vec<String>,
}

/// The retrieval primitive. `content_hash` is globally unique; a chunk with
/// `completion_status = Complete` always carries a vector whose dimension
/// matches `embedding_model`'s declared dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: ChunkId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub campaign_variant_id: Option<CampaignVariantId>,
    pub chunk_type: ChunkType,
    pub text: String,
    pub content_hash: String,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: String,
    pub embedding_version: u32,
    pub completion_status: CompletionStatus,
    pub metadata: ChunkMetadata,
}

impl KnowledgeChunk {
    /// SHA-256 hex digest of `text`, matching the parser's canonicalization.
    #[must_use]
    pub fn hash_text(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Brochure ingest record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSource {
    pub id: DocumentSourceId,
    pub storage_uri: String,
    pub checksum: String,
    pub extractor_version: String,
    pub operator: String,
    pub processed_at: DateTime<Utc>,
}

/// Pre-computed product-vs-product row, only materialized when both sides
/// are sharable (or same-tenant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub dimension: String,
    pub left_product_id: ProductId,
    pub right_product_id: ProductId,
    pub left_value: Option<String>,
    pub right_value: Option<String>,
    pub unit: Option<String>,
}

/// A lineage entry as returned by `getLineage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEntry {
    pub resource_type: String,
    pub resource_id: Uuid,
    pub action: String,
    pub document_source_id: Option<DocumentSourceId>,
    pub occurred_at: DateTime<Utc>,
}

/// Per-requested-spec outcome in a structured-batch response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Found,
    Partial,
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_deterministic() {
        let a = KnowledgeChunk::hash_text("Category: Engine | Name: Power | Value: 90 | Unit: PS");
        let b = KnowledgeChunk::hash_text("Category: Engine | Name: Power | Value: 90 | Unit: PS");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_differs_on_content_change() {
        let a = KnowledgeChunk::hash_text("Value: 90");
        let b = KnowledgeChunk::hash_text("Value: 91");
        assert_ne!(a, b);
    }
}
