//! The `VectorIndex` port: filtered approximate k-NN over chunks.
//!
//! The trait shape and in-process implementation are grounded in
//! `wg-ragsmith/src/stores/mod.rs`'s `Backend` trait, adapted from a single
//! fixed `chunks` table keyed by URL to the tenant/product/campaign/
//! chunk-type filter model this spec requires. [`sqlite`] holds the
//! `sqlite-vec`-backed, server-class implementation.

#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{CampaignVariantId, ChunkId, ChunkType, ProductId, TenantId};
use crate::error::PkeResult;

/// A vector plus the chunk identifier and metadata needed to filter/score
/// it, without the full `KnowledgeChunk` text payload.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub chunk_id: ChunkId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub campaign_variant_id: Option<CampaignVariantId>,
    pub chunk_type: ChunkType,
    pub vector: Vec<f32>,
}

/// Conjunctive filter applied before ranking. `tenant_id` is mandatory;
/// every other predicate is optional and narrows the scope further.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub tenant_id: TenantId,
    pub product_ids: Vec<ProductId>,
    pub campaign_variant_id: Option<CampaignVariantId>,
    pub chunk_types: Vec<ChunkType>,
}

impl SearchFilter {
    #[must_use]
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            ..Default::default()
        }
    }

    fn matches(&self, entry: &VectorEntry) -> bool {
        entry.tenant_id == self.tenant_id
            && (self.product_ids.is_empty() || self.product_ids.contains(&entry.product_id))
            && self
                .campaign_variant_id
                .is_none_or(|c| entry.campaign_variant_id == Some(c))
            && (self.chunk_types.is_empty() || self.chunk_types.contains(&entry.chunk_type))
    }
}

/// One scored search hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    pub score: f32,
}

/// Scope used by `clear`: everything for a tenant, or narrower.
#[derive(Debug, Clone)]
pub enum ClearScope {
    Tenant(TenantId),
    Product(TenantId, ProductId),
    Campaign(CampaignVariantId),
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Appends or overwrites entries keyed by chunk id. Entries whose
    /// vector length doesn't match the adapter's authoritative dimension
    /// are silently skipped (logged at `warn`), never erroring the call.
    async fn insert(&self, entries: Vec<VectorEntry>) -> PkeResult<()>;

    /// Returns up to `k` entries matching `filter`, scored by inner product
    /// over ℓ2-normalized vectors, descending, ties broken by chunk id. If
    /// `query.len()` doesn't match the adapter's authoritative dimension,
    /// returns an empty list rather than an error.
    async fn search(&self, query: &[f32], k: usize, filter: &SearchFilter) -> PkeResult<Vec<ScoredChunk>>;

    async fn remove(&self, ids: &[ChunkId]) -> PkeResult<()>;
    async fn clear(&self, scope: ClearScope) -> PkeResult<()>;

    /// The dimension recorded from the first inserted vector, if any.
    fn authoritative_dimension(&self) -> Option<usize>;
}

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

struct Inner {
    entries: Vec<VectorEntry>,
    dimension: Option<usize>,
}

/// Embedded, in-process adapter: the "dev" backend. Holds every vector in
/// memory behind a single read-mostly lock (shared locks for search,
/// exclusive for insert/remove), matching `spec.md` §5's concurrency model.
pub struct InProcessVectorIndex {
    inner: RwLock<Inner>,
}

impl Default for InProcessVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessVectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: Vec::new(),
                dimension: None,
            }),
        }
    }
}

#[async_trait]
impl VectorIndex for InProcessVectorIndex {
    async fn insert(&self, entries: Vec<VectorEntry>) -> PkeResult<()> {
        let mut inner = self.inner.write();
        for entry in entries {
            let dim = *inner.dimension.get_or_insert(entry.vector.len());
            if entry.vector.len() != dim {
                tracing::warn!(
                    chunk_id = %entry.chunk_id,
                    expected = dim,
                    actual = entry.vector.len(),
                    "rejecting vector with dimension drift"
                );
                continue;
            }
            let normalized = VectorEntry {
                vector: l2_normalize(&entry.vector),
                ..entry
            };
            if let Some(pos) = inner
                .entries
                .iter()
                .position(|e| e.chunk_id == normalized.chunk_id)
            {
                inner.entries[pos] = normalized;
            } else {
                inner.entries.push(normalized);
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> PkeResult<Vec<ScoredChunk>> {
        let inner = self.inner.read();
        let Some(dim) = inner.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dim {
            return Ok(Vec::new());
        }
        let normalized_query = l2_normalize(query);

        let mut scored: Vec<ScoredChunk> = inner
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| ScoredChunk {
                chunk_id: e.chunk_id,
                score: inner_product(&normalized_query, &e.vector),
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
        let mut inner = self.inner.write();
        inner.entries.retain(|e| !ids.contains(&e.chunk_id));
        Ok(())
    }

    async fn clear(&self, scope: ClearScope) -> PkeResult<()> {
        let mut inner = self.inner.write();
        match scope {
            ClearScope::Tenant(t) => inner.entries.retain(|e| e.tenant_id != t),
            ClearScope::Product(t, p) => {
                inner.entries.retain(|e| !(e.tenant_id == t && e.product_id == p));
            }
            ClearScope::Campaign(c) => {
                inner.entries.retain(|e| e.campaign_variant_id != Some(c));
            }
        }
        Ok(())
    }

    fn authoritative_dimension(&self) -> Option<usize> {
        self.inner.read().dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(tenant: TenantId, product: ProductId, dim: usize, seed: f32) -> VectorEntry {
        VectorEntry {
            chunk_id: Uuid::new_v4(),
            tenant_id: tenant,
            product_id: product,
            campaign_variant_id: None,
            chunk_type: ChunkType::SpecRow,
            vector: (0..dim).map(|i| seed + i as f32).collect(),
        }
    }

    #[tokio::test]
    async fn search_respects_tenant_scope() {
        let index = InProcessVectorIndex::new();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let product = Uuid::new_v4();
        let e_a = entry(tenant_a, product, 4, 1.0);
        let e_b = entry(tenant_b, product, 4, 1.0);
        index.insert(vec![e_a.clone(), e_b.clone()]).await.unwrap();

        let hits = index
            .search(&[1.0, 2.0, 3.0, 4.0], 10, &SearchFilter::new(tenant_a))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, e_a.chunk_id);
    }

    #[tokio::test]
    async fn dimension_mismatch_returns_empty_not_error() {
        let index = InProcessVectorIndex::new();
        let tenant = Uuid::new_v4();
        let product = Uuid::new_v4();
        index.insert(vec![entry(tenant, product, 768, 0.1)]).await.unwrap();

        let hits = index
            .search(&vec![0.5; 3072], 5, &SearchFilter::new(tenant))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn dimension_drift_on_insert_is_rejected_silently() {
        let index = InProcessVectorIndex::new();
        let tenant = Uuid::new_v4();
        let product = Uuid::new_v4();
        index.insert(vec![entry(tenant, product, 4, 0.1)]).await.unwrap();
        let drifted = entry(tenant, product, 8, 0.1);
        index.insert(vec![drifted]).await.unwrap();
        assert_eq!(index.authoritative_dimension(), Some(4));
    }

    #[tokio::test]
    async fn search_is_monotonic_in_k() {
        let index = InProcessVectorIndex::new();
        let tenant = Uuid::new_v4();
        let product = Uuid::new_v4();
        for i in 0..10 {
            index
                .insert(vec![entry(tenant, product, 4, i as f32)])
                .await
                .unwrap();
        }
        let filter = SearchFilter::new(tenant);
        let small = index.search(&[1.0, 2.0, 3.0, 4.0], 3, &filter).await.unwrap();
        let big = index.search(&[1.0, 2.0, 3.0, 4.0], 7, &filter).await.unwrap();
        let small_ids: std::collections::HashSet<_> = small.iter().map(|s| s.chunk_id).collect();
        let big_ids: std::collections::HashSet<_> = big.iter().map(|s| s.chunk_id).collect();
        assert!(small_ids.is_subset(&big_ids));
    }
}
