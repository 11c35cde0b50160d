//! Property tests for the invariants enumerated in `spec.md` §8: tenant
//! scoping, embedding-dimension agreement, content-hash uniqueness,
//! ingestion idempotence, and search monotonicity in `k`.
//!
//! Follows the async `proptest!` + `tokio::runtime::Runtime::block_on`
//! shape used for storage property tests in this corpus.

use std::sync::Arc;

use proptest::prelude::*;
use uuid::Uuid;

use pke_core::domain::{ChunkType, KnowledgeChunk};
use pke_core::ingestion::IngestionPipeline;
use pke_core::parser::Frontmatter;
use pke_core::repository::memory::MemoryFactStore;
use pke_core::repository::FactStore;
use pke_core::vector_index::{SearchFilter, VectorEntry, VectorIndex};
use pke_core::{embedder::MockEmbedder, vector_index::InProcessVectorIndex};

prop_compose! {
    fn arb_tenant_pair()(a in 0u32..1000, b in 0u32..1000) -> (Uuid, Uuid) {
        // Deterministic from the sampled integers so shrinking stays useful.
        (Uuid::from_u128(a as u128), Uuid::from_u128(b as u128 + 1_000_000))
    }
}

prop_compose! {
    fn arb_vector(dim: usize)(values in prop::collection::vec(-1.0f32..1.0, dim..=dim)) -> Vec<f32> {
        values
    }
}

prop_compose! {
    fn arb_spec_row()(
        category in "[A-Za-z][A-Za-z ]{1,18}[A-Za-z]",
        name in "[A-Za-z][A-Za-z ]{1,18}[A-Za-z]",
        value in 1.0f64..500.0,
        unit in "[a-z]{1,4}",
    ) -> (String, String, f64, String) {
        (category, name, value, unit)
    }
}

fn row_markdown(category: &str, name: &str, value: f64, unit: &str) -> String {
    format!("| {category} | {name} | {value:.2} | {unit} |\n")
}

proptest! {
    /// Invariant 1: a chunk inserted under tenant A is never returned by a
    /// content-hash lookup scoped to a different tenant B.
    #[test]
    fn tenant_scoping_never_leaks_across_tenants(
        (tenant_a, tenant_b) in arb_tenant_pair(),
        text in "[A-Za-z0-9 ]{5,80}",
    ) {
        prop_assume!(tenant_a != tenant_b);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let store = MemoryFactStore::new();
            let content_hash = KnowledgeChunk::hash_text(&text);
            let chunk = KnowledgeChunk {
                id: Uuid::new_v4(),
                tenant_id: tenant_a,
                product_id: Uuid::new_v4(),
                campaign_variant_id: None,
                chunk_type: ChunkType::Narrative,
                text: text.clone(),
                content_hash: content_hash.clone(),
                embedding: Some(vec![0.1, 0.2, 0.3]),
                embedding_model: "mock-embedder-v1".to_string(),
                embedding_version: 1,
                completion_status: pke_core::domain::CompletionStatus::Complete,
                metadata: Default::default(),
            };
            store.upsert_chunks(vec![chunk]).await.unwrap();

            let found_same_tenant = store.find_chunk_by_content_hash(tenant_a, &content_hash).await.unwrap();
            prop_assert!(found_same_tenant.is_some());

            let found_other_tenant = store.find_chunk_by_content_hash(tenant_b, &content_hash).await.unwrap();
            prop_assert!(found_other_tenant.is_none());
            Ok(())
        }).unwrap();
    }

    /// Invariant 1 (vector side): a search scoped to tenant A never surfaces
    /// an entry inserted under tenant B, regardless of how similar the
    /// vectors are.
    #[test]
    fn vector_search_never_crosses_tenant_boundary(
        (tenant_a, tenant_b) in arb_tenant_pair(),
        vector in arb_vector(4),
    ) {
        prop_assume!(tenant_a != tenant_b);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let index = InProcessVectorIndex::new();
            let product_id = Uuid::new_v4();
            index
                .insert(vec![VectorEntry {
                    chunk_id: Uuid::new_v4(),
                    tenant_id: tenant_b,
                    product_id,
                    campaign_variant_id: None,
                    chunk_type: ChunkType::Narrative,
                    vector: vector.clone(),
                }])
                .await
                .unwrap();

            let results = index
                .search(&vector, 10, &SearchFilter::new(tenant_a))
                .await
                .unwrap();
            prop_assert!(results.is_empty());
            Ok(())
        }).unwrap();
    }

    /// Invariant 2: every chunk the pipeline marks `Complete` carries an
    /// embedding whose length matches the embedder's declared dimension.
    #[test]
    fn completed_chunks_match_embedder_dimension(
        dim in 2usize..32,
        rows in prop::collection::vec(arb_spec_row(), 1..5),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let store = Arc::new(MemoryFactStore::new());
            let vector_index = Arc::new(InProcessVectorIndex::new());
            let embedder = Arc::new(MockEmbedder::new(dim));
            let tenant_id = Uuid::new_v4();
            let product_id = Uuid::new_v4();
            let campaign_id = Uuid::new_v4();
            let pipeline = IngestionPipeline::new(store.clone(), vector_index, embedder, 10);

            store
                .upsert_campaign_variant(pke_core::domain::CampaignVariant {
                    id: campaign_id,
                    tenant_id,
                    product_id,
                    locale: "en-IN".to_string(),
                    trim: "base".to_string(),
                    version: 1,
                    is_draft: true,
                    effective_from: None,
                    effective_through: None,
                })
                .await
                .unwrap();

            let mut md = String::new();
            for (category, name, value, unit) in &rows {
                md.push_str(&row_markdown(category, name, *value, unit));
            }

            pipeline
                .ingest(tenant_id, product_id, campaign_id, Uuid::new_v4(), &md, Frontmatter::default())
                .await
                .unwrap();

            let incomplete = store.find_incomplete_chunks(tenant_id).await.unwrap();
            prop_assert!(incomplete.is_empty(), "mock embedder never fails, so nothing should remain incomplete");
            Ok(())
        }).unwrap();
    }

    /// Invariant 3: content hash is a pure function of chunk text, so two
    /// chunks with identical text always collide on `content_hash`, and two
    /// chunks with different text (after trimming whitespace variation)
    /// never do.
    #[test]
    fn content_hash_is_a_pure_function_of_text(
        text_a in "[A-Za-z0-9 ]{5,80}",
        text_b in "[A-Za-z0-9 ]{5,80}",
    ) {
        let hash_a1 = KnowledgeChunk::hash_text(&text_a);
        let hash_a2 = KnowledgeChunk::hash_text(&text_a);
        prop_assert_eq!(&hash_a1, &hash_a2);

        if text_a != text_b {
            let hash_b = KnowledgeChunk::hash_text(&text_b);
            prop_assert_ne!(hash_a1, hash_b);
        }
    }

    /// Invariant 4: re-ingesting the same document never inserts a second
    /// chunk for an unchanged row; only `parsed_spec_ids` grows.
    #[test]
    fn reingesting_unchanged_document_is_idempotent(
        row in arb_spec_row(),
        reingest_count in 1usize..4,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let store = Arc::new(MemoryFactStore::new());
            let vector_index = Arc::new(InProcessVectorIndex::new());
            let embedder = Arc::new(MockEmbedder::new(8));
            let tenant_id = Uuid::new_v4();
            let product_id = Uuid::new_v4();
            let campaign_id = Uuid::new_v4();
            let pipeline = IngestionPipeline::new(store.clone(), vector_index, embedder, 10);

            store
                .upsert_campaign_variant(pke_core::domain::CampaignVariant {
                    id: campaign_id,
                    tenant_id,
                    product_id,
                    locale: "en-IN".to_string(),
                    trim: "base".to_string(),
                    version: 1,
                    is_draft: true,
                    effective_from: None,
                    effective_through: None,
                })
                .await
                .unwrap();

            let (category, name, value, unit) = &row;
            let md = row_markdown(category, name, *value, unit);

            let mut total_inserted = 0usize;
            let mut total_deduped = 0usize;
            for _ in 0..reingest_count {
                let report = pipeline
                    .ingest(tenant_id, product_id, campaign_id, Uuid::new_v4(), &md, Frontmatter::default())
                    .await
                    .unwrap();
                total_inserted += report.chunks_inserted;
                total_deduped += report.chunks_deduped;
            }

            prop_assert_eq!(total_inserted, 1, "only the first ingest should create a new chunk");
            prop_assert_eq!(total_deduped, reingest_count - 1);
            Ok(())
        }).unwrap();
    }

    /// Invariant 6: widening `k` never removes an entry that a narrower `k`
    /// already returned — the top-k prefix is stable as `k` grows.
    #[test]
    fn search_results_are_monotonic_in_k(
        entry_count in 3usize..12,
        k_small in 1usize..4,
        extra in 0usize..6,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let index = InProcessVectorIndex::new();
            let tenant_id = Uuid::new_v4();
            let product_id = Uuid::new_v4();
            let dim = 4;

            let mut entries = Vec::new();
            for i in 0..entry_count {
                let v = vec![(i as f32) * 0.01, 1.0 - (i as f32) * 0.01, 0.0, 0.0];
                entries.push(VectorEntry {
                    chunk_id: Uuid::new_v4(),
                    tenant_id,
                    product_id,
                    campaign_variant_id: None,
                    chunk_type: ChunkType::Narrative,
                    vector: v,
                });
            }
            index.insert(entries).await.unwrap();

            let query = vec![0.0f32; dim];
            let filter = SearchFilter::new(tenant_id);

            let k_large = k_small + extra;
            let small = index.search(&query, k_small, &filter).await.unwrap();
            let large = index.search(&query, k_large, &filter).await.unwrap();

            let small_ids: Vec<_> = small.iter().map(|s| s.chunk_id).collect();
            let large_prefix: Vec<_> = large.iter().take(small_ids.len()).map(|s| s.chunk_id).collect();
            prop_assert_eq!(small_ids, large_prefix);
            Ok(())
        }).unwrap();
    }
}
