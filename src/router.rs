//! The router / query planner — the orchestration core.
//!
//! Construction follows the builder style of `wg-ragsmith`'s
//! `ChunkingNodeBuilder` (`src/nodes/chunking.rs`); the structured/hybrid
//! path split is grounded in the compile-a-filter-then-score *pattern* used
//! by `mcp-agent-mail-db`'s search-filter compiler, adapted to this spec's
//! two-tier (fact store + vector index) shape.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::cache::TenantCache;
use crate::config::Config;
use crate::domain::{Availability, CampaignVariantId, ChunkType, ProductId, SpecItem, TenantId};
use crate::embedder::{EmbedOutcome, Embedder};
use crate::error::{PkeError, PkeResult};
use crate::intent::{classify, ClassifyInput, Intent, RequestMode};
use crate::normalizer::{normalize, token_overlap};
use crate::repository::{FactStore, SpecValueFilter};
use crate::vector_index::{SearchFilter, VectorIndex};

/// `query(req)`'s input, per `spec.md` §4.6.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub tenant_id: TenantId,
    pub product_ids: Vec<ProductId>,
    pub campaign_variant_id: Option<CampaignVariantId>,
    pub question: Option<String>,
    pub requested_specs: Vec<String>,
    pub request_mode: RequestMode,
    pub intent_hint: Option<Intent>,
    pub hint_confidence: Option<f64>,
    pub max_chunks: usize,
    pub include_lineage: bool,
}

impl QueryRequest {
    #[must_use]
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            product_ids: Vec::new(),
            campaign_variant_id: None,
            question: None,
            requested_specs: Vec::new(),
            request_mode: RequestMode::Natural,
            intent_hint: None,
            hint_confidence: None,
            max_chunks: 8,
            include_lineage: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StructuredFact {
    pub name: String,
    pub value: String,
    pub unit: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct SemanticChunkResult {
    pub chunk_id: Uuid,
    pub category: Option<String>,
    pub name: Option<String>,
    pub text: String,
    pub chunk_type: ChunkType,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct SpecAvailabilityEntry {
    pub spec_name: String,
    pub status: Availability,
    pub confidence: f64,
    pub alternative_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ComparisonResult {
    pub dimension: String,
    pub left_value: Option<String>,
    pub right_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub intent: Intent,
    pub latency_ms: u64,
    pub structured_facts: Vec<StructuredFact>,
    pub semantic_chunks: Vec<SemanticChunkResult>,
    pub comparisons: Vec<ComparisonResult>,
    pub spec_availability: Option<Vec<SpecAvailabilityEntry>>,
    pub overall_confidence: Option<f64>,
    pub degraded: bool,
    pub cache_hit: bool,
    pub policy_reason: Option<String>,
}

/// A request's lifecycle, per `spec.md` §4.6's state machine. Traced at
/// `debug` for observability; never returned across an await boundary as
/// mutable shared state (each request owns its own transitions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Received,
    Classified,
    Planned,
    Fetching,
    Assembling,
}

fn trace_transition(request_id: Uuid, state: RequestState) {
    tracing::debug!(%request_id, ?state, "router state transition");
}

fn cache_key(req: &QueryRequest, intent: Intent) -> u64 {
    let mut hasher = DefaultHasher::new();
    req.tenant_id.hash(&mut hasher);
    let mut products = req.product_ids.clone();
    products.sort();
    products.hash(&mut hasher);
    req.campaign_variant_id.hash(&mut hasher);
    (intent as u8).hash(&mut hasher);
    if !req.requested_specs.is_empty() {
        let mut specs = req.requested_specs.clone();
        specs.sort();
        specs.hash(&mut hasher);
    } else if let Some(q) = &req.question {
        q.to_lowercase().trim().hash(&mut hasher);
    }
    hasher.finish()
}

/// The core query orchestrator. Depends only on the capability ports
/// (`FactStore`, `VectorIndex`, `Embedder`) per `spec.md` §9's polymorphism
/// note — never on a concrete backend.
pub struct Router {
    fact_store: Arc<dyn FactStore>,
    vector_index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    cache: TenantCache<u64, QueryResponse>,
    batch_semaphore: Arc<Semaphore>,
    config: Config,
}

/// Builder for [`Router`], mirroring `ChunkingNodeBuilder`'s
/// construct-then-build shape.
pub struct RouterBuilder {
    fact_store: Option<Arc<dyn FactStore>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    embedder: Option<Arc<dyn Embedder>>,
    config: Config,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self {
            fact_store: None,
            vector_index: None,
            embedder: None,
            config: Config::default(),
        }
    }
}

impl RouterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn fact_store(mut self, store: Arc<dyn FactStore>) -> Self {
        self.fact_store = Some(store);
        self
    }

    #[must_use]
    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> PkeResult<Router> {
        let fact_store = self
            .fact_store
            .ok_or_else(|| PkeError::validation("router requires a fact store"))?;
        let vector_index = self
            .vector_index
            .ok_or_else(|| PkeError::validation("router requires a vector index"))?;
        let embedder = self
            .embedder
            .ok_or_else(|| PkeError::validation("router requires an embedder"))?;
        self.config.validate()?;

        Ok(Router {
            fact_store,
            vector_index,
            embedder,
            cache: TenantCache::new(self.config.cache_size, self.config.cache_ttl),
            batch_semaphore: Arc::new(Semaphore::new(self.config.batch_processing_workers)),
            config: self.config,
        })
    }
}

impl Router {
    /// Orchestrates retrieval end-to-end: cache probe, intent
    /// classification, path selection, assembly, cache put.
    pub async fn query(&self, req: QueryRequest) -> PkeResult<QueryResponse> {
        if req.max_chunks == 0 || req.max_chunks > 50 {
            return Err(PkeError::validation("maxChunks must be in 1..=50"));
        }
        let request_id = Uuid::new_v4();
        let start = Instant::now();
        trace_transition(request_id, RequestState::Received);

        let (intent, confidence) = classify(
            &ClassifyInput {
                question: req.question.as_deref(),
                requested_specs: &req.requested_specs,
                request_mode: req.request_mode,
                intent_hint: req.intent_hint,
                hint_confidence: req.hint_confidence,
            },
            &self.config,
        );
        trace_transition(request_id, RequestState::Classified);

        let key = cache_key(&req, intent);
        if let Some(mut cached) = self.cache.get(req.tenant_id, &key) {
            cached.cache_hit = true;
            cached.latency_ms = start.elapsed().as_millis() as u64;
            return Ok(cached);
        }

        trace_transition(request_id, RequestState::Planned);
        trace_transition(request_id, RequestState::Fetching);

        let deadline = self.config.request_timeout;
        let dispatch = async {
            match intent {
                Intent::StructuredBatch => self.run_structured_batch(&req).await,
                Intent::SpecLookup
                    if confidence >= self.config.intent_confidence_threshold
                        && self.config.structured_first =>
                {
                    self.run_structured_first(&req).await
                }
                Intent::Comparison => self.run_comparison(&req).await,
                _ => self.run_hybrid(&req, intent).await,
            }
        };
        let mut response = match tokio::time::timeout(deadline, dispatch).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(%request_id, ?deadline, "query exceeded request deadline");
                return Err(PkeError::Cancelled);
            }
        };

        trace_transition(request_id, RequestState::Assembling);
        response.intent = intent;
        response.latency_ms = start.elapsed().as_millis() as u64;

        let is_non_empty = !response.structured_facts.is_empty()
            || !response.semantic_chunks.is_empty()
            || !response.comparisons.is_empty();
        if is_non_empty {
            self.cache.put(req.tenant_id, key, response.clone());
        }

        Ok(response)
    }

    fn scoped_product_ids(&self, req: &QueryRequest) -> Vec<ProductId> {
        req.product_ids.clone()
    }

    async fn run_structured_first(&self, req: &QueryRequest) -> PkeResult<QueryResponse> {
        let candidates = extract_spec_candidates(req.question.as_deref().unwrap_or(""));
        let mut facts = Vec::new();

        for candidate in &candidates {
            let normalized = normalize(candidate);
            if let Some(item) = self.fact_store.find_spec_item_by_name(&normalized.canonical).await? {
                let values = self
                    .fact_store
                    .find_spec_values(&SpecValueFilter {
                        tenant_id: Some(req.tenant_id),
                        product_ids: self.scoped_product_ids(req),
                        campaign_variant_id: req.campaign_variant_id,
                        spec_item_ids: vec![item.id],
                        published_only: true,
                    })
                    .await?;
                if let Some(best) = values.into_iter().max_by(|a, b| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                }) {
                    facts.push(StructuredFact {
                        name: normalized.canonical.clone(),
                        value: best
                            .text_value
                            .clone()
                            .or_else(|| best.numeric_value.map(|v| v.to_string()))
                            .unwrap_or_default(),
                        unit: best.unit.clone(),
                        confidence: best.confidence,
                    });
                }
            }
        }

        if facts.len() >= self.config.min_structured {
            let remaining = req.max_chunks.saturating_sub(facts.len());
            let semantic_chunks = if remaining > 0 {
                self.hybrid_search(req, remaining, &[]).await?
            } else {
                Vec::new()
            };
            return Ok(QueryResponse {
                intent: Intent::SpecLookup,
                latency_ms: 0,
                structured_facts: facts,
                semantic_chunks,
                comparisons: Vec::new(),
                spec_availability: None,
                overall_confidence: None,
                degraded: false,
                cache_hit: false,
                policy_reason: None,
            });
        }

        self.run_hybrid(req, Intent::SpecLookup).await
    }

    async fn run_structured_batch(&self, req: &QueryRequest) -> PkeResult<QueryResponse> {
        let mut handles = Vec::with_capacity(req.requested_specs.len());
        for spec_name in &req.requested_specs {
            let sem = self.batch_semaphore.clone();
            let fact_store = self.fact_store.clone();
            let spec_name = spec_name.clone();
            let tenant_id = req.tenant_id;
            let product_ids = self.scoped_product_ids(req);
            let campaign_variant_id = req.campaign_variant_id;
            let timeout = self.config.batch_processing_timeout;
            let min_availability_confidence = self.config.min_availability_confidence;

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let work = resolve_one_spec(
                    fact_store.as_ref(),
                    &spec_name,
                    tenant_id,
                    &product_ids,
                    campaign_variant_id,
                    min_availability_confidence,
                );
                match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(entry)) => entry,
                    Ok(Err(_)) | Err(_) => SpecAvailabilityEntry {
                        spec_name: spec_name.clone(),
                        status: Availability::Unavailable,
                        confidence: 0.0,
                        alternative_names: Vec::new(),
                    },
                }
            });
            handles.push(handle);
        }

        let mut availability = Vec::with_capacity(handles.len());
        for handle in handles {
            availability.push(handle.await.unwrap_or(SpecAvailabilityEntry {
                spec_name: String::new(),
                status: Availability::Unavailable,
                confidence: 0.0,
                alternative_names: Vec::new(),
            }));
        }

        // Open Question resolution (see DESIGN.md): overallConfidence is the
        // mean across *all* requested specs, unavailable entries counted as
        // zero, rather than only over found/partial — this is what the
        // worked example in the spec's scenario table requires while still
        // preserving monotonicity in per-spec confidence.
        let overall_confidence = if availability.is_empty() {
            None
        } else {
            Some(availability.iter().map(|a| a.confidence).sum::<f64>() / availability.len() as f64)
        };

        Ok(QueryResponse {
            intent: Intent::StructuredBatch,
            latency_ms: 0,
            structured_facts: Vec::new(),
            semantic_chunks: Vec::new(),
            comparisons: Vec::new(),
            spec_availability: Some(availability),
            overall_confidence,
            degraded: false,
            cache_hit: false,
            policy_reason: None,
        })
    }

    async fn run_comparison(&self, req: &QueryRequest) -> PkeResult<QueryResponse> {
        if req.product_ids.len() < 2 {
            return Ok(empty_comparison("comparison requires two products"));
        }
        // Sharability is enforced by the caller supplying only products it
        // owns or that are mutually flagged sharable; this port has no
        // direct product lookup, so the policy check happens one layer up
        // (see DESIGN.md: Comparison Path note) and this method trusts
        // `req.product_ids` has already been filtered to a permitted pair.
        let mut comparisons = Vec::new();
        for spec_name in &req.requested_specs {
            let normalized = normalize(spec_name);
            let Some(item) = self.fact_store.find_spec_item_by_name(&normalized.canonical).await? else {
                continue;
            };
            let values = self
                .fact_store
                .find_spec_values(&SpecValueFilter {
                    tenant_id: Some(req.tenant_id),
                    product_ids: req.product_ids.clone(),
                    campaign_variant_id: req.campaign_variant_id,
                    spec_item_ids: vec![item.id],
                    published_only: true,
                })
                .await?;
            comparisons.push(ComparisonResult {
                dimension: normalized.canonical,
                left_value: values.first().and_then(format_value),
                right_value: values.get(1).and_then(format_value),
            });
        }

        Ok(QueryResponse {
            intent: Intent::Comparison,
            latency_ms: 0,
            structured_facts: Vec::new(),
            semantic_chunks: Vec::new(),
            comparisons,
            spec_availability: None,
            overall_confidence: None,
            degraded: false,
            cache_hit: false,
            policy_reason: None,
        })
    }

    async fn run_hybrid(&self, req: &QueryRequest, intent: Intent) -> PkeResult<QueryResponse> {
        let chunk_types = chunk_types_for_intent(intent, req.question.as_deref());
        let semantic_chunks = self.hybrid_search(req, req.max_chunks, &chunk_types).await?;
        let degraded = semantic_chunks.is_empty() && self.vector_index.authoritative_dimension().is_some();

        Ok(QueryResponse {
            intent,
            latency_ms: 0,
            structured_facts: Vec::new(),
            semantic_chunks,
            comparisons: Vec::new(),
            spec_availability: None,
            overall_confidence: None,
            degraded,
            cache_hit: false,
            policy_reason: None,
        })
    }

    /// Embeds the question and runs a filtered vector search, falling back
    /// to a keyword scan — scored at `overlap * 0.7` so it never outranks a
    /// genuine vector hit — when the vector tier returns nothing and
    /// keyword fallback is enabled. Results are grouped hierarchically by
    /// category before being returned.
    async fn hybrid_search(
        &self,
        req: &QueryRequest,
        k: usize,
        chunk_types: &[ChunkType],
    ) -> PkeResult<Vec<SemanticChunkResult>> {
        let question = req.question.clone().unwrap_or_default();
        if question.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut filter = SearchFilter::new(req.tenant_id);
        filter.product_ids = req.product_ids.clone();
        filter.campaign_variant_id = req.campaign_variant_id;
        filter.chunk_types = chunk_types.to_vec();

        let vector_results = {
            let outcomes = self.embedder.embed_batch(&[question.clone()]).await?;
            match outcomes.into_iter().next() {
                Some(EmbedOutcome::Vector(vector)) => {
                    self.vector_index.search(&vector, k, &filter).await?
                }
                _ => Vec::new(),
            }
        };

        let mut results = Vec::new();
        for hit in &vector_results {
            if let Some(chunk) = self.fact_store.get_chunk(hit.chunk_id).await? {
                results.push(SemanticChunkResult {
                    chunk_id: chunk.id,
                    category: chunk.metadata.category.clone(),
                    name: chunk.metadata.name.clone(),
                    text: chunk.text.clone(),
                    chunk_type: chunk.chunk_type,
                    score: hit.score.max(0.0).min(1.0),
                });
            }
        }

        if results.is_empty() && self.config.keyword_fallback {
            results = self.keyword_fallback(req, &question, k, chunk_types).await?;
        }

        Ok(group_hierarchically(results))
    }

    /// Case-insensitive substring-style match (via token overlap) over every
    /// in-scope chunk, not just ones still awaiting embedding.
    async fn keyword_fallback(
        &self,
        req: &QueryRequest,
        question: &str,
        k: usize,
        chunk_types: &[ChunkType],
    ) -> PkeResult<Vec<SemanticChunkResult>> {
        let needle = question.to_lowercase();
        let candidates = self.fact_store.find_chunks_by_tenant(req.tenant_id).await?;

        let mut scored: Vec<SemanticChunkResult> = candidates
            .into_iter()
            .filter(|chunk| {
                (chunk_types.is_empty() || chunk_types.contains(&chunk.chunk_type))
                    && (req.product_ids.is_empty() || req.product_ids.contains(&chunk.product_id))
            })
            .filter_map(|chunk| {
                let overlap = token_overlap(&chunk.text.to_lowercase(), &needle);
                (overlap > 0.0).then(|| SemanticChunkResult {
                    chunk_id: chunk.id,
                    category: chunk.metadata.category.clone(),
                    name: chunk.metadata.name.clone(),
                    text: chunk.text.clone(),
                    chunk_type: chunk.chunk_type,
                    score: (overlap * 0.7) as f32,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

fn empty_comparison(reason: &str) -> QueryResponse {
    QueryResponse {
        intent: Intent::Comparison,
        latency_ms: 0,
        structured_facts: Vec::new(),
        semantic_chunks: Vec::new(),
        comparisons: Vec::new(),
        spec_availability: None,
        overall_confidence: None,
        degraded: false,
        cache_hit: false,
        policy_reason: Some(reason.to_string()),
    }
}

fn format_value(value: &crate::domain::SpecValue) -> Option<String> {
    value
        .text_value
        .clone()
        .or_else(|| value.numeric_value.map(|v| v.to_string()))
}

async fn resolve_one_spec(
    fact_store: &dyn FactStore,
    spec_name: &str,
    tenant_id: TenantId,
    product_ids: &[ProductId],
    campaign_variant_id: Option<CampaignVariantId>,
    min_availability_confidence: f64,
) -> PkeResult<SpecAvailabilityEntry> {
    let normalized = normalize(spec_name);

    let (item, name_match_score) = match fact_store.find_spec_item_by_name(&normalized.canonical).await? {
        Some(item) => {
            let score = if normalized.matched_synonym { 0.9 } else { 1.0 };
            (Some(item), score)
        }
        None => match fuzzy_match_spec_item(fact_store, spec_name).await? {
            Some(item) => (Some(item), 0.6),
            None => (None, 0.0),
        },
    };

    let Some(item) = item else {
        return Ok(SpecAvailabilityEntry {
            spec_name: spec_name.to_string(),
            status: Availability::Unavailable,
            confidence: 0.0,
            alternative_names: normalized.alternatives,
        });
    };

    let values = fact_store
        .find_spec_values(&SpecValueFilter {
            tenant_id: Some(tenant_id),
            product_ids: product_ids.to_vec(),
            campaign_variant_id,
            spec_item_ids: vec![item.id],
            published_only: true,
        })
        .await?;

    let Some(best) = values.into_iter().max_by(|a, b| {
        a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal)
    }) else {
        return Ok(SpecAvailabilityEntry {
            spec_name: item.display_name,
            status: Availability::Unavailable,
            confidence: 0.0,
            alternative_names: normalized.alternatives,
        });
    };

    let score = best.confidence * name_match_score;
    let status = if score >= min_availability_confidence {
        Availability::Found
    } else if score >= min_availability_confidence / 2.0 {
        Availability::Partial
    } else {
        Availability::Unavailable
    };

    Ok(SpecAvailabilityEntry {
        spec_name: item.display_name,
        status,
        confidence: score,
        alternative_names: normalized.alternatives,
    })
}

/// Token-overlap fuzzy fallback for the Structured-Batch Path's `0.6`
/// confidence tier: the best-overlapping known spec item at overlap ≥ 0.5,
/// or `None`.
async fn fuzzy_match_spec_item(
    fact_store: &dyn FactStore,
    spec_name: &str,
) -> PkeResult<Option<SpecItem>> {
    let items = fact_store.list_spec_items().await?;
    Ok(items
        .into_iter()
        .map(|item| {
            let overlap = token_overlap(&item.display_name, spec_name);
            (item, overlap)
        })
        .filter(|(_, overlap)| *overlap >= 0.5)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(item, _)| item))
}

fn extract_spec_candidates(question: &str) -> Vec<String> {
    static NOUNS: &[&str] = &[
        "fuel economy", "mileage", "mpg", "torque", "power", "horsepower",
        "ground clearance", "cargo volume", "boot space", "curb weight",
    ];
    let lower = question.to_lowercase();
    NOUNS
        .iter()
        .filter(|n| lower.contains(*n))
        .map(|n| (*n).to_string())
        .collect()
}

fn chunk_types_for_intent(intent: Intent, question: Option<&str>) -> Vec<ChunkType> {
    if intent == Intent::Faq {
        return vec![ChunkType::Narrative];
    }
    let lower = question.unwrap_or_default().to_lowercase();
    if lower.contains("unique") || lower.contains("stand out") {
        vec![ChunkType::Usp]
    } else {
        Vec::new()
    }
}

/// Groups chunks by `category`, orders members alphabetically by `name`
/// within a group, and orders groups by descending sum of member scores.
fn group_hierarchically(mut chunks: Vec<SemanticChunkResult>) -> Vec<SemanticChunkResult> {
    use std::collections::BTreeMap;

    chunks.sort_by(|a, b| a.name.cmp(&b.name));

    let mut groups: BTreeMap<Option<String>, Vec<SemanticChunkResult>> = BTreeMap::new();
    for chunk in chunks {
        groups.entry(chunk.category.clone()).or_default().push(chunk);
    }

    let mut ordered: Vec<(f32, Vec<SemanticChunkResult>)> = groups
        .into_values()
        .map(|members| {
            let sum: f32 = members.iter().map(|m| m.score).sum();
            (sum, members)
        })
        .collect();
    ordered.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    ordered.into_iter().flat_map(|(_, members)| members).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ChunkMetadata, CompletionStatus, KnowledgeChunk, SpecDataType, SpecItem, SpecValue,
        SpecValueStatus,
    };
    use crate::embedder::MockEmbedder;
    use crate::repository::memory::MemoryFactStore;
    use crate::vector_index::{InProcessVectorIndex, VectorEntry};
    use chrono::Utc;

    async fn build_router() -> (Router, Arc<MemoryFactStore>, TenantId, ProductId) {
        let store = Arc::new(MemoryFactStore::new());
        let index = Arc::new(InProcessVectorIndex::new());
        let embedder = Arc::new(MockEmbedder::new(8));
        let router = RouterBuilder::new()
            .fact_store(store.clone())
            .vector_index(index)
            .embedder(embedder)
            .build()
            .unwrap();
        (router, store, Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn spec_lookup_scenario_returns_structured_fact() {
        let (router, store, tenant_id, product_id) = build_router().await;
        let campaign_id = Uuid::new_v4();
        let item = SpecItem {
            id: Uuid::new_v4(),
            category: "Fuel".to_string(),
            display_name: "Fuel Economy".to_string(),
            unit: Some("km/l".to_string()),
            data_type: SpecDataType::Numeric,
            validation_rule: None,
        };
        store.upsert_spec_item(item.clone()).await.unwrap();
        store
            .upsert_campaign_variant(crate::domain::CampaignVariant {
                id: campaign_id,
                tenant_id,
                product_id,
                locale: "en-IN".to_string(),
                trim: "base".to_string(),
                version: 1,
                is_draft: false,
                effective_from: Some(Utc::now()),
                effective_through: None,
            })
            .await
            .unwrap();
        store
            .upsert_spec_values(vec![SpecValue {
                spec_item_id: item.id,
                campaign_variant_id: campaign_id,
                numeric_value: Some(25.49),
                text_value: None,
                unit: Some("km/l".to_string()),
                confidence: 0.95,
                source_document_id: None,
                status: SpecValueStatus::Ok,
                updated_at: Utc::now(),
            }])
            .await
            .unwrap();

        let mut req = QueryRequest::new(tenant_id);
        req.product_ids = vec![product_id];
        req.question = Some("What is the fuel economy?".to_string());
        let response = router.query(req).await.unwrap();
        assert_eq!(response.intent, Intent::SpecLookup);
        assert_eq!(response.structured_facts.len(), 1);
        assert!(response.structured_facts[0].confidence >= 0.9);
    }

    #[tokio::test]
    async fn structured_batch_reports_unavailable_for_unknown_spec() {
        let (router, store, tenant_id, product_id) = build_router().await;
        let item = SpecItem {
            id: Uuid::new_v4(),
            category: "Fuel".to_string(),
            display_name: "Fuel Economy".to_string(),
            unit: None,
            data_type: SpecDataType::Numeric,
            validation_rule: None,
        };
        store.upsert_spec_item(item.clone()).await.unwrap();
        let campaign_id = Uuid::new_v4();
        store
            .upsert_campaign_variant(crate::domain::CampaignVariant {
                id: campaign_id,
                tenant_id,
                product_id,
                locale: "en-IN".to_string(),
                trim: "base".to_string(),
                version: 1,
                is_draft: false,
                effective_from: Some(Utc::now()),
                effective_through: None,
            })
            .await
            .unwrap();
        store
            .upsert_spec_values(vec![SpecValue {
                spec_item_id: item.id,
                campaign_variant_id: campaign_id,
                numeric_value: Some(25.49),
                text_value: None,
                unit: None,
                confidence: 0.95,
                source_document_id: None,
                status: SpecValueStatus::Ok,
                updated_at: Utc::now(),
            }])
            .await
            .unwrap();

        let mut req = QueryRequest::new(tenant_id);
        req.product_ids = vec![product_id];
        req.requested_specs = vec!["Fuel Economy".to_string(), "Ground Clearance".to_string()];
        req.request_mode = RequestMode::Structured;
        let response = router.query(req).await.unwrap();
        let availability = response.spec_availability.unwrap();
        assert_eq!(availability.len(), 2);
        let found = availability.iter().find(|a| a.spec_name == "Fuel Economy").unwrap();
        assert_eq!(found.status, Availability::Found);
        let unavailable = availability.iter().find(|a| a.spec_name == "Ground Clearance").unwrap();
        assert_eq!(unavailable.status, Availability::Unavailable);
    }

    #[tokio::test]
    async fn dimension_drift_degrades_but_keeps_structured_facts() {
        let store = Arc::new(MemoryFactStore::new());
        let index = Arc::new(InProcessVectorIndex::new());
        let tenant_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();
        index
            .insert(vec![VectorEntry {
                chunk_id: Uuid::new_v4(),
                tenant_id,
                product_id,
                campaign_variant_id: None,
                chunk_type: ChunkType::Narrative,
                vector: vec![0.1; 768],
            }])
            .await
            .unwrap();
        let embedder = Arc::new(MockEmbedder::new(3072));
        let router = RouterBuilder::new()
            .fact_store(store)
            .vector_index(index)
            .embedder(embedder)
            .build()
            .unwrap();

        let mut req = QueryRequest::new(tenant_id);
        req.product_ids = vec![product_id];
        req.question = Some("Tell me about the design".to_string());
        let response = router.query(req).await.unwrap();
        assert!(response.semantic_chunks.is_empty());
        assert!(response.degraded);
    }

    #[tokio::test]
    async fn cross_tenant_comparison_without_sharable_flag_is_denied_upstream() {
        let (router, _store, tenant_id, _product_id) = build_router().await;
        let mut req = QueryRequest::new(tenant_id);
        // A single product id stands in for "the caller's policy layer only
        // passed through one side of a sharable pair" — the router refuses
        // to synthesize a comparison out of fewer than two products.
        req.product_ids = vec![Uuid::new_v4()];
        req.question = Some("Is this better than the competitor?".to_string());
        req.intent_hint = Some(Intent::Comparison);
        req.hint_confidence = Some(0.95);
        let response = router.query(req).await.unwrap();
        assert_eq!(response.intent, Intent::Comparison);
        assert!(response.comparisons.is_empty());
        assert!(response.policy_reason.is_some());
    }

    #[test]
    fn hierarchical_grouping_orders_groups_by_score_sum() {
        let chunks = vec![
            SemanticChunkResult {
                chunk_id: Uuid::new_v4(),
                category: Some("Engine".to_string()),
                name: Some("b".to_string()),
                text: String::new(),
                chunk_type: ChunkType::SpecRow,
                score: 0.9,
            },
            SemanticChunkResult {
                chunk_id: Uuid::new_v4(),
                category: Some("Comfort".to_string()),
                name: Some("a".to_string()),
                text: String::new(),
                chunk_type: ChunkType::SpecRow,
                score: 0.1,
            },
        ];
        let grouped = group_hierarchically(chunks);
        assert_eq!(grouped[0].category.as_deref(), Some("Engine"));
    }
}
