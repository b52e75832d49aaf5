//! Identity-thread clustering.
//!
//! `becoming` statements cluster when they are semantically close (cosine)
//! AND share vocabulary (overlap coefficient). When embeddings are missing
//! for either member, Jaccard similarity on keyword sets decides alone.

use std::collections::HashSet;

use crate::embeddings::cosine_similarity;
use crate::llm::keywords;

/// One statement prepared for clustering
pub(crate) struct ClusterMember {
    pub handoff_id: String,
    pub becoming: String,
    pub keywords: HashSet<String>,
    pub embedding: Option<Vec<f32>>,
}

impl ClusterMember {
    pub fn new(handoff_id: String, becoming: String, embedding: Option<Vec<f32>>) -> Self {
        let keywords = keywords(&becoming).into_iter().collect();
        Self {
            handoff_id,
            becoming,
            keywords,
            embedding,
        }
    }
}

/// Shared fraction relative to the smaller set
pub(crate) fn overlap_coefficient(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    shared as f64 / smaller as f64
}

/// Intersection over union
pub(crate) fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    shared as f64 / union as f64
}

/// Pairwise relatedness predicate
fn related(
    a: &ClusterMember,
    b: &ClusterMember,
    similarity_threshold: f32,
    overlap_threshold: f64,
    jaccard_threshold: f64,
) -> bool {
    match (&a.embedding, &b.embedding) {
        (Some(va), Some(vb)) => {
            cosine_similarity(va, vb) >= similarity_threshold
                && overlap_coefficient(&a.keywords, &b.keywords) >= overlap_threshold
        }
        _ => jaccard(&a.keywords, &b.keywords) >= jaccard_threshold,
    }
}

/// Greedy single-linkage clustering.
///
/// Deterministic for a fixed input order: each member joins the first
/// existing cluster it relates to, else starts its own.
pub(crate) fn cluster(
    members: &[ClusterMember],
    similarity_threshold: f32,
    overlap_threshold: f64,
    jaccard_threshold: f64,
) -> Vec<Vec<usize>> {
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for (index, member) in members.iter().enumerate() {
        let mut placed = false;
        for existing in &mut clusters {
            if existing.iter().any(|&other| {
                related(
                    member,
                    &members[other],
                    similarity_threshold,
                    overlap_threshold,
                    jaccard_threshold,
                )
            }) {
                existing.push(index);
                placed = true;
                break;
            }
        }
        if !placed {
            clusters.push(vec![index]);
        }
    }
    clusters
}

// ============================================================================
// TESTS
// ============================================================================
