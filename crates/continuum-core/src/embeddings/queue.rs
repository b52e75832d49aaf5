//! Bounded embedding queue.
//!
//! Write paths enqueue an embed request and move on; a worker drains the
//! queue and persists vectors. A full queue or a failed embed never fails
//! the originating write - the consolidator backfills missing embeddings.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::Embedder;
use crate::model::MemoryKind;
use crate::storage::Store;

/// Request to embed one entity's text
#[derive(Debug, Clone)]
pub struct EmbedRequest {
    pub kind: MemoryKind,
    pub tenant_id: String,
    pub entity_id: String,
    pub text: String,
}

/// Producer handle onto the embedding queue
#[derive(Clone)]
pub struct EmbeddingQueue {
    tx: mpsc::Sender<EmbedRequest>,
}

impl EmbeddingQueue {
    /// Enqueue without blocking; drops the request (with a warning) when the
    /// queue is full or the worker is gone.
    pub fn enqueue(&self, request: EmbedRequest) {
        if let Err(e) = self.tx.try_send(request) {
            warn!("embed request dropped: {}", e);
        }
    }
}

/// Spawn the embedding worker and return its queue handle.
///
/// Must be called from within a tokio runtime.
pub fn spawn_embed_worker(
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    depth: usize,
) -> EmbeddingQueue {
    let (tx, mut rx) = mpsc::channel::<EmbedRequest>(depth.max(1));

    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            match embedder.embed(&request.text) {
                Ok(embedding) => {
                    if let Err(e) = store.put_embedding(
                        request.kind,
                        &request.tenant_id,
                        &request.entity_id,
                        &embedding,
                    ) {
                        warn!(
                            entity = %request.entity_id,
                            "failed to persist embedding: {}", e
                        );
                    } else {
                        debug!(entity = %request.entity_id, kind = %request.kind, "embedded");
                    }
                }
                Err(e) => {
                    warn!(entity = %request.entity_id, "embed failed: {}", e);
                }
            }
        }
        debug!("embedding worker stopped");
    });

    EmbeddingQueue { tx }
}

// ============================================================================
// TESTS
// ============================================================================
