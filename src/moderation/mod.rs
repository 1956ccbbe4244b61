pub mod http;
pub mod payload;

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub use http::HttpClassifier;
pub use payload::{ModerationItem, ModerationPayload, PayloadError};

/// Classifier verdict for one item. Unknown fields are carried through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationResult {
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub categories: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub category_scores: BTreeMap<String, f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Transport(String),

    #[error("classifier timed out after {0}ms")]
    Timeout(u64),

    #[error("classifier answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("classifier response unreadable: {0}")]
    InvalidResponse(String),

    #[error("batch item {index} failed: {source}")]
    Item {
        index: usize,
        #[source]
        source: Box<ClassifierError>,
    },
}

/// External content classification capability, invoked once per item.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, item: &ModerationItem) -> Result<ModerationResult, ClassifierError>;
}

/// Forwards single items or ordered batches to a classifier.
///
/// Batches are all-or-nothing: the first failed item fails the whole batch
/// and no partial results are returned.
pub struct ModerationForwarder {
    classifier: Arc<dyn Classifier>,
    batch_concurrency: usize,
}

impl ModerationForwarder {
    pub fn new(classifier: Arc<dyn Classifier>, batch_concurrency: usize) -> Self {
        Self {
            classifier,
            batch_concurrency: batch_concurrency.max(1),
        }
    }

    pub async fn moderate_one(&self, item: &ModerationItem) -> Result<ModerationResult, ClassifierError> {
        self.classifier.classify(item).await
    }

    /// `result[i]` always belongs to `items[i]`.
    pub async fn moderate_batch(&self, items: &[ModerationItem]) -> Result<Vec<ModerationResult>, ClassifierError> {
        let calls: Vec<_> = items
            .iter()
            .enumerate()
            .map(|(index, item)| self.classify_item(index, item))
            .collect();

        // buffered yields in input order, whatever order the calls finish in
        stream::iter(calls)
            .buffered(self.batch_concurrency)
            .try_collect()
            .await
    }

    async fn classify_item(&self, index: usize, item: &ModerationItem) -> Result<ModerationResult, ClassifierError> {
        self.classifier.classify(item).await.map_err(|e| ClassifierError::Item {
            index,
            source: Box::new(e),
        })
    }

    /// Routes a parsed payload to the matching entry point.
    pub async fn dispatch(&self, payload: &ModerationPayload) -> Result<ModerationOutcome, ClassifierError> {
        match payload {
            ModerationPayload::Single(item) => self.moderate_one(item).await.map(ModerationOutcome::Single),
            ModerationPayload::Batch(items) => self.moderate_batch(items).await.map(ModerationOutcome::Batch),
        }
    }
}

/// Result shape mirrors the payload shape it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ModerationOutcome {
    Single(ModerationResult),
    Batch(Vec<ModerationResult>),
}
