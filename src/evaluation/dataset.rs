use super::EvaluationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

/// Difficulty label carried through to reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// One labelled query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationQuery {
    pub id: String,
    pub game_id: String,
    #[serde(rename = "query", alias = "queryText")]
    pub query_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth_answer: Option<String>,
    #[serde(default)]
    pub relevant_doc_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl EvaluationQuery {
    /// Category searched for this query: its own category when set,
    /// otherwise its game.
    pub fn search_category(&self) -> &str {
        self.category.as_deref().unwrap_or(&self.game_id)
    }
}

/// Versioned query set. Immutable for the length of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDataset {
    pub name: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub queries: Vec<EvaluationQuery>,
}

impl EvaluationDataset {
    /// Read and validate a dataset file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EvaluationError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EvaluationError::InvalidDataset(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate a dataset from JSON text.
    pub fn from_json(content: &str) -> Result<Self, EvaluationError> {
        let dataset: Self = serde_json::from_str(content)
            .map_err(|e| EvaluationError::InvalidDataset(format!("malformed JSON: {}", e)))?;
        dataset.validate()?;
        Ok(dataset)
    }

    /// Non-empty, every query has an id and text, ids are unique.
    pub fn validate(&self) -> Result<(), EvaluationError> {
        if self.queries.is_empty() {
            return Err(EvaluationError::InvalidDataset(format!(
                "dataset '{}' has no queries",
                self.name
            )));
        }

        let mut seen = HashSet::with_capacity(self.queries.len());
        for (position, query) in self.queries.iter().enumerate() {
            if query.id.trim().is_empty() {
                return Err(EvaluationError::InvalidDataset(format!(
                    "query at position {} has an empty id",
                    position
                )));
            }
            if query.query_text.trim().is_empty() {
                return Err(EvaluationError::InvalidDataset(format!(
                    "query '{}' has empty text",
                    query.id
                )));
            }
            if !seen.insert(query.id.as_str()) {
                return Err(EvaluationError::InvalidDataset(format!(
                    "duplicate query id '{}'",
                    query.id
                )));
            }
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
