//! Closed filter, sort, and pagination schema for chunk listing and search.
//!
//! Filters are a fixed set of predicate kinds (exact match and numeric
//! range) combined with logical AND. Unknown fields are rejected when a
//! filter is parsed, never passed through to a backend.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::Chunk;

/// Hard cap on page sizes.
pub const MAX_PAGE_LIMIT: usize = 500;

/// Chunk metadata filter. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_quality: Option<f64>,
}

/// Field compared by an exact-match predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExactField {
    Category,
    Tag,
    DocumentId,
}

/// Field compared by a range predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeField {
    QualityScore,
}

/// A single validated predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Exact { field: ExactField, value: String },
    Range { field: RangeField, min: Option<f64>, max: Option<f64> },
}

impl Predicate {
    pub fn matches(&self, chunk: &Chunk) -> bool {
        match self {
            Predicate::Exact { field, value } => match field {
                ExactField::Category => chunk.category.as_deref() == Some(value.as_str()),
                ExactField::Tag => chunk.tags.iter().any(|t| t == value),
                ExactField::DocumentId => chunk.document_id == *value,
            },
            Predicate::Range { field, min, max } => {
                let actual = match field {
                    RangeField::QualityScore => chunk.quality_score,
                };
                // Unscored chunks never satisfy a range.
                let Some(actual) = actual else {
                    return false;
                };
                min.map_or(true, |m| actual >= m) && max.map_or(true, |m| actual <= m)
            }
        }
    }
}

impl ChunkFilter {
    /// Parse a filter from a JSON object, rejecting unknown fields.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        if json.trim().is_empty() {
            return Ok(ChunkFilter::default());
        }
        let filter: ChunkFilter = serde_json::from_str(json)
            .map_err(|e| EngineError::Query(format!("malformed filter: {}", e)))?;
        filter.validate()?;
        Ok(filter)
    }

    /// Parse a filter from `key=value` pairs (CLI form).
    pub fn from_pairs(pairs: &[(String, String)]) -> EngineResult<Self> {
        let mut filter = ChunkFilter::default();
        for (key, value) in pairs {
            match key.as_str() {
                "category" => filter.category = Some(value.clone()),
                "tag" => filter.tag = Some(value.clone()),
                "document_id" => filter.document_id = Some(value.clone()),
                "min_quality" => filter.min_quality = Some(parse_score(key, value)?),
                "max_quality" => filter.max_quality = Some(parse_score(key, value)?),
                other => {
                    return Err(EngineError::Query(format!(
                        "unknown filter field '{}'; expected category, tag, document_id, min_quality, max_quality",
                        other
                    )))
                }
            }
        }
        filter.validate()?;
        Ok(filter)
    }

    pub fn is_empty(&self) -> bool {
        self.predicates().is_empty()
    }

    pub fn validate(&self) -> EngineResult<()> {
        for (name, value) in [("min_quality", self.min_quality), ("max_quality", self.max_quality)] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) || v.is_nan() {
                    return Err(EngineError::Query(format!(
                        "{} must be in [0.0, 1.0], got {}",
                        name, v
                    )));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.min_quality, self.max_quality) {
            if min > max {
                return Err(EngineError::Query(format!(
                    "min_quality {} is greater than max_quality {}",
                    min, max
                )));
            }
        }
        for (name, value) in [
            ("category", &self.category),
            ("tag", &self.tag),
            ("document_id", &self.document_id),
        ] {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(EngineError::Query(format!("{} filter must not be blank", name)));
            }
        }
        Ok(())
    }

    /// Expand into the AND-combined predicate list.
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut out = Vec::new();
        if let Some(v) = &self.category {
            out.push(Predicate::Exact {
                field: ExactField::Category,
                value: v.clone(),
            });
        }
        if let Some(v) = &self.tag {
            out.push(Predicate::Exact {
                field: ExactField::Tag,
                value: v.clone(),
            });
        }
        if let Some(v) = &self.document_id {
            out.push(Predicate::Exact {
                field: ExactField::DocumentId,
                value: v.clone(),
            });
        }
        if self.min_quality.is_some() || self.max_quality.is_some() {
            out.push(Predicate::Range {
                field: RangeField::QualityScore,
                min: self.min_quality,
                max: self.max_quality,
            });
        }
        out
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.predicates().iter().all(|p| p.matches(chunk))
    }
}

fn parse_score(key: &str, value: &str) -> EngineResult<f64> {
    value
        .parse::<f64>()
        .map_err(|_| EngineError::Query(format!("{} must be a number, got '{}'", key, value)))
}

/// Sortable chunk fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Document, then ordinal.
    #[default]
    Ordinal,
    QualityScore,
    CreatedAt,
    UpdatedAt,
    Length,
    Category,
}

impl FromStr for SortField {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ordinal" => Ok(SortField::Ordinal),
            "quality" | "quality_score" => Ok(SortField::QualityScore),
            "created_at" => Ok(SortField::CreatedAt),
            "updated_at" => Ok(SortField::UpdatedAt),
            "length" => Ok(SortField::Length),
            "category" => Ok(SortField::Category),
            other => Err(EngineError::Query(format!("unknown sort field '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(EngineError::Query(format!(
                "unknown sort direction '{}'; expected asc or desc",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChunkSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl ChunkSort {
    /// Total order used by in-memory backends. Missing values sort first
    /// ascending (matching SQLite's NULL ordering); ties break on chunk id.
    pub fn compare(&self, a: &Chunk, b: &Chunk) -> Ordering {
        let primary = match self.field {
            SortField::Ordinal => a
                .document_id
                .cmp(&b.document_id)
                .then(a.ordinal.cmp(&b.ordinal)),
            SortField::QualityScore => cmp_opt_f64(a.quality_score, b.quality_score),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::Length => a.char_len.cmp(&b.char_len),
            SortField::Category => a.category.cmp(&b.category),
        };
        let primary = match self.direction {
            SortDirection::Asc => primary,
            SortDirection::Desc => primary.reverse(),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

fn cmp_opt_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            offset: 0,
            limit: 50,
        }
    }
}

impl Page {
    pub fn validate(&self) -> EngineResult<()> {
        if self.limit == 0 || self.limit > MAX_PAGE_LIMIT {
            return Err(EngineError::Query(format!(
                "page limit must be in 1..={}, got {}",
                MAX_PAGE_LIMIT, self.limit
            )));
        }
        Ok(())
    }
}

/// Listing request: filter, sort, page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkQuery {
    pub filter: ChunkFilter,
    pub sort: ChunkSort,
    pub page: Page,
}

impl ChunkQuery {
    pub fn validate(&self) -> EngineResult<()> {
        self.filter.validate()?;
        self.page.validate()
    }
}

/// One page of chunks plus the total number matching the filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkPage {
    pub items: Vec<Chunk>,
    pub total: u64,
    pub offset: usize,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkState;

    fn chunk(id: &str, category: Option<&str>, score: Option<f64>) -> Chunk {
        Chunk {
            id: id.into(),
            document_id: "d1".into(),
            index: "support".into(),
            ordinal: 0,
            text: "text".into(),
            char_len: 4,
            overlap_chars: 0,
            hash: String::new(),
            category: category.map(String::from),
            tags: vec!["faq".into()],
            quality_score: score,
            quality_reasons: vec![],
            quality_pinned: false,
            embedding: None,
            embedding_model: None,
            state: ChunkState::Indexed,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_unknown_json_field_rejected() {
        let err = ChunkFilter::from_json(r#"{"colour": "red"}"#).unwrap_err();
        assert!(matches!(err, EngineError::Query(_)));
    }

    #[test]
    fn test_unknown_pair_rejected() {
        let pairs = vec![("owner".to_string(), "me".to_string())];
        assert!(ChunkFilter::from_pairs(&pairs).is_err());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = ChunkFilter::from_json(r#"{"min_quality": 0.8, "max_quality": 0.2}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_predicates_and_combined() {
        let filter = ChunkFilter {
            category: Some("returns".into()),
            min_quality: Some(0.5),
            ..Default::default()
        };
        assert!(filter.matches(&chunk("a", Some("returns"), Some(0.7))));
        assert!(!filter.matches(&chunk("b", Some("returns"), Some(0.3))));
        assert!(!filter.matches(&chunk("c", Some("billing"), Some(0.9))));
        assert!(!filter.matches(&chunk("d", Some("returns"), None)));
    }

    #[test]
    fn test_sort_quality_desc_puts_unscored_last() {
        let sort = ChunkSort {
            field: SortField::QualityScore,
            direction: SortDirection::Desc,
        };
        let mut chunks = vec![
            chunk("a", None, None),
            chunk("b", None, Some(0.9)),
            chunk("c", None, Some(0.2)),
        ];
        chunks.sort_by(|x, y| sort.compare(x, y));
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_page_limits() {
        assert!(Page { offset: 0, limit: 0 }.validate().is_err());
        assert!(Page { offset: 10, limit: 20 }.validate().is_ok());
    }
}
