use crate::{Embedding, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field name of the candidate identifier in JSON records
pub const ID_FIELD: &str = "id";
/// Field name of the candidate embedding in JSON records
pub const EMBEDDING_FIELD: &str = "embedding";

/// Identifier attached to a candidate by the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CandidateId {
    Integer(u64),
    Uuid(Uuid),
    String(String),
}

impl std::fmt::Display for CandidateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateId::String(s) => write!(f, "{}", s),
            CandidateId::Uuid(u) => write!(f, "{}", u),
            CandidateId::Integer(i) => write!(f, "{}", i),
        }
    }
}

impl From<String> for CandidateId {
    fn from(s: String) -> Self {
        CandidateId::String(s)
    }
}

impl From<&str> for CandidateId {
    fn from(s: &str) -> Self {
        CandidateId::String(s.to_string())
    }
}

impl From<u64> for CandidateId {
    fn from(i: u64) -> Self {
        CandidateId::Integer(i)
    }
}

impl From<Uuid> for CandidateId {
    fn from(u: Uuid) -> Self {
        CandidateId::Uuid(u)
    }
}

/// An item competing for a place in a ranking
///
/// Attributes other than the id and the embedding are carried through to
/// the ranked output untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub embedding: Embedding,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Candidate {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<CandidateId>, embedding: Embedding) -> Self {
        Self {
            id: id.into(),
            embedding,
            extra: Map::new(),
        }
    }

    /// Attach a passthrough attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if key != ID_FIELD && key != EMBEDDING_FIELD {
            self.extra.insert(key, value);
        }
        self
    }

    /// Parse a candidate from a JSON object
    ///
    /// The object must hold an `id` (string, UUID string or non-negative
    /// integer) and an `embedding` array of numbers. Every other key becomes
    /// a passthrough attribute.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::MalformedCandidate("expected a JSON object".to_string()))?;

        let id = match object.get(ID_FIELD) {
            Some(raw) => CandidateId::deserialize(raw).map_err(|_| {
                Error::MalformedCandidate(format!("invalid id: {}", raw))
            })?,
            None => return Err(Error::MalformedCandidate("missing id".to_string())),
        };

        let raw_embedding = object
            .get(EMBEDDING_FIELD)
            .ok_or_else(|| Error::MalformedCandidate(format!("candidate {} has no embedding", id)))?
            .as_array()
            .ok_or_else(|| {
                Error::MalformedCandidate(format!("embedding of candidate {} is not an array", id))
            })?;

        let data = raw_embedding
            .iter()
            .enumerate()
            .map(|(index, v)| {
                v.as_f64()
                    .map(|x| x as f32)
                    .ok_or(Error::NonNumericValue { index })
            })
            .collect::<Result<Vec<f32>>>()?;

        let extra = object
            .iter()
            .filter(|(k, _)| k.as_str() != ID_FIELD && k.as_str() != EMBEDDING_FIELD)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            id,
            embedding: Embedding::new(data)?,
            extra,
        })
    }

    /// Parse a JSON array of candidates, one result per element
    ///
    /// A malformed element does not prevent the others from parsing.
    pub fn parse_many(value: &Value) -> Result<Vec<Result<Candidate>>> {
        let items = value.as_array().ok_or_else(|| {
            Error::MalformedCandidate("expected a JSON array of candidates".to_string())
        })?;
        Ok(items.iter().map(Candidate::from_json).collect())
    }
}

impl<'de> Deserialize<'de> for Candidate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Candidate::from_json(&value).map_err(serde::de::Error::custom)
    }
}
