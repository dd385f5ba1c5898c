//! Query filters for collection reads
//!
//! Collections accept a JSON `filter` query parameter:
//!
//! ```text
//! GET /mymodels?filter={"where":{"name":"m1"},"order":"name DESC","limit":10,"skip":20}
//! GET /mymodels/count?where={"name":"m1"}
//! ```

use crate::core::error::ValidationError;
use crate::core::model::ModelInstance;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Raw query-string parameters of collection routes
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct QueryParams {
    /// Filter as a JSON object string
    pub filter: Option<String>,

    /// Where clause as a JSON object string (used by `count`)
    #[serde(rename = "where")]
    pub where_clause: Option<String>,

    /// JSONP callback name for JavaScript responses
    pub callback: Option<String>,

    /// Alternative to the auth header
    pub access_token: Option<String>,
}

impl QueryParams {
    /// Pick the known parameters out of a raw query map
    pub fn from_pairs(pairs: &IndexMap<String, String>) -> Self {
        Self {
            filter: pairs.get("filter").cloned(),
            where_clause: pairs.get("where").cloned(),
            callback: pairs.get("callback").cloned(),
            access_token: pairs.get("access_token").cloned(),
        }
    }

    /// Parse the `filter` parameter
    pub fn filter(&self) -> Result<Filter, ValidationError> {
        match &self.filter {
            Some(raw) => Filter::parse(raw),
            None => Ok(Filter::default()),
        }
    }

    /// Parse the `where` parameter
    pub fn where_clause(&self) -> Result<Map<String, Value>, ValidationError> {
        match &self.where_clause {
            Some(raw) => parse_object(raw, "where"),
            None => Ok(Map::new()),
        }
    }
}

/// Sort direction of an `order` clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Parsed collection filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Equality conditions, all of which must hold
    pub where_clause: Map<String, Value>,
    pub order: Option<(String, SortDirection)>,
    pub limit: Option<usize>,
    pub skip: usize,
}

#[derive(Deserialize)]
struct FilterRepr {
    #[serde(rename = "where", default)]
    where_clause: Option<Map<String, Value>>,
    #[serde(default)]
    order: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default, alias = "offset")]
    skip: Option<usize>,
}

fn parse_object(raw: &str, param: &str) -> Result<Map<String, Value>, ValidationError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ValidationError::InvalidPayload {
            message: format!("`{}` must be a JSON object", param),
        }),
    }
}

impl Filter {
    /// Parse a filter from its JSON representation
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let repr: FilterRepr =
            serde_json::from_str(raw).map_err(|e| ValidationError::InvalidPayload {
                message: format!("invalid filter: {}", e),
            })?;

        let order = match repr.order {
            Some(order) => Some(Self::parse_order(&order)?),
            None => None,
        };

        Ok(Self {
            where_clause: repr.where_clause.unwrap_or_default(),
            order,
            limit: repr.limit,
            skip: repr.skip.unwrap_or(0),
        })
    }

    /// Filter with only a where clause
    pub fn matching(where_clause: Map<String, Value>) -> Self {
        Self {
            where_clause,
            ..Self::default()
        }
    }

    fn parse_order(order: &str) -> Result<(String, SortDirection), ValidationError> {
        let mut parts = order.split_whitespace();
        let field = parts.next().ok_or_else(|| ValidationError::InvalidPayload {
            message: "empty order clause".to_string(),
        })?;
        let direction = match parts.next().map(|d| d.to_ascii_uppercase()).as_deref() {
            None | Some("ASC") => SortDirection::Asc,
            Some("DESC") => SortDirection::Desc,
            Some(other) => {
                return Err(ValidationError::InvalidPayload {
                    message: format!("invalid sort direction '{}'", other),
                });
            }
        };
        Ok((field.to_string(), direction))
    }

    /// Whether an instance satisfies the where clause
    pub fn matches(&self, instance: &ModelInstance) -> bool {
        self.where_clause
            .iter()
            .all(|(field, expected)| instance.field_matches(field, expected))
    }

    /// Apply where, order, skip and limit to a collection
    pub fn apply(&self, instances: Vec<ModelInstance>) -> Vec<ModelInstance> {
        let mut selected: Vec<ModelInstance> =
            instances.into_iter().filter(|i| self.matches(i)).collect();

        if let Some((field, direction)) = &self.order {
            selected.sort_by(|a, b| {
                let ordering = compare_field(a, b, field);
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        let limit = self.limit.unwrap_or(usize::MAX);
        selected.into_iter().skip(self.skip).take(limit).collect()
    }
}

fn compare_field(a: &ModelInstance, b: &ModelInstance, field: &str) -> Ordering {
    if field == "id" {
        return compare_ids(&a.id, &b.id);
    }
    compare_values(a.get(field), b.get(field))
}

fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
