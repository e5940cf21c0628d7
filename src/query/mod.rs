//! Kind-agnostic list query: filter, sort and paginate generic objects in memory.

mod selector;

pub use selector::{Requirement, Selector};

use crate::config::QueryDefaults;
use crate::error::AppError;
use crate::model::{GenericObject, ListResult};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

pub const PARAM_NAME: &str = "name";
pub const PARAM_EXACT: &str = "exact";
pub const PARAM_LABEL_SELECTOR: &str = "labelSelector";
pub const PARAM_PAGE: &str = "page";
pub const PARAM_LIMIT: &str = "limit";
pub const PARAM_ASCENDING: &str = "ascending";
pub const PARAM_ORDER_BY: &str = "orderBy";

/// Fields a list can be ordered by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortField {
    Name,
    CreationTimestamp,
}

impl FromStr for SortField {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(SortField::Name),
            "createTime" | "creationTimestamp" => Ok(SortField::CreationTimestamp),
            other => Err(AppError::invalid_query(
                PARAM_ORDER_BY,
                format!("unknown sort field '{}' (expected name or createTime)", other),
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameFilter {
    pub value: String,
    /// Exact match when set; substring otherwise.
    pub exact: bool,
}

impl NameFilter {
    pub fn matches(&self, name: &str) -> bool {
        if self.exact {
            name == self.value
        } else {
            name.contains(&self.value)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListQuery {
    pub name: Option<NameFilter>,
    pub selector: Option<Selector>,
    pub order_by: SortField,
    pub ascending: bool,
    /// 1-based.
    pub page: usize,
    /// Zero returns every match.
    pub limit: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            name: None,
            selector: None,
            order_by: SortField::CreationTimestamp,
            ascending: true,
            page: 1,
            limit: 0,
        }
    }
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, AppError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(AppError::invalid_query(field, format!("expected true or false, got '{}'", raw))),
    }
}

fn parse_count(field: &str, raw: &str) -> Result<usize, AppError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| AppError::invalid_query(field, format!("expected a non-negative integer, got '{}'", raw)))
}

impl ListQuery {
    /// Build a query from raw query parameters, falling back to `defaults` for ordering and limit.
    /// Unknown parameters are ignored.
    pub fn from_params(params: &HashMap<String, String>, defaults: &QueryDefaults) -> Result<Self, AppError> {
        let exact = params
            .get(PARAM_EXACT)
            .map(|v| parse_bool(PARAM_EXACT, v))
            .transpose()?
            .unwrap_or(false);
        let name = params
            .get(PARAM_NAME)
            .filter(|v| !v.is_empty())
            .map(|v| NameFilter { value: v.clone(), exact });
        let selector = params
            .get(PARAM_LABEL_SELECTOR)
            .map(|v| v.parse::<Selector>())
            .transpose()?
            .filter(|s| !s.is_empty());
        let order_by = match params.get(PARAM_ORDER_BY).filter(|v| !v.is_empty()) {
            Some(v) => v.parse()?,
            None => defaults.order_by.parse()?,
        };
        let ascending = match params.get(PARAM_ASCENDING) {
            Some(v) => parse_bool(PARAM_ASCENDING, v)?,
            None => defaults.ascending,
        };
        let page = match params.get(PARAM_PAGE) {
            Some(v) => parse_count(PARAM_PAGE, v)?,
            None => 1,
        };
        if page < 1 {
            return Err(AppError::invalid_query(PARAM_PAGE, "page must be at least 1"));
        }
        let limit = match params.get(PARAM_LIMIT) {
            Some(v) => parse_count(PARAM_LIMIT, v)?,
            None => defaults.limit,
        };
        Ok(ListQuery {
            name,
            selector,
            order_by,
            ascending,
            page,
            limit,
        })
    }

    /// Filter by labels, then name; sort stably with a name tie-break; count; then cut the requested page.
    /// A page past the end is empty but still reports the full match count.
    pub fn apply<I>(&self, objects: I) -> ListResult<GenericObject>
    where
        I: IntoIterator<Item = GenericObject>,
    {
        let mut matched: Vec<GenericObject> = objects
            .into_iter()
            .filter(|o| self.selector.as_ref().map_or(true, |s| s.matches(o.labels())))
            .filter(|o| self.name.as_ref().map_or(true, |n| n.matches(o.name())))
            .collect();
        matched.sort_by(|a, b| self.compare(a, b));

        let total_items = matched.len();
        let items = if self.limit == 0 {
            matched
        } else {
            let start = (self.page - 1).saturating_mul(self.limit);
            matched.into_iter().skip(start).take(self.limit).collect()
        };
        ListResult { items, total_items }
    }

    fn compare(&self, a: &GenericObject, b: &GenericObject) -> Ordering {
        let primary = match self.order_by {
            SortField::Name => a.name().cmp(b.name()),
            SortField::CreationTimestamp => a.creation_timestamp().cmp(&b.creation_timestamp()),
        };
        let primary = if self.ascending { primary } else { primary.reverse() };
        primary.then_with(|| a.name().cmp(b.name()))
    }
}
