//! Compiles listing filters into SQL predicate fragments plus positional binds.
//!
//! Fragments are fixed `&'static str` snippets; every caller-supplied value
//! travels through the bind list. The compiled filter is shared verbatim by
//! the count and the page query so `total` always matches `items`.

use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteArguments;
use sqlx::Arguments;

/// Optional, independently combinable listing filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovieFilter {
    /// Case-insensitive title substring.
    pub q: Option<String>,
    /// Exact, case-sensitive region code.
    pub region: Option<String>,
    pub year_min: Option<i64>,
    pub year_max: Option<i64>,
    pub min_imdb_votes: i64,
    pub min_douban_votes: i64,
    /// Only applied when strictly positive; rows without a reliability are
    /// then excluded.
    pub min_reliability: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    fragments: Vec<&'static str>,
    params: Vec<FilterValue>,
}

impl CompiledFilter {
    pub fn fragments(&self) -> &[&'static str] {
        &self.fragments
    }

    pub fn params(&self) -> &[FilterValue] {
        &self.params
    }

    /// Fragments joined with `AND`, ready to follow `WHERE`.
    pub fn where_sql(&self) -> String {
        self.fragments.join(" AND ")
    }

    /// Fresh argument list holding the binds in placeholder order.
    pub fn arguments(&self) -> Result<SqliteArguments<'static>> {
        let mut args = SqliteArguments::default();
        for value in &self.params {
            let bound = match value {
                FilterValue::Text(s) => args.add(s.clone()),
                FilterValue::Int(i) => args.add(*i),
                FilterValue::Float(f) => args.add(*f),
            };
            bound.map_err(|e| anyhow!("failed to bind filter value: {e}"))?;
        }
        Ok(args)
    }
}

/// Escape LIKE wildcards so the term matches literally under `ESCAPE '\'`.
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn compile(filter: &MovieFilter) -> CompiledFilter {
    let mut fragments: Vec<&'static str> = vec!["1=1"];
    let mut params: Vec<FilterValue> = Vec::new();

    if let Some(q) = &filter.q {
        fragments.push(r"title_folded LIKE ? ESCAPE '\'");
        params.push(FilterValue::Text(format!(
            "%{}%",
            escape_like(&q.to_lowercase())
        )));
    }

    if let Some(region) = &filter.region {
        fragments.push("region = ?");
        params.push(FilterValue::Text(region.clone()));
    }

    if let Some(year_min) = filter.year_min {
        fragments.push("year >= ?");
        params.push(FilterValue::Int(year_min));
    }

    if let Some(year_max) = filter.year_max {
        fragments.push("year <= ?");
        params.push(FilterValue::Int(year_max));
    }

    fragments.push("COALESCE(imdb_votes, 0) >= ?");
    params.push(FilterValue::Int(filter.min_imdb_votes));

    fragments.push("COALESCE(douban_votes, 0) >= ?");
    params.push(FilterValue::Int(filter.min_douban_votes));

    if filter.min_reliability > 0.0 {
        fragments.push("reliability >= ?");
        params.push(FilterValue::Float(filter.min_reliability));
    }

    CompiledFilter { fragments, params }
}
