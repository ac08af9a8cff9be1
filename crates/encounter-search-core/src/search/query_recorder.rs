//! Search audit trail and analytics

use std::collections::BTreeMap;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::database::{parse_iso, to_iso, Database};
use super::error::{SearchError, SearchResult};
use super::types::{
    AnalyticsSummary, CachedResult, ContentType, FusedResult, QueryFrequency, SearchFilters,
    SearchInvocation, SearchType,
};

/// Number of entries in `AnalyticsSummary::top_queries`
const TOP_QUERIES: usize = 10;

/// Bucket for searches that did not restrict content types
pub const ALL_CONTENT_TYPES: &str = "all";

/// Persists every search with its ranked results
#[derive(Clone)]
pub struct QueryRecorder {
    db: Database,
}

struct CachedRow {
    content_type: ContentType,
    content_id: String,
    combined_score: f64,
    snippet: String,
    search_type: SearchType,
}

impl QueryRecorder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store the invocation and its results (ranked 1..n in the given
    /// order) in one transaction. Returns the invocation id.
    pub async fn record(
        &self,
        invocation: &SearchInvocation,
        results: &[FusedResult],
    ) -> SearchResult<String> {
        let invocation = invocation.clone();
        let rows: Vec<CachedRow> = results
            .iter()
            .map(|r| CachedRow {
                content_type: r.item.content_type,
                content_id: r.item.content_id.clone(),
                combined_score: r.combined_score,
                snippet: r.snippet.clone(),
                search_type: r.search_type,
            })
            .collect();

        self.db
            .call(move |conn| {
                let content_types = match invocation.filters.content_type_set() {
                    Some(types) => Some(serde_json::to_string(
                        &types.iter().map(ContentType::as_str).collect::<Vec<_>>(),
                    )?),
                    None => None,
                };

                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO search_invocations
                        (id, query_text, encounter_id, content_types, date_from, date_to,
                         requested_by, result_count, execution_time_ms, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        invocation.id,
                        invocation.query_text,
                        invocation.filters.encounter_id,
                        content_types,
                        invocation.filters.date_from.map(|d| d.to_string()),
                        invocation.filters.date_to.map(|d| d.to_string()),
                        invocation.requested_by,
                        invocation.result_count as i64,
                        invocation.execution_time_ms.min(i64::MAX as u64) as i64,
                        to_iso(invocation.created_at),
                    ],
                )?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO cached_results
                            (invocation_id, content_type, content_id, combined_score, rank,
                             snippet, search_type)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    )?;
                    for (idx, row) in rows.iter().enumerate() {
                        stmt.execute(params![
                            invocation.id,
                            row.content_type.as_str(),
                            row.content_id,
                            row.combined_score,
                            (idx + 1) as i64,
                            row.snippet,
                            row.search_type.as_str(),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(invocation.id)
            })
            .await
    }

    pub async fn invocation(&self, invocation_id: &str) -> SearchResult<Option<SearchInvocation>> {
        let invocation_id = invocation_id.to_string();
        self.db
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, query_text, encounter_id, content_types, date_from, date_to,
                                requested_by, result_count, execution_time_ms, created_at
                         FROM search_invocations WHERE id = ?1",
                        params![invocation_id],
                        row_to_invocation,
                    )
                    .optional()?)
            })
            .await
    }

    /// Ranked results cached for an invocation, best first
    pub async fn cached_results(&self, invocation_id: &str) -> SearchResult<Vec<CachedResult>> {
        let invocation_id = invocation_id.to_string();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT invocation_id, content_type, content_id, combined_score, rank,
                            snippet, search_type
                     FROM cached_results WHERE invocation_id = ?1 ORDER BY rank ASC",
                )?;
                let results = stmt
                    .query_map(params![invocation_id], row_to_cached)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(results)
            })
            .await
    }

    /// Activity over the last `period_days` days.
    ///
    /// Periods reaching back before the Unix epoch start at the epoch.
    pub async fn analytics(&self, period_days: u32) -> SearchResult<AnalyticsSummary> {
        if period_days == 0 {
            return Err(SearchError::Validation(
                "analytics period must be at least one day".to_string(),
            ));
        }
        let since = Utc::now()
            .checked_sub_signed(ChronoDuration::days(i64::from(period_days)))
            .map_or(DateTime::<Utc>::UNIX_EPOCH, |since| {
                since.max(DateTime::<Utc>::UNIX_EPOCH)
            });
        self.analytics_since(since).await
    }

    /// Activity of invocations created at or after `since`
    pub async fn analytics_since(&self, since: DateTime<Utc>) -> SearchResult<AnalyticsSummary> {
        let since = to_iso(since);
        self.db.call(move |conn| summarize(conn, &since)).await
    }
}

fn summarize(conn: &Connection, since: &str) -> SearchResult<AnalyticsSummary> {
    let (total, avg): (i64, Option<f64>) = conn.query_row(
        "SELECT COUNT(*), AVG(execution_time_ms) FROM search_invocations WHERE created_at >= ?1",
        params![since],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT query_text, COUNT(*) AS uses FROM search_invocations
         WHERE created_at >= ?1
         GROUP BY query_text
         ORDER BY uses DESC, query_text ASC
         LIMIT ?2",
    )?;
    let top_queries = stmt
        .query_map(params![since, TOP_QUERIES as i64], |row| {
            let count: i64 = row.get(1)?;
            Ok(QueryFrequency {
                query: row.get(0)?,
                count: count.max(0) as u64,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut distribution: BTreeMap<String, u64> = BTreeMap::new();
    let mut stmt =
        conn.prepare("SELECT content_types FROM search_invocations WHERE created_at >= ?1")?;
    let mut rows = stmt.query(params![since])?;
    while let Some(row) = rows.next()? {
        let raw: Option<String> = row.get(0)?;
        let types: Vec<String> = match raw {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        if types.is_empty() {
            *distribution.entry(ALL_CONTENT_TYPES.to_string()).or_default() += 1;
        } else {
            for content_type in types {
                *distribution.entry(content_type).or_default() += 1;
            }
        }
    }

    Ok(AnalyticsSummary {
        total_searches: total.max(0) as u64,
        avg_execution_time_ms: avg.unwrap_or(0.0),
        top_queries,
        content_type_distribution: distribution,
    })
}

fn row_to_invocation(row: &Row<'_>) -> rusqlite::Result<SearchInvocation> {
    let content_types: Option<String> = row.get(3)?;
    let content_types = match content_types {
        Some(raw) => {
            let names: Vec<String> = serde_json::from_str(&raw).map_err(|e| bad_column(3, e))?;
            let parsed = names
                .iter()
                .map(|name| name.parse::<ContentType>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| bad_column(3, e))?;
            Some(parsed)
        }
        None => None,
    };
    let result_count: i64 = row.get(7)?;
    let execution_time_ms: i64 = row.get(8)?;
    let created_at: String = row.get(9)?;

    Ok(SearchInvocation {
        id: row.get(0)?,
        query_text: row.get(1)?,
        filters: SearchFilters {
            encounter_id: row.get(2)?,
            content_types,
            date_from: date_column(row, 4)?,
            date_to: date_column(row, 5)?,
        },
        requested_by: row.get(6)?,
        result_count: result_count.max(0) as usize,
        execution_time_ms: execution_time_ms.max(0) as u64,
        created_at: parse_iso(&created_at).ok_or_else(|| {
            bad_column(
                9,
                SearchError::Validation(format!("bad timestamp {created_at}")),
            )
        })?,
    })
}

fn row_to_cached(row: &Row<'_>) -> rusqlite::Result<CachedResult> {
    let content_type: String = row.get(1)?;
    let search_type: String = row.get(6)?;
    let rank: i64 = row.get(4)?;

    Ok(CachedResult {
        invocation_id: row.get(0)?,
        content_type: content_type.parse().map_err(|e| bad_column(1, e))?,
        content_id: row.get(2)?,
        combined_score: row.get(3)?,
        rank: rank.clamp(0, i64::from(u32::MAX)) as u32,
        snippet: row.get(5)?,
        search_type: search_type.parse().map_err(|e| bad_column(6, e))?,
    })
}

fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| value.parse::<NaiveDate>().map_err(|e| bad_column(idx, e)))
        .transpose()
}

fn bad_column<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}
