//! Content store: durable keyed storage for indexable items

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::database::{parse_iso, to_iso, Database};
use super::error::{SearchError, SearchResult};
use super::types::{
    ContentType, IndexedItem, ItemKey, ItemMetadata, NewItem, ScoredItem, SearchFilters,
};

/// Relative weight of each indexed field in full-text ranking
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldWeights {
    pub title: f64,
    pub body: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            title: 2.0,
            body: 1.0,
        }
    }
}

/// Store of indexed items with a ranked full-text primitive
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Insert or update the item keyed by `(content_type, content_id)` as a
    /// single atomic statement
    async fn upsert(&self, item: NewItem) -> SearchResult<IndexedItem>;

    async fn get(&self, key: &ItemKey) -> SearchResult<Option<IndexedItem>>;

    /// Remove an item; returns whether a row existed
    async fn remove(&self, key: &ItemKey) -> SearchResult<bool>;

    /// Rank items matching every term in `terms`, after applying `filters`.
    ///
    /// Scores are in the store's native units, larger is better. Snippets
    /// are left empty for the caller to fill.
    async fn rank_text(
        &self,
        terms: &[String],
        weights: FieldWeights,
        filters: &SearchFilters,
        limit: usize,
    ) -> SearchResult<Vec<ScoredItem>>;

    /// All items satisfying `filters` that carry an embedding
    async fn scan_embedded(&self, filters: &SearchFilters) -> SearchResult<Vec<IndexedItem>>;

    async fn count(&self) -> SearchResult<usize>;

    fn store_name(&self) -> &str;
}

const ITEM_COLUMNS: &str = "i.content_type, i.content_id, i.encounter_id, i.title, i.body, \
                            i.metadata, i.embedding, i.created_at, i.updated_at";

/// SQLite implementation backed by an FTS5 external-content table
#[derive(Clone)]
pub struct SqliteContentStore {
    db: Database,
}

impl SqliteContentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Upsert with an explicit timestamp
    pub async fn upsert_at(&self, item: NewItem, now: DateTime<Utc>) -> SearchResult<IndexedItem> {
        let ts = to_iso(now);
        self.db
            .call(move |conn| {
                let metadata = serde_json::to_string(&item.metadata)?;
                let embedding = item.embedding.as_deref().map(embedding_to_blob);
                conn.execute(
                    "INSERT INTO indexed_items
                        (content_type, content_id, encounter_id, title, body, metadata,
                         embedding, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                     ON CONFLICT (content_type, content_id) DO UPDATE SET
                        encounter_id = excluded.encounter_id,
                        title = excluded.title,
                        body = excluded.body,
                        metadata = excluded.metadata,
                        embedding = excluded.embedding,
                        updated_at = excluded.updated_at",
                    params![
                        item.content_type.as_str(),
                        item.content_id,
                        item.encounter_id,
                        item.title,
                        item.text,
                        metadata,
                        embedding,
                        ts
                    ],
                )?;
                let key = ItemKey::new(item.content_type, item.content_id);
                let stored = find_item(conn, &key)?.ok_or_else(|| {
                    SearchError::ProviderUnavailable(format!(
                        "item {key} vanished after upsert"
                    ))
                })?;
                Ok(stored)
            })
            .await
    }
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn upsert(&self, item: NewItem) -> SearchResult<IndexedItem> {
        self.upsert_at(item, Utc::now()).await
    }

    async fn get(&self, key: &ItemKey) -> SearchResult<Option<IndexedItem>> {
        let key = key.clone();
        self.db.call(move |conn| Ok(find_item(conn, &key)?)).await
    }

    async fn remove(&self, key: &ItemKey) -> SearchResult<bool> {
        let key = key.clone();
        self.db
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM indexed_items WHERE content_type = ?1 AND content_id = ?2",
                    params![key.content_type.as_str(), key.content_id],
                )?;
                Ok(removed > 0)
            })
            .await
    }

    async fn rank_text(
        &self,
        terms: &[String],
        weights: FieldWeights,
        filters: &SearchFilters,
        limit: usize,
    ) -> SearchResult<Vec<ScoredItem>> {
        if terms.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let match_expr = match_expression(terms);
        let filters = filters.clone();
        self.db
            .call(move |conn| {
                let mut sql = format!(
                    "SELECT {ITEM_COLUMNS},
                            bm25(indexed_items_fts, ?, ?) AS bm25_score
                     FROM indexed_items_fts
                     JOIN indexed_items i ON i.id = indexed_items_fts.rowid
                     WHERE indexed_items_fts MATCH ?"
                );
                let mut values = vec![
                    Value::Real(weights.title),
                    Value::Real(weights.body),
                    Value::Text(match_expr),
                ];
                push_filters(&mut sql, &mut values, &filters);
                sql.push_str(" ORDER BY bm25_score ASC, i.id ASC LIMIT ?");
                values.push(Value::Integer(limit.min(i64::MAX as usize) as i64));

                let mut stmt = conn.prepare(&sql)?;
                let hits = stmt
                    .query_map(params_from_iter(values), |row| {
                        let item = row_to_item(row)?;
                        let bm25: f64 = row.get(9)?;
                        Ok(ScoredItem {
                            item,
                            // bm25() is smaller-is-better and negative for matches
                            score: -bm25,
                            snippet: String::new(),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(hits)
            })
            .await
    }

    async fn scan_embedded(&self, filters: &SearchFilters) -> SearchResult<Vec<IndexedItem>> {
        let filters = filters.clone();
        self.db
            .call(move |conn| {
                let mut sql = format!(
                    "SELECT {ITEM_COLUMNS} FROM indexed_items i WHERE i.embedding IS NOT NULL"
                );
                let mut values = Vec::new();
                push_filters(&mut sql, &mut values, &filters);
                sql.push_str(" ORDER BY i.id ASC");

                let mut stmt = conn.prepare(&sql)?;
                let items = stmt
                    .query_map(params_from_iter(values), row_to_item)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await
    }

    async fn count(&self) -> SearchResult<usize> {
        self.db
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM indexed_items", [], |row| row.get(0))?;
                Ok(count.max(0) as usize)
            })
            .await
    }

    fn store_name(&self) -> &str {
        "sqlite-fts5"
    }
}

/// Quote every term so user input is never parsed as FTS5 query syntax.
/// Adjacent quoted strings are an implicit AND.
fn match_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn push_filters(sql: &mut String, values: &mut Vec<Value>, filters: &SearchFilters) {
    if let Some(encounter_id) = filters.encounter_id {
        sql.push_str(" AND i.encounter_id = ?");
        values.push(Value::Integer(encounter_id));
    }
    if let Some(types) = filters.content_type_set() {
        let placeholders = vec!["?"; types.len()].join(", ");
        sql.push_str(&format!(" AND i.content_type IN ({placeholders})"));
        values.extend(types.iter().map(|t| Value::Text(t.as_str().to_string())));
    }
    let (from, until) = filters.created_bounds();
    if let Some(from) = from {
        sql.push_str(" AND i.created_at >= ?");
        values.push(Value::Text(from));
    }
    if let Some(until) = until {
        sql.push_str(" AND i.created_at < ?");
        values.push(Value::Text(until));
    }
}

fn find_item(conn: &Connection, key: &ItemKey) -> rusqlite::Result<Option<IndexedItem>> {
    conn.query_row(
        &format!(
            "SELECT {ITEM_COLUMNS} FROM indexed_items i
             WHERE i.content_type = ?1 AND i.content_id = ?2"
        ),
        params![key.content_type.as_str(), key.content_id],
        row_to_item,
    )
    .optional()
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<IndexedItem> {
    let content_type: String = row.get(0)?;
    let content_type = content_type
        .parse::<ContentType>()
        .map_err(|e| conversion_error(0, e))?;
    let metadata: String = row.get(5)?;
    let metadata: ItemMetadata =
        serde_json::from_str(&metadata).map_err(|e| conversion_error(5, e))?;
    let embedding: Option<Vec<u8>> = row.get(6)?;

    Ok(IndexedItem {
        content_type,
        content_id: row.get(1)?,
        encounter_id: row.get(2)?,
        title: row.get(3)?,
        text: row.get(4)?,
        metadata,
        embedding: embedding.map(|blob| blob_to_embedding(&blob)),
        created_at: timestamp_column(row, 7)?,
        updated_at: timestamp_column(row, 8)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_iso(&raw).ok_or_else(|| {
        conversion_error(
            idx,
            std::io::Error::new(std::io::ErrorKind::InvalidData, format!("bad timestamp {raw}")),
        )
    })
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::test_support::{memory_store as store, new_item};
    use chrono::TimeZone;

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_key() {
        let store = store();
        let first = store
            .upsert(new_item(ContentType::Soap, "n1", "SOAP Note", "patient reports dizziness"))
            .await
            .unwrap();
        let second = store
            .upsert(new_item(ContentType::Soap, "n1", "SOAP Note", "patient reports nausea"))
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(second.text, "patient reports nausea");
        assert_eq!(first.created_at, second.created_at);

        // The full-text index follows the update
        let stale = store
            .rank_text(
                &terms(&["dizziness"]),
                FieldWeights::default(),
                &SearchFilters::default(),
                10,
            )
            .await
            .unwrap();
        assert!(stale.is_empty());
        let fresh = store
            .rank_text(&terms(&["nausea"]), FieldWeights::default(), &SearchFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[tokio::test]
    async fn test_same_id_different_type_are_distinct() {
        let store = store();
        store
            .upsert(new_item(ContentType::Soap, "7", "a", "some clinical text"))
            .await
            .unwrap();
        store
            .upsert(new_item(ContentType::Note, "7", "b", "some clinical text"))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_title_outranks_body() {
        let store = store();
        store
            .upsert(new_item(
                ContentType::Note,
                "body",
                "Follow-up visit",
                "discussed headache frequency and triggers at length",
            ))
            .await
            .unwrap();
        store
            .upsert(new_item(
                ContentType::Note,
                "title",
                "Headache protocol",
                "discussed frequency and triggers at length today",
            ))
            .await
            .unwrap();

        let hits = store
            .rank_text(
                &terms(&["headache"]),
                FieldWeights {
                    title: 10.0,
                    body: 1.0,
                },
                &SearchFilters::default(),
                10,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].item.content_id, "title");
        assert!(hits[0].score >= hits[1].score);
        assert!(hits.iter().all(|h| h.score > 0.0));
    }

    #[tokio::test]
    async fn test_rank_text_applies_filters() {
        let store = store();
        let mut other =
            new_item(ContentType::Transcript, "t2", "Segment", "blood pressure is elevated");
        other.encounter_id = 2;
        store.upsert(other).await.unwrap();
        store
            .upsert(new_item(ContentType::Transcript, "t1", "Segment", "blood pressure is normal"))
            .await
            .unwrap();
        store
            .upsert(new_item(ContentType::Soap, "s1", "SOAP", "blood pressure recheck planned"))
            .await
            .unwrap();

        let filters = SearchFilters {
            encounter_id: Some(1),
            content_types: Some(vec![ContentType::Transcript]),
            ..Default::default()
        };
        let hits = store
            .rank_text(&terms(&["pressure"]), FieldWeights::default(), &filters, 10)
            .await
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.item.content_id.as_str()).collect();
        assert_eq!(ids, vec!["t1"]);
    }

    #[tokio::test]
    async fn test_date_range_is_inclusive() {
        let store = store();
        let day = |d: u32| Utc.with_ymd_and_hms(2024, 3, d, 23, 30, 0).unwrap();
        store
            .upsert_at(new_item(ContentType::Note, "a", "Note", "wound healing well"), day(1))
            .await
            .unwrap();
        store
            .upsert_at(new_item(ContentType::Note, "b", "Note", "wound healing slowly"), day(2))
            .await
            .unwrap();
        store
            .upsert_at(new_item(ContentType::Note, "c", "Note", "wound healing poorly"), day(3))
            .await
            .unwrap();

        let filters = SearchFilters {
            date_from: chrono::NaiveDate::from_ymd_opt(2024, 3, 2),
            date_to: chrono::NaiveDate::from_ymd_opt(2024, 3, 2),
            ..Default::default()
        };
        let hits = store
            .rank_text(&terms(&["wound"]), FieldWeights::default(), &filters, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item.content_id, "b");
    }

    #[tokio::test]
    async fn test_query_syntax_is_not_interpreted() {
        let store = store();
        store
            .upsert(new_item(ContentType::Note, "q", "Note", "patient said \"OR\" twice"))
            .await
            .unwrap();
        let hits = store
            .rank_text(
                &terms(&["OR", "NEAR("]),
                FieldWeights::default(),
                &SearchFilters::default(),
                10,
            )
            .await;
        assert!(hits.is_ok());
    }

    #[tokio::test]
    async fn test_embeddings_round_trip_and_scan_skips_missing() {
        let store = store();
        let mut with_vec =
            new_item(ContentType::Checklist, "c1", "Allergies", "no known drug allergies");
        with_vec.embedding = Some(vec![0.25, -1.5, 3.0]);
        store.upsert(with_vec).await.unwrap();
        store
            .upsert(new_item(ContentType::Checklist, "c2", "Meds", "takes lisinopril daily"))
            .await
            .unwrap();

        let scanned = store.scan_embedded(&SearchFilters::default()).await.unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].embedding.as_deref(), Some(&[0.25, -1.5, 3.0][..]));
    }

    #[tokio::test]
    async fn test_remove_deletes_from_index() {
        let store = store();
        store
            .upsert(new_item(ContentType::Note, "gone", "Note", "temporary content here"))
            .await
            .unwrap();
        let key = ItemKey::new(ContentType::Note, "gone");

        assert!(store.remove(&key).await.unwrap());
        assert!(!store.remove(&key).await.unwrap());
        assert!(store.get(&key).await.unwrap().is_none());
        let hits = store
            .rank_text(
                &terms(&["temporary"]),
                FieldWeights::default(),
                &SearchFilters::default(),
                10,
            )
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_is_persisted() {
        let store = store();
        let mut item =
            new_item(ContentType::Transcript, "seg", "Segment", "I have had a cough for a week");
        item.metadata = ItemMetadata::new()
            .with(ItemMetadata::SPEAKER, "patient")
            .with(ItemMetadata::START_TIME, 12.5);
        store.upsert(item).await.unwrap();

        let stored = store
            .get(&ItemKey::new(ContentType::Transcript, "seg"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.metadata.speaker(), Some("patient"));
        assert_eq!(stored.metadata.get_f64(ItemMetadata::START_TIME), Some(12.5));
    }
}
