//! Tantivy event index
//!
//! Events carry a unique key, exact-match keyword attributes and multi-valued
//! time fields. Time values are stored as decimal millisecond strings by
//! default, or as native `i64` for fields declared numeric.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tantivy::directory::MmapDirectory;
use tantivy::schema::{Field, Schema, Value, INDEXED, STORED, STRING};
use tantivy::{DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::interface::{CoincideError, CoincideResult, MatchSet, TimeWindowRequest};
use crate::query::TimeWindowQuery;
use crate::search::{collect_matches, SearchOptions};
use crate::source::TantivySource;

/// Name of the unique key field
pub const KEY_FIELD: &str = "_id";

const WRITER_HEAP_BYTES: usize = 50_000_000;
const IN_MEMORY_WRITER_HEAP_BYTES: usize = 15_000_000;

/// Field layout of an event index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSchema {
    keyword_fields: Vec<String>,
    time_fields: Vec<String>,
    numeric_time_fields: Vec<String>,
}

impl EventSchema {
    pub fn new<K, T>(keyword_fields: K, time_fields: T) -> CoincideResult<Self>
    where
        K: IntoIterator,
        K::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        let schema = Self {
            keyword_fields: keyword_fields.into_iter().map(Into::into).collect(),
            time_fields: time_fields.into_iter().map(Into::into).collect(),
            numeric_time_fields: Vec::new(),
        };
        schema.check_names()?;
        Ok(schema)
    }

    /// Add a time field stored as a native `i64` instead of text.
    pub fn with_numeric_time_field(mut self, name: impl Into<String>) -> CoincideResult<Self> {
        self.numeric_time_fields.push(name.into());
        self.check_names()?;
        Ok(self)
    }

    fn all_names(&self) -> impl Iterator<Item = &str> {
        self.keyword_fields
            .iter()
            .chain(&self.time_fields)
            .chain(&self.numeric_time_fields)
            .map(String::as_str)
    }

    fn check_names(&self) -> CoincideResult<()> {
        let mut seen = HashSet::new();
        for name in self.all_names() {
            if name.is_empty() || name == KEY_FIELD {
                return Err(CoincideError::config(format!("invalid event field name [{name}]")));
            }
            if !seen.insert(name) {
                return Err(CoincideError::config(format!("event field [{name}] declared twice")));
            }
        }
        Ok(())
    }

    fn is_numeric_time(&self, name: &str) -> bool {
        self.numeric_time_fields.iter().any(|f| f == name)
    }

    fn build(&self) -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field(KEY_FIELD, STRING | STORED);
        for name in &self.keyword_fields {
            builder.add_text_field(name, STRING | STORED);
        }
        // Time values are read back from the store, never searched
        for name in &self.time_fields {
            builder.add_text_field(name, STORED);
        }
        for name in &self.numeric_time_fields {
            builder.add_i64_field(name, STORED | INDEXED);
        }
        builder.build()
    }
}

/// A time value as written to the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTime {
    Millis(i64),
    /// Stored verbatim, whatever it contains
    Text(String),
}

/// One event to index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDocument {
    pub key: String,
    keywords: Vec<(String, String)>,
    times: Vec<(String, EventTime)>,
}

impl EventDocument {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            keywords: Vec::new(),
            times: Vec::new(),
        }
    }

    pub fn keyword(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.keywords.push((field.into(), value.into()));
        self
    }

    /// Append one epoch-millisecond value to a time field.
    pub fn time(mut self, field: impl Into<String>, millis: i64) -> Self {
        self.times.push((field.into(), EventTime::Millis(millis)));
        self
    }

    pub fn at(self, field: impl Into<String>, when: DateTime<Utc>) -> Self {
        self.time(field, when.timestamp_millis())
    }

    /// Append a raw textual value, bypassing any validation.
    pub fn raw_time(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.times.push((field.into(), EventTime::Text(value.into())));
        self
    }
}

/// Tantivy-backed event index
pub struct EventIndex {
    index: Index,
    writer: RwLock<IndexWriter>,
    reader: RwLock<IndexReader>,
    schema: Schema,
    events: EventSchema,
    key_field: Field,
}

impl EventIndex {
    /// Open or create an event index at the given path
    pub fn new(path: &Path, events: EventSchema) -> CoincideResult<Self> {
        std::fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path)?;
        let schema = events.build();
        let index = Index::open_or_create(dir, schema.clone())?;

        let writer = index.writer(WRITER_HEAP_BYTES)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;

        Self::from_parts(index, writer, reader, schema, events)
    }

    /// In-memory index with a single indexing thread, so each commit adds at
    /// most one segment.
    pub fn new_in_memory(events: EventSchema) -> CoincideResult<Self> {
        let schema = events.build();
        let index = Index::create_in_ram(schema.clone());

        let writer = index.writer_with_num_threads(1, IN_MEMORY_WRITER_HEAP_BYTES)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;

        Self::from_parts(index, writer, reader, schema, events)
    }

    fn from_parts(
        index: Index,
        writer: IndexWriter,
        reader: IndexReader,
        schema: Schema,
        events: EventSchema,
    ) -> CoincideResult<Self> {
        let key_field = schema.get_field(KEY_FIELD)?;
        Ok(Self {
            index,
            writer: RwLock::new(writer),
            reader: RwLock::new(reader),
            schema,
            events,
            key_field,
        })
    }

    fn field(&self, name: &str) -> CoincideResult<Field> {
        self.schema
            .get_field(name)
            .map_err(|_| CoincideError::config(format!("unknown event field [{name}]")))
    }

    fn to_document(&self, event: &EventDocument) -> CoincideResult<TantivyDocument> {
        if event.key.is_empty() {
            return Err(CoincideError::config("event key is empty"));
        }
        let mut doc = TantivyDocument::default();
        doc.add_text(self.key_field, &event.key);
        for (name, value) in &event.keywords {
            doc.add_text(self.field(name)?, value);
        }
        for (name, value) in &event.times {
            let field = self.field(name)?;
            match (self.events.is_numeric_time(name), value) {
                (true, EventTime::Millis(millis)) => doc.add_i64(field, *millis),
                (true, EventTime::Text(text)) => {
                    return Err(CoincideError::config(format!(
                        "numeric time field [{name}] cannot hold text [{text}]"
                    )))
                }
                (false, EventTime::Millis(millis)) => doc.add_text(field, millis.to_string()),
                (false, EventTime::Text(text)) => doc.add_text(field, text),
            }
        }
        Ok(doc)
    }

    /// Add or replace the event with the same key
    pub fn add_event(&self, event: &EventDocument) -> CoincideResult<()> {
        let doc = self.to_document(event)?;
        let writer = self.writer.read();
        writer.delete_term(Term::from_field_text(self.key_field, &event.key));
        writer.add_document(doc)?;
        Ok(())
    }

    pub fn add_events<'e>(&self, events: impl IntoIterator<Item = &'e EventDocument>) -> CoincideResult<()> {
        for event in events {
            self.add_event(event)?;
        }
        Ok(())
    }

    pub fn delete_event(&self, key: &str) -> CoincideResult<()> {
        let writer = self.writer.read();
        writer.delete_term(Term::from_field_text(self.key_field, key));
        Ok(())
    }

    /// Commit pending changes and make them visible to new searchers.
    pub fn commit(&self) -> CoincideResult<()> {
        self.writer.write().commit()?;
        self.reader.write().reload()?;
        Ok(())
    }

    pub fn clear(&self) -> CoincideResult<()> {
        let mut writer = self.writer.write();
        writer.delete_all_documents()?;
        writer.commit()?;
        drop(writer);
        self.reader.write().reload()?;
        Ok(())
    }

    /// Get the number of live documents in the index
    pub fn num_docs(&self) -> u64 {
        self.reader.read().searcher().num_docs()
    }

    pub fn num_segments(&self) -> usize {
        self.reader.read().searcher().segment_readers().len()
    }

    /// Point-in-time view. Matches only make sense against the searcher they
    /// were produced from.
    pub fn searcher(&self) -> Searcher {
        self.reader.read().searcher()
    }

    pub fn key_field(&self) -> &str {
        KEY_FIELD
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Resolve `request` now and return a query for the current searcher.
    pub fn time_window_query(&self, request: &TimeWindowRequest) -> CoincideResult<(Searcher, TimeWindowQuery)> {
        let searcher = self.searcher();
        let query = TimeWindowQuery::for_request(&searcher, KEY_FIELD, request)?;
        Ok((searcher, query))
    }

    /// Run the host loop over the current searcher.
    pub fn find_correlated(
        &self,
        request: &TimeWindowRequest,
        options: &SearchOptions,
        token: &CancellationToken,
    ) -> CoincideResult<MatchSet> {
        let searcher = self.searcher();
        let source = TantivySource::new(&searcher, KEY_FIELD);
        collect_matches(&source, request, options, token)
    }

    /// Keys of the correlated events, resolved and fetched from one searcher.
    pub fn correlated_keys(
        &self,
        request: &TimeWindowRequest,
        options: &SearchOptions,
        token: &CancellationToken,
    ) -> CoincideResult<Vec<String>> {
        let searcher = self.searcher();
        let source = TantivySource::new(&searcher, KEY_FIELD);
        let matches = collect_matches(&source, request, options, token)?;
        let keys = matches
            .matches
            .iter()
            .map(|m| self.key_at(&searcher, m.address))
            .collect::<CoincideResult<Vec<_>>>()?;
        debug!(matched = keys.len(), "correlated keys fetched");
        Ok(keys)
    }

    /// Stored key of the document at `address` in `searcher`.
    pub fn key_at(&self, searcher: &Searcher, address: DocAddress) -> CoincideResult<String> {
        let doc: TantivyDocument = searcher.doc(address)?;
        doc.get_first(self.key_field)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| {
                CoincideError::Index(tantivy::TantivyError::InternalError(format!(
                    "document {address:?} has no stored key"
                )))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::MatchCriteria;
    use crate::interface::TargetIdentifier;
    use chrono::TimeZone;

    fn events() -> EventSchema {
        EventSchema::new(["user", "host"], ["login_at", "logout_at"]).unwrap()
    }

    fn request(target: &str) -> TimeWindowRequest {
        let criteria = MatchCriteria::parse(&["login_at"], 1, 1000).unwrap();
        TimeWindowRequest::new(TargetIdentifier::key(target), criteria).unwrap()
    }

    fn keys(index: &EventIndex, target: &str) -> Vec<String> {
        index
            .correlated_keys(&request(target), &SearchOptions::default(), &CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn test_index_creation() {
        let index = EventIndex::new_in_memory(events()).unwrap();
        assert_eq!(index.num_docs(), 0);
        assert_eq!(index.key_field(), "_id");
    }

    #[test]
    fn test_schema_rejects_bad_names() {
        assert!(EventSchema::new(["_id"], ["t"]).is_err());
        assert!(EventSchema::new(["a"], ["a"]).is_err());
        assert!(EventSchema::new(Vec::<String>::new(), [""]).is_err());
        assert!(events().with_numeric_time_field("login_at").is_err());
    }

    #[test]
    fn test_delete_event() {
        let index = EventIndex::new_in_memory(events()).unwrap();

        index.add_event(&EventDocument::new("e1").time("login_at", 1000)).unwrap();
        index.commit().unwrap();
        assert_eq!(index.num_docs(), 1);

        index.delete_event("e1").unwrap();
        index.commit().unwrap();
        assert_eq!(index.num_docs(), 0);
    }

    #[test]
    fn test_upsert_semantics() {
        let index = EventIndex::new_in_memory(events()).unwrap();

        index.add_event(&EventDocument::new("e1").time("login_at", 1000)).unwrap();
        index.commit().unwrap();
        assert_eq!(index.num_docs(), 1);

        // Same key replaces, not duplicates
        index.add_event(&EventDocument::new("e1").time("login_at", 2000)).unwrap();
        index.commit().unwrap();
        assert_eq!(index.num_docs(), 1);
    }

    #[test]
    fn test_clear() {
        let index = EventIndex::new_in_memory(events()).unwrap();

        for i in 0..10 {
            index.add_event(&EventDocument::new(format!("e{i}")).time("login_at", i * 1000)).unwrap();
        }
        index.commit().unwrap();
        assert_eq!(index.num_docs(), 10);

        index.clear().unwrap();
        assert_eq!(index.num_docs(), 0);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let index = EventIndex::new_in_memory(events()).unwrap();
        let err = index.add_event(&EventDocument::new("e1").time("nope", 1)).unwrap_err();
        assert!(matches!(err, CoincideError::Configuration(_)));
        assert!(index.add_event(&EventDocument::new("")).is_err());
    }

    #[test]
    fn test_commits_add_segments() {
        let index = EventIndex::new_in_memory(events()).unwrap();
        index.add_event(&EventDocument::new("a").time("login_at", 0)).unwrap();
        index.commit().unwrap();
        index.add_event(&EventDocument::new("b").time("login_at", 0)).unwrap();
        index.commit().unwrap();
        assert_eq!(index.num_segments(), 2);
    }

    #[test]
    fn test_datetime_values_stored_as_millis() {
        let index = EventIndex::new_in_memory(events()).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        index.add_event(&EventDocument::new("a").at("login_at", t0)).unwrap();
        index
            .add_event(&EventDocument::new("b").at("login_at", t0 + chrono::Duration::milliseconds(800)))
            .unwrap();
        index
            .add_event(&EventDocument::new("c").at("login_at", t0 + chrono::Duration::seconds(5)))
            .unwrap();
        index.commit().unwrap();
        assert_eq!(keys(&index, "a"), vec!["b".to_string()]);
    }

    #[test]
    fn test_numeric_time_field() {
        let schema = EventSchema::new(["user"], Vec::<String>::new())
            .unwrap()
            .with_numeric_time_field("login_at")
            .unwrap();
        let index = EventIndex::new_in_memory(schema).unwrap();
        index.add_event(&EventDocument::new("a").time("login_at", 10_000)).unwrap();
        index.add_event(&EventDocument::new("b").time("login_at", 10_900)).unwrap();
        index.add_event(&EventDocument::new("c").time("login_at", 12_000)).unwrap();
        index.commit().unwrap();
        assert_eq!(keys(&index, "a"), vec!["b".to_string()]);

        let err = index.add_event(&EventDocument::new("d").raw_time("login_at", "soon")).unwrap_err();
        assert!(matches!(err, CoincideError::Configuration(_)));
    }

    #[test]
    fn test_on_disk_index_reopens() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = EventIndex::new(dir.path(), events()).unwrap();
            index.add_event(&EventDocument::new("a").time("login_at", 1000)).unwrap();
            index.add_event(&EventDocument::new("b").time("login_at", 1500)).unwrap();
            index.commit().unwrap();
        }
        let index = EventIndex::new(dir.path(), events()).unwrap();
        assert_eq!(index.num_docs(), 2);
        assert_eq!(keys(&index, "b"), vec!["a".to_string()]);
    }
}
