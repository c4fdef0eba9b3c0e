//! Collaborator seams the matcher depends on: exact-match lookup, stored
//! document fetch and segment enumeration.
//!
//! `TantivySource` implements them over a tantivy `Searcher`.
//! `MemorySource` (tests and the `test-support` feature) implements them
//! over plain vectors so the pipeline can be observed call by call.

#[cfg(any(test, feature = "test-support"))]
use std::collections::HashMap;

use tantivy::collector::DocSetCollector;
use tantivy::query::TermQuery;
use tantivy::schema::{Field, FieldType, IndexRecordOption, Schema};
use tantivy::store::StoreReader;
use tantivy::index::SegmentId;
use tantivy::{DocAddress, DocId, Searcher, SegmentReader, TantivyDocument, Term};
use tracing::{debug, warn};

use crate::interface::{CoincideError, CoincideResult, GlobalOrdinal};
use crate::record::{RawDocument, RawValue};

/// Stored-field blocks kept hot per segment scan. Candidates are read in
/// ascending order, so one block is enough.
const STORE_CACHE_BLOCKS: usize = 1;

/// Per-segment enumeration data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    pub ord: u32,
    pub max_doc: DocId,
    pub base: u64,
}

impl SegmentInfo {
    pub fn global(&self, doc: DocId) -> GlobalOrdinal {
        GlobalOrdinal::new(self.base, doc)
    }
}

/// Lookup and fetch against the top-level (whole index) view.
pub trait TargetSource {
    /// Field used for `TargetIdentifier::Key` lookups
    fn key_field(&self) -> &str;

    /// Exact-match lookup. When several documents match, any one of them may
    /// be returned.
    fn lookup(&self, field: &str, value: &str) -> CoincideResult<Option<GlobalOrdinal>>;

    fn fetch(&self, ordinal: GlobalOrdinal, fields: &[&str]) -> CoincideResult<RawDocument>;

    /// Reject criteria fields that can never be read back. Sources without a
    /// schema accept every field.
    fn validate_fields(&self, _fields: &[&str]) -> CoincideResult<()> {
        Ok(())
    }
}

/// Segment enumeration for the scan phase.
pub trait SegmentSource: Sync {
    fn segments(&self) -> Vec<SegmentInfo>;

    fn open_segment(&self, ord: u32) -> CoincideResult<Box<dyn SegmentDocs + '_>>;
}

/// One opened segment.
pub trait SegmentDocs {
    fn info(&self) -> SegmentInfo;

    /// Deleted documents are not live and never become candidates.
    fn is_alive(&self, doc: DocId) -> bool;

    fn fetch(&self, doc: DocId, fields: &[&str]) -> CoincideResult<RawDocument>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Segment layout
// ─────────────────────────────────────────────────────────────────────────────

/// Base offsets of every segment of one searcher, captured at resolution
/// time so per-segment scorers can translate local doc ids.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentLayout {
    slots: Vec<(SegmentId, SegmentInfo)>,
}

impl SegmentLayout {
    pub fn from_searcher(searcher: &Searcher) -> Self {
        let mut base = 0u64;
        let slots = searcher
            .segment_readers()
            .iter()
            .enumerate()
            .map(|(ord, reader)| {
                let info = SegmentInfo {
                    ord: ord as u32,
                    max_doc: reader.max_doc(),
                    base,
                };
                base += u64::from(reader.max_doc());
                (reader.segment_id(), info)
            })
            .collect();
        Self { slots }
    }

    pub fn infos(&self) -> Vec<SegmentInfo> {
        self.slots.iter().map(|(_, info)| *info).collect()
    }

    pub fn by_segment_id(&self, id: SegmentId) -> Option<SegmentInfo> {
        self.slots.iter().find(|(sid, _)| *sid == id).map(|(_, info)| *info)
    }

    pub fn by_ord(&self, ord: u32) -> Option<SegmentInfo> {
        self.slots.get(ord as usize).map(|(_, info)| *info)
    }

    /// Translate a global ordinal back to the segment that holds it.
    pub fn locate(&self, ordinal: GlobalOrdinal) -> Option<DocAddress> {
        self.slots.iter().find_map(|(_, info)| {
            let end = info.base + u64::from(info.max_doc);
            (ordinal.0 >= info.base && ordinal.0 < end)
                .then(|| DocAddress::new(info.ord, (ordinal.0 - info.base) as DocId))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// tantivy
// ─────────────────────────────────────────────────────────────────────────────

/// Document source over one tantivy searcher (one point-in-time view).
pub struct TantivySource<'a> {
    searcher: &'a Searcher,
    key_field: &'a str,
    layout: SegmentLayout,
}

impl<'a> TantivySource<'a> {
    pub fn new(searcher: &'a Searcher, key_field: &'a str) -> Self {
        Self {
            searcher,
            key_field,
            layout: SegmentLayout::from_searcher(searcher),
        }
    }

    pub fn layout(&self) -> &SegmentLayout {
        &self.layout
    }

    fn schema(&self) -> &Schema {
        self.searcher.schema()
    }

    /// Build the exact-match term for `value`, or `None` when the field
    /// cannot answer exact lookups.
    fn exact_term(&self, field: Field, name: &str, value: &str) -> CoincideResult<Option<Term>> {
        let entry = self.schema().get_field_entry(field);
        if !entry.is_indexed() {
            debug!(field = name, "lookup field is not indexed");
            return Ok(None);
        }
        let term = match entry.field_type() {
            FieldType::Str(options) => {
                let raw = options
                    .get_indexing_options()
                    .map(|o| o.tokenizer() == "raw")
                    .unwrap_or(false);
                if !raw {
                    debug!(field = name, "lookup field is tokenized, not exact-match");
                    return Ok(None);
                }
                Term::from_field_text(field, value)
            }
            FieldType::I64(_) => Term::from_field_i64(field, parse_lookup(name, value)?),
            FieldType::U64(_) => {
                let v = value.parse::<u64>().map_err(|_| bad_lookup(name, value))?;
                Term::from_field_u64(field, v)
            }
            FieldType::Date(_) => {
                let millis = parse_lookup(name, value)?;
                Term::from_field_date(field, tantivy::DateTime::from_timestamp_millis(millis))
            }
            _ => {
                debug!(field = name, "lookup field type has no exact-match support");
                return Ok(None);
            }
        };
        Ok(Some(term))
    }

    fn global(&self, address: DocAddress) -> CoincideResult<GlobalOrdinal> {
        self.layout
            .by_ord(address.segment_ord)
            .map(|info| info.global(address.doc_id))
            .ok_or_else(|| {
                CoincideError::Index(tantivy::TantivyError::InternalError(format!(
                    "segment {} missing from layout",
                    address.segment_ord
                )))
            })
    }
}

fn parse_lookup(name: &str, value: &str) -> CoincideResult<i64> {
    value.parse::<i64>().map_err(|_| bad_lookup(name, value))
}

fn bad_lookup(name: &str, value: &str) -> CoincideError {
    CoincideError::config(format!("value [{value}] is not valid for field [{name}]"))
}

/// Copy the requested stored fields of a tantivy document.
pub(crate) fn raw_document(schema: &Schema, doc: &TantivyDocument, fields: &[&str]) -> RawDocument {
    let mut raw = RawDocument::new();
    for name in fields {
        // Checked by validate_fields before any scan; skipped here.
        if let Ok(field) = schema.get_field(name) {
            for value in doc.get_all(field) {
                raw.push(name, RawValue::from_stored(value));
            }
        }
    }
    raw
}

impl TargetSource for TantivySource<'_> {
    fn key_field(&self) -> &str {
        self.key_field
    }

    fn lookup(&self, field: &str, value: &str) -> CoincideResult<Option<GlobalOrdinal>> {
        let schema_field = self
            .schema()
            .get_field(field)
            .map_err(|_| CoincideError::config(format!("unknown field [{field}]")))?;
        let Some(term) = self.exact_term(schema_field, field, value)? else {
            return Ok(None);
        };

        let query = TermQuery::new(term, IndexRecordOption::Basic);
        let hits = self.searcher.search(&query, &DocSetCollector)?;
        if hits.len() > 1 {
            warn!(field, value, hits = hits.len(), "target lookup matched several documents, using one arbitrarily");
        }
        match hits.into_iter().min() {
            Some(address) => Ok(Some(self.global(address)?)),
            None => Ok(None),
        }
    }

    fn fetch(&self, ordinal: GlobalOrdinal, fields: &[&str]) -> CoincideResult<RawDocument> {
        let address = self.layout.locate(ordinal).ok_or_else(|| {
            CoincideError::Index(tantivy::TantivyError::InvalidArgument(format!(
                "ordinal {ordinal} is outside the searcher"
            )))
        })?;
        let doc: TantivyDocument = self.searcher.doc(address)?;
        Ok(raw_document(self.schema(), &doc, fields))
    }

    fn validate_fields(&self, fields: &[&str]) -> CoincideResult<()> {
        for name in fields {
            let field = self
                .schema()
                .get_field(name)
                .map_err(|_| CoincideError::config(format!("unknown field [{name}]")))?;
            if !self.schema().get_field_entry(field).is_stored() {
                return Err(CoincideError::config(format!("field [{name}] is not stored")));
            }
        }
        Ok(())
    }
}

impl SegmentSource for TantivySource<'_> {
    fn segments(&self) -> Vec<SegmentInfo> {
        self.layout.infos()
    }

    fn open_segment(&self, ord: u32) -> CoincideResult<Box<dyn SegmentDocs + '_>> {
        let info = self.layout.by_ord(ord).ok_or_else(|| {
            CoincideError::Index(tantivy::TantivyError::InvalidArgument(format!(
                "no segment with ordinal {ord}"
            )))
        })?;
        let reader = self.searcher.segment_reader(ord);
        Ok(Box::new(TantivySegment::open(reader, info)?))
    }
}

/// One tantivy segment with its own stored-field reader.
pub struct TantivySegment<'a> {
    reader: &'a SegmentReader,
    store: StoreReader,
    info: SegmentInfo,
}

impl<'a> TantivySegment<'a> {
    pub fn open(reader: &'a SegmentReader, info: SegmentInfo) -> CoincideResult<Self> {
        let store = reader.get_store_reader(STORE_CACHE_BLOCKS)?;
        Ok(Self { reader, store, info })
    }
}

impl SegmentDocs for TantivySegment<'_> {
    fn info(&self) -> SegmentInfo {
        self.info
    }

    fn is_alive(&self, doc: DocId) -> bool {
        self.reader
            .alive_bitset()
            .map(|alive| alive.is_alive(doc))
            .unwrap_or(true)
    }

    fn fetch(&self, doc: DocId, fields: &[&str]) -> CoincideResult<RawDocument> {
        let stored: TantivyDocument = self.store.get(doc)?;
        Ok(raw_document(self.reader.schema(), &stored, fields))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory source
// ─────────────────────────────────────────────────────────────────────────────

/// A document of the in-memory source: key, exact-match attributes, values.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Clone)]
pub struct MemoryDoc {
    pub attrs: HashMap<String, String>,
    pub raw: RawDocument,
    pub deleted: bool,
}

#[cfg(any(test, feature = "test-support"))]
impl MemoryDoc {
    pub fn new(key: &str) -> Self {
        let mut attrs = HashMap::new();
        attrs.insert(MemorySource::KEY_FIELD.to_string(), key.to_string());
        Self {
            attrs,
            raw: RawDocument::new(),
            deleted: false,
        }
    }

    pub fn attr(mut self, field: &str, value: &str) -> Self {
        self.attrs.insert(field.to_string(), value.to_string());
        self
    }

    pub fn times<V: Into<RawValue>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.raw = self.raw.with(field, values);
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}

/// Segmented in-memory index. Segment ordinals follow vector order.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    segments: Vec<Vec<MemoryDoc>>,
}

#[cfg(any(test, feature = "test-support"))]
impl MemorySource {
    pub const KEY_FIELD: &'static str = "_id";

    pub fn new(segments: Vec<Vec<MemoryDoc>>) -> Self {
        Self { segments }
    }

    fn infos(&self) -> Vec<SegmentInfo> {
        let mut base = 0u64;
        self.segments
            .iter()
            .enumerate()
            .map(|(ord, docs)| {
                let info = SegmentInfo {
                    ord: ord as u32,
                    max_doc: docs.len() as DocId,
                    base,
                };
                base += docs.len() as u64;
                info
            })
            .collect()
    }

    fn doc(&self, ordinal: GlobalOrdinal) -> Option<&MemoryDoc> {
        self.segments.iter().flatten().nth(ordinal.0 as usize)
    }
}

#[cfg(any(test, feature = "test-support"))]
impl TargetSource for MemorySource {
    fn key_field(&self) -> &str {
        Self::KEY_FIELD
    }

    fn lookup(&self, field: &str, value: &str) -> CoincideResult<Option<GlobalOrdinal>> {
        let hit = self
            .segments
            .iter()
            .flatten()
            .enumerate()
            .find(|(_, doc)| !doc.deleted && doc.attrs.get(field).map(String::as_str) == Some(value))
            .map(|(i, _)| GlobalOrdinal(i as u64));
        Ok(hit)
    }

    fn fetch(&self, ordinal: GlobalOrdinal, fields: &[&str]) -> CoincideResult<RawDocument> {
        self.doc(ordinal)
            .map(|doc| doc.raw.clone().project(fields))
            .ok_or_else(|| CoincideError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no document at {ordinal}"),
            )))
    }
}

#[cfg(any(test, feature = "test-support"))]
impl SegmentSource for MemorySource {
    fn segments(&self) -> Vec<SegmentInfo> {
        self.infos()
    }

    fn open_segment(&self, ord: u32) -> CoincideResult<Box<dyn SegmentDocs + '_>> {
        let info = self.infos().get(ord as usize).copied().ok_or_else(|| {
            CoincideError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no segment {ord}"),
            ))
        })?;
        Ok(Box::new(MemorySegment {
            docs: &self.segments[ord as usize],
            info,
        }))
    }
}

#[cfg(any(test, feature = "test-support"))]
struct MemorySegment<'a> {
    docs: &'a [MemoryDoc],
    info: SegmentInfo,
}

#[cfg(any(test, feature = "test-support"))]
impl SegmentDocs for MemorySegment<'_> {
    fn info(&self) -> SegmentInfo {
        self.info
    }

    fn is_alive(&self, doc: DocId) -> bool {
        !self.docs[doc as usize].deleted
    }

    fn fetch(&self, doc: DocId, fields: &[&str]) -> CoincideResult<RawDocument> {
        Ok(self.docs[doc as usize].raw.clone().project(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_segments() -> MemorySource {
        MemorySource::new(vec![
            vec![MemoryDoc::new("a"), MemoryDoc::new("b")],
            vec![],
            vec![MemoryDoc::new("c").attr("user", "carol"), MemoryDoc::new("d")],
        ])
    }

    #[test]
    fn test_memory_segments_have_running_base() {
        let source = three_segments();
        let infos = source.segments();
        assert_eq!(infos.len(), 3);
        assert_eq!((infos[0].base, infos[0].max_doc), (0, 2));
        assert_eq!((infos[1].base, infos[1].max_doc), (2, 0));
        assert_eq!((infos[2].base, infos[2].max_doc), (2, 2));
        assert_eq!(infos[2].global(1), GlobalOrdinal(3));
    }

    #[test]
    fn test_memory_lookup_is_global() {
        let source = three_segments();
        assert_eq!(source.lookup("_id", "c").unwrap(), Some(GlobalOrdinal(2)));
        assert_eq!(source.lookup("user", "carol").unwrap(), Some(GlobalOrdinal(2)));
        assert_eq!(source.lookup("_id", "zzz").unwrap(), None);
    }

    fn tantivy_searcher() -> Searcher {
        use tantivy::schema::{INDEXED, STORED, STRING};
        use tantivy::{doc, Index};

        let mut builder = Schema::builder();
        let id = builder.add_text_field("_id", STRING | STORED);
        let login = builder.add_text_field("login", STORED);
        let seq = builder.add_i64_field("seq", INDEXED);
        let index = Index::create_in_ram(builder.build());
        let mut writer = index.writer_with_num_threads(1, 15_000_000).unwrap();
        writer.add_document(doc!(id => "a", login => "1000", seq => 7i64)).unwrap();
        writer.commit().unwrap();
        index.reader().unwrap().searcher()
    }

    #[test]
    fn test_tantivy_fields_must_exist_and_be_stored() {
        let searcher = tantivy_searcher();
        let source = TantivySource::new(&searcher, "_id");
        source.validate_fields(&["login"]).unwrap();

        let err = source.validate_fields(&["login", "logn"]).unwrap_err();
        assert!(matches!(err, CoincideError::Configuration(ref m) if m.contains("[logn]")));

        // Indexed but never stored: values could not be read back
        let err = source.validate_fields(&["seq"]).unwrap_err();
        assert!(matches!(err, CoincideError::Configuration(ref m) if m.contains("not stored")));
    }

    #[test]
    fn test_memory_source_accepts_any_field() {
        assert!(three_segments().validate_fields(&["anything"]).is_ok());
    }

    #[test]
    fn test_memory_lookup_skips_deleted() {
        let source = MemorySource::new(vec![vec![MemoryDoc::new("a").deleted()]]);
        assert_eq!(source.lookup("_id", "a").unwrap(), None);
    }
}
