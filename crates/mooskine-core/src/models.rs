//! Data models for Mooskine
//!
//! Defines the two persisted record kinds, Notebook and Note, plus the
//! rich-text payload a note carries.
//!
//! Records are never constructed directly by callers. Genuine creation goes
//! through the [`Store`](crate::Store), which stamps the creation date once;
//! loading from storage goes through `from_storage`, which keeps the
//! persisted timestamp untouched.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Stable identifier of a notebook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotebookId(Uuid);

/// Stable identifier of a note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteId(Uuid);

macro_rules! record_id {
    ($name:ident) => {
        impl $name {
            pub(crate) fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// The underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parse the hyphenated string form used in storage
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.hyphenated().fmt(f)
            }
        }
    };
}

record_id!(NotebookId);
record_id!(NoteId);

/// Either kind of record identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordId {
    Notebook(NotebookId),
    Note(NoteId),
}

/// A notebook: a named container of notes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notebook {
    /// Unique identifier
    pub id: NotebookId,
    /// Display name
    pub name: String,
    /// When the notebook was first inserted. Never reassigned.
    pub creation_date: DateTime<Utc>,
}

impl Notebook {
    /// Build a brand new notebook, stamped with `now`
    pub(crate) fn insert_new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: NotebookId::new(),
            name: name.into(),
            creation_date: now,
        }
    }

    /// Materialize a notebook loaded from storage
    pub(crate) fn from_storage(id: NotebookId, name: String, creation_date: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            creation_date,
        }
    }
}

/// A note belonging to exactly one notebook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    /// Unique identifier
    pub id: NoteId,
    /// Owning notebook
    pub notebook_id: NotebookId,
    /// When the note was first inserted. Never reassigned.
    pub creation_date: DateTime<Utc>,
    /// Note content
    pub attributed_text: RichText,
}

impl Note {
    pub(crate) fn insert_new(
        notebook_id: NotebookId,
        attributed_text: RichText,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NoteId::new(),
            notebook_id,
            creation_date: now,
            attributed_text,
        }
    }

    pub(crate) fn from_storage(
        id: NoteId,
        notebook_id: NotebookId,
        creation_date: DateTime<Utc>,
        attributed_text: RichText,
    ) -> Self {
        Self {
            id,
            notebook_id,
            creation_date,
            attributed_text,
        }
    }

    /// Plain text content, without styling
    pub fn text(&self) -> &str {
        &self.attributed_text.text
    }
}

/// Inline style applied to a span of rich text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Style {
    Bold,
    Underline,
    /// Foreground color, as the host's color name or hex string
    Color(String),
    /// The span is rendered as the named image
    Image(String),
}

/// A styled range of characters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StyleSpan {
    /// Offset of the first character
    pub start: usize,
    /// Number of characters covered
    pub len: usize,
    pub style: Style,
}

/// Errors building rich text
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RichTextError {
    #[error("style span {start}..{end} exceeds text length {text_len}")]
    SpanOutOfRange {
        start: usize,
        end: usize,
        text_len: usize,
    },
}

/// Text carrying inline style spans
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RichText {
    pub text: String,
    #[serde(default)]
    pub spans: Vec<StyleSpan>,
}

impl RichText {
    /// Wrap plain text with no style spans
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            spans: Vec::new(),
        }
    }

    /// Build rich text, checking every span lies within the text
    ///
    /// Offsets count characters, not bytes.
    pub fn with_spans(text: impl Into<String>, spans: Vec<StyleSpan>) -> Result<Self, RichTextError> {
        let text = text.into();
        let text_len = text.chars().count();
        for span in &spans {
            let end = span.start.saturating_add(span.len);
            if end > text_len {
                return Err(RichTextError::SpanOutOfRange {
                    start: span.start,
                    end,
                    text_len,
                });
            }
        }
        Ok(Self { text, spans })
    }

    /// True if no span carries any style
    pub fn is_plain(&self) -> bool {
        self.spans.is_empty()
    }
}

impl From<&str> for RichText {
    fn from(s: &str) -> Self {
        Self::plain(s)
    }
}

impl From<String> for RichText {
    fn from(s: String) -> Self {
        Self::plain(s)
    }
}

/// An owned record of either kind
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Notebook(Notebook),
    Note(Note),
}

impl Record {
    pub fn id(&self) -> RecordId {
        match self {
            Record::Notebook(notebook) => RecordId::Notebook(notebook.id),
            Record::Note(note) => RecordId::Note(note.id),
        }
    }

    pub fn borrowed(&self) -> RecordRef<'_> {
        match self {
            Record::Notebook(notebook) => RecordRef::Notebook(notebook),
            Record::Note(note) => RecordRef::Note(note),
        }
    }
}

/// A borrowed record of either kind
#[derive(Debug, Clone, Copy)]
pub enum RecordRef<'a> {
    Notebook(&'a Notebook),
    Note(&'a Note),
}

/// Record kind, used to route changes to live queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Notebook,
    Note,
}

/// Uniform view over persisted records
///
/// Live queries are generic over this trait.
pub trait Entity: Clone + 'static {
    type Id: Copy + Eq + std::hash::Hash + Ord + fmt::Debug + fmt::Display;

    const KIND: EntityKind;

    fn id(&self) -> Self::Id;

    fn creation_date(&self) -> DateTime<Utc>;

    /// Owning notebook, for records on the "many" side of the relationship
    fn notebook_id(&self) -> Option<NotebookId>;

    fn record_id(&self) -> RecordId;

    /// Downcast a borrowed record to this kind
    fn from_ref(record: RecordRef<'_>) -> Option<&Self>;

    /// Downcast a record identifier to this kind
    fn from_record_id(id: RecordId) -> Option<Self::Id>;

    fn into_record(self) -> Record;

    fn from_record(record: &Record) -> Option<&Self> {
        Self::from_ref(record.borrowed())
    }
}

impl Entity for Notebook {
    type Id = NotebookId;

    const KIND: EntityKind = EntityKind::Notebook;

    fn id(&self) -> NotebookId {
        self.id
    }

    fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    fn notebook_id(&self) -> Option<NotebookId> {
        None
    }

    fn record_id(&self) -> RecordId {
        RecordId::Notebook(self.id)
    }

    fn from_ref(record: RecordRef<'_>) -> Option<&Self> {
        match record {
            RecordRef::Notebook(notebook) => Some(notebook),
            RecordRef::Note(_) => None,
        }
    }

    fn from_record_id(id: RecordId) -> Option<NotebookId> {
        match id {
            RecordId::Notebook(id) => Some(id),
            RecordId::Note(_) => None,
        }
    }

    fn into_record(self) -> Record {
        Record::Notebook(self)
    }
}

impl Entity for Note {
    type Id = NoteId;

    const KIND: EntityKind = EntityKind::Note;

    fn id(&self) -> NoteId {
        self.id
    }

    fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    fn notebook_id(&self) -> Option<NotebookId> {
        Some(self.notebook_id)
    }

    fn record_id(&self) -> RecordId {
        RecordId::Note(self.id)
    }

    fn from_ref(record: RecordRef<'_>) -> Option<&Self> {
        match record {
            RecordRef::Note(note) => Some(note),
            RecordRef::Notebook(_) => None,
        }
    }

    fn from_record_id(id: RecordId) -> Option<NoteId> {
        match id {
            RecordId::Note(id) => Some(id),
            RecordId::Notebook(_) => None,
        }
    }

    fn into_record(self) -> Record {
        Record::Note(self)
    }
}
