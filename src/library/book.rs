use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

/// Ticks (100 ns units) between 0001-01-01 and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;
/// The top two bits of a persisted timestamp carry a timezone-kind field;
/// unknown kinds are treated as UTC.
const TICKS_MASK: i64 = 0x3FFF_FFFF_FFFF_FFFF;

/// Derived from the file extension: everything that is not EPUB is FB2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookType {
    Fb2,
    Epub,
}

/// A cataloged book descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Book {
    /// Always a well-formed UUID; synthesized from the file name when the
    /// source document carries none (or a colliding one).
    pub id: String,
    pub version: f32,
    /// Path relative to the library root. Books inside archives use the
    /// `relative/archive.zip@entry/inside.fb2` form.
    pub file_name: String,
    pub title: String,
    pub language: String,
    pub annotation: String,
    pub sequence: String,
    pub number_in_sequence: u32,
    /// Timestamps in 100 ns ticks since 0001-01-01 UTC.
    pub book_date: i64,
    pub document_date: i64,
    pub added_date: i64,
    pub has_cover: bool,
    pub document_size: u32,
    pub authors: Vec<String>,
    pub translators: Vec<String>,
    pub genres: Vec<String>,
}

impl Book {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            version: 1.0,
            ..Default::default()
        }
    }

    pub fn book_type(&self) -> BookType {
        let ext = self
            .file_name
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        if ext.contains("epub") {
            BookType::Epub
        } else {
            BookType::Fb2
        }
    }

    /// A book is admissible when it has a printable title, at least one
    /// author and at least one genre.
    pub fn is_valid(&self) -> bool {
        !self.title.is_empty()
            && self
                .title
                .chars()
                .all(|c| (!c.is_control() || c.is_whitespace()) && c != '\u{FFFD}')
            && !self.authors.is_empty()
            && !self.genres.is_empty()
    }

    /// Ensure the ID is a well-formed UUID, deriving one from the file
    /// name otherwise.
    pub fn ensure_id(&mut self) {
        if Uuid::parse_str(self.id.trim()).is_err() {
            self.id = id_from_string(&self.file_name);
        }
    }
}

/// Deterministic UUIDv5 in the ISO OID namespace, used for book IDs,
/// database file names and client fingerprints.
pub fn id_from_string(s: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, s.as_bytes()).to_string()
}

/// Current wall clock as ticks.
pub fn now_ticks() -> i64 {
    ticks_from_datetime(Utc::now())
}

pub fn ticks_from_datetime(dt: DateTime<Utc>) -> i64 {
    UNIX_EPOCH_TICKS
        + dt.timestamp() * TICKS_PER_SECOND
        + i64::from(dt.timestamp_subsec_nanos() / 100)
}

pub fn ticks_from_date(date: NaiveDate) -> i64 {
    let dt = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default());
    ticks_from_datetime(dt)
}

/// Decode a persisted tick count, masking off the kind bits.
pub fn datetime_from_ticks(ticks: i64) -> DateTime<Utc> {
    let ticks = ticks & TICKS_MASK;
    let secs = (ticks - UNIX_EPOCH_TICKS) / TICKS_PER_SECOND;
    let nanos = ((ticks - UNIX_EPOCH_TICKS) % TICKS_PER_SECOND) * 100;
    Utc.timestamp_opt(secs, nanos.unsigned_abs() as u32)
        .single()
        .unwrap_or_default()
}
