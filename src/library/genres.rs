use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::soundex::{soundex_by_word, words_count, words_reversed};

/// Bundled two-level FB2 genre taxonomy.
const GENRES_XML: &str = include_str!("../../static/genres.xml");

/// Fallback genre tag used when no subject can be resolved.
pub const DEFAULT_GENRE: &str = "prose";

/// A leaf genre with a machine tag and localized names.
#[derive(Debug, Clone)]
pub struct Genre {
    pub tag: String,
    pub name: String,
    pub translation: String,
}

/// A top-level genre category.
#[derive(Debug, Clone)]
pub struct GenreCategory {
    pub name: String,
    pub translation: String,
    pub subgenres: Vec<Genre>,
}

/// One Soundex index entry: pre-computed key, indexed word count, target tag.
struct SoundexEntry {
    key: String,
    words: usize,
    tag: String,
}

/// The genre taxonomy, loaded once at startup from the bundled XML resource.
pub struct GenreTree {
    categories: Vec<GenreCategory>,
    soundexed: Vec<SoundexEntry>,
}

impl GenreTree {
    /// Load the bundled taxonomy. The resource is compiled in, so a parse
    /// failure is a build defect; it degrades to an empty tree at runtime.
    pub fn load() -> Self {
        Self::from_xml(GENRES_XML).unwrap_or_else(|e| {
            tracing::error!("failed to parse bundled genre resource: {e}");
            Self {
                categories: Vec::new(),
                soundexed: Vec::new(),
            }
        })
    }

    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::Error> {
        let mut reader = Reader::from_reader(xml.as_bytes());
        reader.config_mut().trim_text(true);

        let mut categories: Vec<GenreCategory> = Vec::new();
        let mut current_tag: Option<(String, String)> = None; // (tag, ru)
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Eof) => break,
                Err(e) => return Err(e),

                Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                    let name = e.name();
                    match name.as_ref() {
                        b"genre" => {
                            let (name, ru) = name_ru_attrs(e, reader.decoder());
                            categories.push(GenreCategory {
                                name,
                                translation: ru,
                                subgenres: Vec::new(),
                            });
                        }
                        b"subgenre" => {
                            let mut tag = String::new();
                            let mut ru = String::new();
                            for attr in e.attributes().flatten() {
                                let val = attr
                                    .decode_and_unescape_value(reader.decoder())
                                    .unwrap_or_default();
                                match attr.key.as_ref() {
                                    b"tag" => tag = val.to_string(),
                                    b"ru" => ru = val.to_string(),
                                    _ => {}
                                }
                            }
                            current_tag = Some((tag, ru));
                        }
                        _ => {}
                    }
                }

                Ok(Event::Text(ref e)) => {
                    if let Some((tag, ru)) = current_tag.take() {
                        let name = e.decode().unwrap_or_default().to_string();
                        if let Some(cat) = categories.last_mut() {
                            cat.subgenres.push(Genre {
                                tag,
                                name,
                                translation: ru,
                            });
                        }
                    }
                }

                Ok(Event::End(ref e)) => {
                    if e.name().as_ref() == b"subgenre" {
                        current_tag = None;
                    }
                }

                _ => {}
            }
            buf.clear();
        }

        let soundexed = build_soundex_index(&categories);
        Ok(Self {
            categories,
            soundexed,
        })
    }

    pub fn categories(&self) -> &[GenreCategory] {
        &self.categories
    }

    pub fn category(&self, name: &str) -> Option<&GenreCategory> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Look up a leaf genre by its machine tag.
    pub fn by_tag(&self, tag: &str) -> Option<&Genre> {
        self.categories
            .iter()
            .flat_map(|c| c.subgenres.iter())
            .find(|g| g.tag == tag)
    }

    /// Localized display name for a genre tag. Unknown tags echo back.
    pub fn display_name(&self, tag: &str, russian: bool) -> String {
        match self.by_tag(tag) {
            Some(g) if russian => g.translation.clone(),
            Some(g) => g.name.clone(),
            None => tag.to_string(),
        }
    }

    /// Fuzzy-match a free-form subject string to a genre tag.
    ///
    /// Picks the first indexed entry whose Soundex key starts with the
    /// subject's key and whose indexed name is at most one word longer
    /// than the subject.
    pub fn match_subject(&self, subject: &str) -> Option<&str> {
        let key = soundex_by_word(subject);
        if key.is_empty() {
            return None;
        }
        let words = words_count(subject);
        self.soundexed
            .iter()
            .find(|e| e.key.starts_with(&key) && e.words <= words + 1)
            .map(|e| e.tag.as_str())
    }
}

fn name_ru_attrs(
    e: &quick_xml::events::BytesStart<'_>,
    decoder: quick_xml::encoding::Decoder,
) -> (String, String) {
    let mut name = String::new();
    let mut ru = String::new();
    for attr in e.attributes().flatten() {
        let val = attr.decode_and_unescape_value(decoder).unwrap_or_default();
        match attr.key.as_ref() {
            b"name" => name = val.to_string(),
            b"ru" => ru = val.to_string(),
            _ => {}
        }
    }
    (name, ru)
}

/// For every subgenre, index both its name and the name with word order
/// reversed, remembering the word count of the indexed form.
fn build_soundex_index(categories: &[GenreCategory]) -> Vec<SoundexEntry> {
    let mut entries = Vec::new();
    for cat in categories {
        for genre in &cat.subgenres {
            let words = words_count(&genre.name);
            let key = soundex_by_word(&genre.name);
            if !key.is_empty() {
                entries.push(SoundexEntry {
                    key,
                    words,
                    tag: genre.tag.clone(),
                });
            }
            let reversed = words_reversed(&genre.name);
            let rev_key = soundex_by_word(&reversed);
            if !rev_key.is_empty() && reversed != genre.name {
                entries.push(SoundexEntry {
                    key: rev_key,
                    words,
                    tag: genre.tag.clone(),
                });
            }
        }
    }
    entries
}
