//! OPDS Atom feed writer.
//!
//! Feeds are built with `{$HOST}` placeholders in every link; the absolute
//! base URL (scheme + `Host:` header + root prefix) replaces them at send
//! time.

use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;

/// Content type of every feed response.
pub const ATOM_XML: &str = "application/atom+xml;charset=utf-8";
pub const NAV_TYPE: &str = "application/atom+xml;profile=opds-catalog;kind=navigation";
pub const ACQ_TYPE: &str = "application/atom+xml;profile=opds-catalog";
pub const OPENSEARCH_TYPE: &str = "application/opensearchdescription+xml";

/// OPDS link relations.
pub const REL_ACQUISITION: &str = "http://opds-spec.org/acquisition/open-access";
pub const REL_IMAGE: &str = "http://opds-spec.org/image";
pub const REL_THUMBNAIL: &str = "http://opds-spec.org/thumbnail";

/// Placeholder replaced by the absolute base URL at send time.
pub const HOST_PLACEHOLDER: &str = "{$HOST}";

pub struct FeedBuilder {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl Default for FeedBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedBuilder {
    pub fn new() -> Self {
        let buf = Cursor::new(Vec::new());
        let writer = Writer::new_with_indent(buf, b' ', 2);
        Self { writer }
    }

    /// Write the XML declaration and open `<feed>` with the Atom
    /// namespace, standard metadata and the catalog icon.
    pub fn begin_feed(
        &mut self,
        id: &str,
        title: &str,
        updated: &str,
    ) -> Result<(), quick_xml::Error> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

        let mut feed = BytesStart::new("feed");
        feed.push_attribute(("xmlns", "http://www.w3.org/2005/Atom"));
        self.writer.write_event(Event::Start(feed))?;

        self.write_text_element("id", id)?;
        self.write_text_element("title", title)?;
        self.write_text_element("updated", updated)?;
        self.write_text_element("icon", &format!("{HOST_PLACEHOLDER}/favicon.ico"))?;
        Ok(())
    }

    /// Search links advertising OpenSearch phase 1.
    pub fn write_search_link(&mut self) -> Result<(), quick_xml::Error> {
        self.write_link(
            &format!("{HOST_PLACEHOLDER}/search?searchTerm={{searchTerms}}"),
            "search",
            "application/atom+xml",
            None,
        )
    }

    /// Pagination links with the query parameters round-tripped.
    pub fn write_pagination(
        &mut self,
        prev_href: Option<&str>,
        next_href: Option<&str>,
    ) -> Result<(), quick_xml::Error> {
        if let Some(prev) = prev_href {
            self.write_link(prev, "prev", ACQ_TYPE, Some("Previous Page"))?;
        }
        if let Some(next) = next_href {
            self.write_link(next, "next", ACQ_TYPE, Some("Next Page"))?;
        }
        Ok(())
    }

    /// A navigation entry pointing deeper into the catalog.
    pub fn write_nav_entry(
        &mut self,
        id: &str,
        title: &str,
        href: &str,
        content: &str,
        updated: &str,
    ) -> Result<(), quick_xml::Error> {
        self.writer
            .write_event(Event::Start(BytesStart::new("entry")))?;
        self.write_text_element("id", id)?;
        self.write_text_element("title", title)?;
        self.write_text_element("updated", updated)?;
        self.write_link(href, "subsection", NAV_TYPE, None)?;
        if !content.is_empty() {
            self.write_content_text(content)?;
        }
        self.writer.write_event(Event::End(BytesEnd::new("entry")))?;
        Ok(())
    }

    /// Open a book acquisition entry.
    pub fn begin_entry(
        &mut self,
        id: &str,
        title: &str,
        updated: &str,
    ) -> Result<(), quick_xml::Error> {
        self.writer
            .write_event(Event::Start(BytesStart::new("entry")))?;
        self.write_text_element("id", id)?;
        self.write_text_element("title", title)?;
        self.write_text_element("updated", updated)?;
        Ok(())
    }

    pub fn end_entry(&mut self) -> Result<(), quick_xml::Error> {
        self.writer.write_event(Event::End(BytesEnd::new("entry")))?;
        Ok(())
    }

    pub fn write_author(&mut self, name: &str) -> Result<(), quick_xml::Error> {
        self.writer
            .write_event(Event::Start(BytesStart::new("author")))?;
        self.write_text_element("name", name)?;
        self.writer
            .write_event(Event::End(BytesEnd::new("author")))?;
        Ok(())
    }

    pub fn write_category(&mut self, term: &str, label: &str) -> Result<(), quick_xml::Error> {
        let mut el = BytesStart::new("category");
        el.push_attribute(("term", term));
        el.push_attribute(("label", label));
        self.writer.write_event(Event::Empty(el))?;
        Ok(())
    }

    pub fn write_content_text(&mut self, text: &str) -> Result<(), quick_xml::Error> {
        let mut el = BytesStart::new("content");
        el.push_attribute(("type", "text"));
        self.writer.write_event(Event::Start(el))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.writer
            .write_event(Event::End(BytesEnd::new("content")))?;
        Ok(())
    }

    pub fn write_link(
        &mut self,
        href: &str,
        rel: &str,
        link_type: &str,
        title: Option<&str>,
    ) -> Result<(), quick_xml::Error> {
        let mut el = BytesStart::new("link");
        el.push_attribute(("href", href));
        el.push_attribute(("rel", rel));
        el.push_attribute(("type", link_type));
        if let Some(t) = title {
            el.push_attribute(("title", t));
        }
        self.writer.write_event(Event::Empty(el))?;
        Ok(())
    }

    /// Close `</feed>` and return the document bytes.
    pub fn finish(mut self) -> Result<Vec<u8>, quick_xml::Error> {
        self.writer.write_event(Event::End(BytesEnd::new("feed")))?;
        Ok(self.writer.into_inner().into_inner())
    }

    fn write_text_element(&mut self, tag: &str, text: &str) -> Result<(), quick_xml::Error> {
        self.writer.write_event(Event::Start(BytesStart::new(tag)))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.writer.write_event(Event::End(BytesEnd::new(tag)))?;
        Ok(())
    }
}
