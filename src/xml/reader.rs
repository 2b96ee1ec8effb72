// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fs;
use std::path::Path;

use super::{XmlError, XmlTagHandler};

/// Parses documents and feeds their elements to an [`XmlTagHandler`].
///
/// Supports the subset of XML the writer produces plus what hand-edited
/// files commonly contain: a prolog, comments, doctype declarations, CDATA
/// sections, both quote styles and numeric character references.
pub struct XmlFileReader;

impl XmlFileReader {
    pub fn parse(handler: &mut dyn XmlTagHandler, path: &Path) -> Result<(), XmlError> {
        let text = fs::read_to_string(path).map_err(|source| XmlError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Parser::new(&text, &path.display().to_string()).run(handler)
    }

    pub fn parse_str(handler: &mut dyn XmlTagHandler, text: &str) -> Result<(), XmlError> {
        Parser::new(text, "document").run(handler)
    }
}

struct Open {
    tag: String,
    active: bool,
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    name: &'a str,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, name: &'a str) -> Self {
        Parser { text, pos: 0, name }
    }

    fn run(mut self, handler: &mut dyn XmlTagHandler) -> Result<(), XmlError> {
        let mut stack: Vec<Open> = Vec::new();
        let mut root_seen = false;
        let mut root_rejected = false;

        while self.pos < self.text.len() {
            let rest = self.rest();
            if rest.starts_with("<?") {
                self.skip_past("?>")?;
            } else if rest.starts_with("<!--") {
                self.skip_past("-->")?;
            } else if rest.starts_with("<![CDATA[") {
                self.pos += "<![CDATA[".len();
                let start = self.pos;
                self.skip_past("]]>")?;
                let content = &self.text[start..self.pos - "]]>".len()];
                match stack.last() {
                    Some(open) if open.active => handler.handle_xml_content(content),
                    Some(_) => {}
                    None => return Err(self.error("character data outside the document element")),
                }
            } else if rest.starts_with("<!") {
                self.skip_past(">")?;
            } else if rest.starts_with("</") {
                self.pos += 2;
                let tag = self.name()?;
                self.skip_whitespace();
                self.expect('>')?;
                match stack.pop() {
                    Some(open) if open.tag == tag => {
                        if open.active {
                            handler.handle_xml_end_tag(&tag);
                        }
                    }
                    _ => return Err(self.error(&format!("mismatched end tag </{}>", tag))),
                }
            } else if rest.starts_with('<') {
                self.pos += 1;
                let tag = self.name()?;
                let (attrs, self_closing) = self.attributes()?;

                let mut active = match stack.last() {
                    None if root_seen => {
                        return Err(self.error("junk after document element"));
                    }
                    None => {
                        root_seen = true;
                        true
                    }
                    Some(parent) => parent.active && handler.handle_xml_child(&tag),
                };
                if active && !handler.handle_xml_tag(&tag, &attrs) {
                    active = false;
                    if stack.is_empty() {
                        root_rejected = true;
                    }
                }

                if self_closing {
                    if active {
                        handler.handle_xml_end_tag(&tag);
                    }
                } else {
                    stack.push(Open { tag, active });
                }
            } else {
                let end = rest.find('<').map_or(self.text.len(), |i| self.pos + i);
                let raw = &self.text[self.pos..end];
                match stack.last() {
                    Some(open) => {
                        if open.active && !raw.trim().is_empty() {
                            let content = self.decode(raw)?;
                            handler.handle_xml_content(&content);
                        }
                    }
                    None if !raw.trim().is_empty() => {
                        return Err(self.error("character data outside the document element"));
                    }
                    None => {}
                }
                self.pos = end;
            }
        }

        if let Some(open) = stack.last() {
            return Err(self.error(&format!("unclosed element <{}>", open.tag)));
        }
        if !root_seen {
            return Err(self.error("no element found"));
        }
        if root_rejected {
            return Err(XmlError::Rejected {
                name: self.name.to_string(),
            });
        }
        Ok(())
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn error(&self, message: &str) -> XmlError {
        let line = self.text[..self.pos.min(self.text.len())]
            .matches('\n')
            .count()
            + 1;
        XmlError::Syntax {
            name: self.name.to_string(),
            line,
            message: message.to_string(),
        }
    }

    fn skip_past(&mut self, marker: &str) -> Result<(), XmlError> {
        match self.rest().find(marker) {
            Some(i) => {
                self.pos += i + marker.len();
                Ok(())
            }
            None => Err(self.error(&format!("missing {}", marker))),
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn expect(&mut self, c: char) -> Result<(), XmlError> {
        if self.rest().starts_with(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn name(&mut self) -> Result<String, XmlError> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '/' | '>' | '=' | '<'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected a name"));
        }
        self.pos += len;
        Ok(rest[..len].to_string())
    }

    /// Parses attributes up to and including the end of the start tag.
    fn attributes(&mut self) -> Result<(Vec<(String, String)>, bool), XmlError> {
        let mut attrs = Vec::new();
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok((attrs, true));
            }
            if rest.starts_with('>') {
                self.pos += 1;
                return Ok((attrs, false));
            }
            if rest.is_empty() {
                return Err(self.error("unterminated start tag"));
            }

            let key = self.name()?;
            self.skip_whitespace();
            self.expect('=')?;
            self.skip_whitespace();
            let quote = match self.rest().chars().next() {
                Some(q @ ('"' | '\'')) => q,
                _ => return Err(self.error("expected a quoted value")),
            };
            self.pos += 1;
            let Some(len) = self.rest().find(quote) else {
                return Err(self.error("unterminated attribute value"));
            };
            let raw = &self.text[self.pos..self.pos + len];
            if raw.contains('<') {
                return Err(self.error("'<' in attribute value"));
            }
            let value = self.decode(raw)?;
            self.pos += len + 1;

            if attrs.iter().any(|(k, _)| *k == key) {
                return Err(self.error(&format!("duplicate attribute {}", key)));
            }
            attrs.push((key, value));
        }
    }

    fn decode(&self, raw: &str) -> Result<String, XmlError> {
        if !raw.contains('&') {
            return Ok(raw.to_string());
        }
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(amp) = rest.find('&') {
            out.push_str(&rest[..amp]);
            rest = &rest[amp..];
            let Some(semi) = rest.find(';') else {
                return Err(self.error("unterminated entity reference"));
            };
            let entity = &rest[1..semi];
            let decoded = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => {
                    let code = if let Some(hex) = entity.strip_prefix("#x") {
                        u32::from_str_radix(hex, 16).ok()
                    } else if let Some(dec) = entity.strip_prefix('#') {
                        dec.parse::<u32>().ok()
                    } else {
                        None
                    };
                    code.and_then(char::from_u32)
                }
            };
            match decoded {
                Some(c) => out.push(c),
                None => return Err(self.error(&format!("undefined entity &{};", entity))),
            }
            rest = &rest[semi + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{attr, Attributes, XmlWriter};

    #[derive(Default)]
    struct Recorder {
        tags: Vec<String>,
        ends: Vec<String>,
        content: String,
        attrs: Vec<(String, String)>,
        reject: Option<&'static str>,
        skip_children_of: Option<&'static str>,
    }

    impl XmlTagHandler for Recorder {
        fn handle_xml_tag(&mut self, tag: &str, attrs: &Attributes) -> bool {
            self.tags.push(tag.to_string());
            if tag == "entity" {
                self.attrs = attrs.to_vec();
            }
            self.reject != Some(tag)
        }

        fn handle_xml_end_tag(&mut self, tag: &str) {
            self.ends.push(tag.to_string());
        }

        fn handle_xml_content(&mut self, content: &str) {
            self.content.push_str(content);
        }

        fn handle_xml_child(&mut self, _tag: &str) -> bool {
            match (self.skip_children_of, self.tags.last()) {
                (Some(parent), Some(last)) => last != parent,
                _ => true,
            }
        }
    }

    #[test]
    fn test_reads_back_writer_output() {
        let mut w = XmlWriter::new();
        w.start_tag("document");
        w.start_tag("entity");
        w.write_attr("qstring", "astring");
        w.write_attr("qchar", "\u{01b1}");
        w.write_attr("unprintable", "\u{7f}");
        w.write_attr("escaped", "'\"&<>");
        w.write_attr("surrogates", "\u{10c3f}");
        w.write_attr("long", i64::MAX);
        w.write_attr("float1", 1.0f32 / 9.0);
        w.write_attr("double3", f64::MAX);
        w.end_tag("entity");
        w.end_tag("document");

        let mut handler = Recorder::default();
        XmlFileReader::parse_str(&mut handler, w.as_str()).unwrap();
        assert_eq!(handler.tags, vec!["document", "entity"]);
        assert_eq!(handler.ends, vec!["entity", "document"]);

        let attrs = &handler.attrs;
        assert_eq!(attr(attrs, "qstring"), Some("astring"));
        assert_eq!(attr(attrs, "qchar"), Some("\u{01b1}"));
        assert_eq!(attr(attrs, "unprintable"), Some("\u{7f}"));
        assert_eq!(attr(attrs, "escaped"), Some("'\"&<>"));
        assert_eq!(attr(attrs, "surrogates"), Some("\u{10c3f}"));
        assert_eq!(attr(attrs, "long").unwrap().parse::<i64>().unwrap(), i64::MAX);
        assert_eq!(
            attr(attrs, "float1").unwrap().parse::<f32>().unwrap(),
            1.0f32 / 9.0
        );
        assert_eq!(
            attr(attrs, "double3").unwrap().parse::<f64>().unwrap(),
            f64::MAX
        );
    }

    #[test]
    fn test_prolog_comments_and_content() {
        let doc = "<?xml version=\"1.0\"?>\n<!DOCTYPE project>\n<!-- saved -->\n\
                   <a x='1'>hello &amp; <![CDATA[<raw>]]></a>\n";
        let mut handler = Recorder::default();
        XmlFileReader::parse_str(&mut handler, doc).unwrap();
        assert_eq!(handler.tags, vec!["a"]);
        assert_eq!(handler.content, "hello & <raw>");
    }

    #[test]
    fn test_malformed_document() {
        let mut handler = Recorder::default();
        let err = XmlFileReader::parse_str(&mut handler, "<malformed>xml<malformed>")
            .err()
            .unwrap();
        assert!(matches!(err, XmlError::Syntax { .. }));

        let err = XmlFileReader::parse_str(&mut handler, "<a></b>").err().unwrap();
        assert!(matches!(err, XmlError::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_missing_file_names_path() {
        let mut handler = Recorder::default();
        let err = XmlFileReader::parse(&mut handler, Path::new("bogus/filename.xml"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("bogus/filename.xml"));
    }

    #[test]
    fn test_rejected_root_fails_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handler.xml");
        std::fs::write(&path, "<tag>foo</tag>\n").unwrap();

        let mut handler = Recorder {
            reject: Some("tag"),
            ..Default::default()
        };
        let err = XmlFileReader::parse(&mut handler, &path).err().unwrap();
        assert!(matches!(err, XmlError::Rejected { .. }));
        assert!(err.to_string().contains("handler.xml"));
    }

    #[test]
    fn test_rejected_child_skips_subtree() {
        let mut handler = Recorder {
            reject: Some("b"),
            ..Default::default()
        };
        XmlFileReader::parse_str(&mut handler, "<a><b><c/></b><d/></a>").unwrap();
        assert_eq!(handler.tags, vec!["a", "b", "d"]);
        assert_eq!(handler.ends, vec!["d", "a"]);

        let mut handler = Recorder {
            skip_children_of: Some("a"),
            ..Default::default()
        };
        XmlFileReader::parse_str(&mut handler, "<a><b/></a>").unwrap();
        assert_eq!(handler.tags, vec!["a"]);
    }
}
