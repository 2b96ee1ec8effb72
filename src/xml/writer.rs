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
use std::fs::{self, File};
use std::io::Write;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{FileCause, Result, StorageError};

/// A value that can be written as an attribute.
pub trait AttrValue {
    fn to_attr(&self) -> String;
}

impl AttrValue for &str {
    fn to_attr(&self) -> String {
        (*self).to_string()
    }
}

impl AttrValue for String {
    fn to_attr(&self) -> String {
        self.clone()
    }
}

impl AttrValue for &Path {
    fn to_attr(&self) -> String {
        self.to_string_lossy().into_owned()
    }
}

impl AttrValue for bool {
    fn to_attr(&self) -> String {
        let text = if *self { "1" } else { "0" };
        text.to_string()
    }
}

macro_rules! display_attr {
    ($($t:ty),*) => {
        $(impl AttrValue for $t {
            fn to_attr(&self) -> String {
                self.to_string()
            }
        })*
    };
}

// Floats print the shortest text that parses back to the same value.
display_attr!(i32, i64, u32, u64, usize, f32, f64);

/// Builds an indented UTF-8 XML document in memory.
///
/// Elements without children are closed as `<tag ... />`. Attribute and
/// character data is escaped with [`XmlWriter::escape`].
#[derive(Debug)]
pub struct XmlWriter {
    out: String,
    depth: usize,
    in_tag: bool,
    tag_stack: Vec<String>,
    has_kids: Vec<bool>,
}

impl Default for XmlWriter {
    fn default() -> Self {
        XmlWriter {
            out: String::new(),
            depth: 0,
            in_tag: false,
            tag_stack: Vec::new(),
            has_kids: vec![false],
        }
    }
}

impl XmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_tag(&mut self, name: &str) {
        if self.in_tag {
            self.out.push_str(">\n");
            self.in_tag = false;
        }
        self.indent(self.depth);
        self.out.push('<');
        self.out.push_str(name);
        self.tag_stack.push(name.to_string());
        if let Some(parent) = self.has_kids.last_mut() {
            *parent = true;
        }
        self.has_kids.push(false);
        self.depth += 1;
        self.in_tag = true;
    }

    /// Closes `name` if it is the innermost open element.
    pub fn end_tag(&mut self, name: &str) {
        if self.tag_stack.last().map(String::as_str) == Some(name) {
            if self.in_tag {
                self.out.push_str("/>\n");
            } else {
                self.indent(self.depth.saturating_sub(1));
                self.out.push_str("</");
                self.out.push_str(name);
                self.out.push_str(">\n");
            }
            self.tag_stack.pop();
            self.has_kids.pop();
        }
        self.depth = self.depth.saturating_sub(1);
        self.in_tag = false;
    }

    pub fn write_attr<V: AttrValue>(&mut self, name: &str, value: V) {
        self.out.push(' ');
        self.out.push_str(name);
        self.out.push_str("=\"");
        self.out.push_str(&Self::escape(&value.to_attr()));
        self.out.push('"');
    }

    /// Writes a float rounded to `digits` places after the decimal point.
    pub fn write_attr_fixed(&mut self, name: &str, value: f64, digits: usize) {
        self.write_attr(name, format!("{:.*}", digits, value));
    }

    pub fn write_data(&mut self, value: &str) {
        if self.in_tag {
            self.out.push_str(">\n");
            self.in_tag = false;
        }
        self.indent(self.depth);
        self.out.push_str(&Self::escape(value));
    }

    /// Appends already formed XML below the current element.
    pub fn write_sub_tree(&mut self, value: &str) {
        if self.in_tag {
            self.out.push_str(">\n");
            self.in_tag = false;
            if let Some(current) = self.has_kids.last_mut() {
                *current = true;
            }
        }
        self.out.push_str(value);
    }

    /// Closes every open element.
    pub fn end_all(&mut self) {
        while let Some(name) = self.tag_stack.last().cloned() {
            self.end_tag(&name);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(mut self) -> String {
        self.end_all();
        self.out
    }

    /// Escapes markup characters. Control characters an XML parser accepts
    /// (tab, newline, carriage return, and everything above 0x1f) become
    /// character references; the rest, and the non-characters U+FFFE and
    /// U+FFFF, are dropped.
    pub fn escape(s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '\'' => result.push_str("&apos;"),
                '"' => result.push_str("&quot;"),
                '&' => result.push_str("&amp;"),
                '<' => result.push_str("&lt;"),
                '>' => result.push_str("&gt;"),
                '\u{FFFE}' | '\u{FFFF}' => {}
                c if c.is_control() => {
                    let u = c as u32;
                    if u > 0x1f || matches!(c, '\t' | '\n' | '\r') {
                        result.push_str(&format!("&#x{:04x};", u));
                    }
                }
                c => result.push(c),
            }
        }
        result
    }

    fn indent(&mut self, depth: usize) {
        for _ in 0..depth {
            self.out.push('\t');
        }
    }
}

/// An [`XmlWriter`] whose document replaces `path` only on [`commit`].
///
/// The document is staged in `<path>.tmp`; an uncommitted writer removes
/// its staging file when dropped.
///
/// [`commit`]: XmlFileWriter::commit
pub struct XmlFileWriter {
    writer: XmlWriter,
    path: PathBuf,
    staging: PathBuf,
    committed: bool,
}

impl XmlFileWriter {
    pub fn new(path: &Path) -> Result<Self> {
        let mut staging = path.as_os_str().to_owned();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        File::create(&staging).map_err(|_| StorageError::file(FileCause::Write, &staging))?;
        Ok(XmlFileWriter {
            writer: XmlWriter::new(),
            path: path.to_path_buf(),
            staging,
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes open elements, flushes the document and renames it over the
    /// target.
    pub fn commit(mut self) -> Result<()> {
        self.writer.end_all();
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&self.staging)?;
            file.write_all(self.writer.as_str().as_bytes())?;
            file.sync_all()
        };
        if write().is_err() {
            return Err(StorageError::file(FileCause::Write, &self.staging));
        }
        fs::rename(&self.staging, &self.path)
            .map_err(|_| StorageError::rename(&self.staging, &self.path))?;
        self.committed = true;
        Ok(())
    }
}

impl Deref for XmlFileWriter {
    type Target = XmlWriter;

    fn deref(&self) -> &XmlWriter {
        &self.writer
    }
}

impl DerefMut for XmlFileWriter {
    fn deref_mut(&mut self) -> &mut XmlWriter {
        &mut self.writer
    }
}

impl Drop for XmlFileWriter {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = fs::remove_file(&self.staging) {
                warn!(path = ?self.staging, err = %e, "Unable to remove uncommitted document");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(XmlWriter::escape("'\"&<>"), "&apos;&quot;&amp;&lt;&gt;");
        assert_eq!(XmlWriter::escape("\u{04}"), "");
        assert_eq!(XmlWriter::escape("\u{02}"), "");
        assert_eq!(XmlWriter::escape("\u{FFFE}\u{FFFF}"), "");
        assert_eq!(XmlWriter::escape("\u{7f}"), "&#x007f;");
        assert_eq!(XmlWriter::escape("\u{80}"), "&#x0080;");
        assert_eq!(XmlWriter::escape("\t"), "&#x0009;");
        assert_eq!(XmlWriter::escape("\u{10c3f}"), "\u{10c3f}");
    }

    #[test]
    fn test_nested_layout() {
        let mut w = XmlWriter::new();
        w.start_tag("document");
        w.start_tag("entity");
        w.write_attr("name", "a<b");
        w.write_attr("len", 40001usize);
        w.end_tag("entity");
        w.end_tag("document");
        assert_eq!(
            w.as_str(),
            "<document>\n\t<entity name=\"a&lt;b\" len=\"40001\"/>\n</document>\n"
        );
    }

    #[test]
    fn test_data_and_sub_trees() {
        let mut w = XmlWriter::new();
        w.start_tag("note");
        w.write_data("x & y");
        w.end_tag("note");
        assert_eq!(w.as_str(), "<note>\n\tx &amp; y</note>\n");

        let mut w = XmlWriter::new();
        w.start_tag("outer");
        w.write_sub_tree("<inner/>\n");
        w.end_tag("outer");
        assert_eq!(w.as_str(), "<outer>\n<inner/>\n</outer>\n");
    }

    #[test]
    fn test_float_attrs_round_trip() {
        let mut w = XmlWriter::new();
        w.start_tag("e");
        w.write_attr("f", 1.0f32 / 9.0);
        w.write_attr("max", f32::MAX);
        w.write_attr_fixed("d", 1.0 / 9.0, 3);
        let doc = w.into_string();
        assert!(doc.contains(&format!("f=\"{}\"", 1.0f32 / 9.0)));
        assert!(doc.contains("d=\"0.111\""));
        let text = doc.split("max=\"").nth(1).unwrap().split('"').next().unwrap();
        assert_eq!(text.parse::<f32>().unwrap(), f32::MAX);
    }

    #[test]
    fn test_file_writer_commits_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.xml");
        let mut w = XmlFileWriter::new(&path).unwrap();
        w.start_tag("document");
        w.write_attr("a", 1i32);
        assert!(!path.exists());
        w.commit().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<document a=\"1\"/>\n");
        assert!(!dir.path().join("doc.xml.tmp").exists());
    }

    #[test]
    fn test_file_writer_bad_directory() {
        let err = XmlFileWriter::new(Path::new("/nonexistent/dir/name.xml"))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            StorageError::File {
                cause: FileCause::Write,
                ..
            }
        ));
    }

    #[test]
    fn test_uncommitted_writer_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.xml");
        {
            let mut w = XmlFileWriter::new(&path).unwrap();
            w.start_tag("document");
        }
        assert!(!path.exists());
        assert!(!dir.path().join("doc.xml.tmp").exists());
    }
}
