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
//! The XML fragment block files and project documents are stored in.
//!
//! Writing goes through [`XmlWriter`] (in memory) or [`XmlFileWriter`]
//! (committed atomically to disk). Reading feeds an [`XmlTagHandler`] from a
//! small pull parser. Every value read back is untrusted and must pass the
//! predicates in [`checker`] before use.
use std::path::PathBuf;

pub mod checker;
mod reader;
mod writer;

pub use self::reader::XmlFileReader;
pub use self::writer::{AttrValue, XmlFileWriter, XmlWriter};

/// Attributes of one element, in document order.
pub type Attributes = [(String, String)];

/// Receives the elements of a parsed document.
pub trait XmlTagHandler {
    /// Called for every element this handler accepts. Returning false for
    /// the root element fails the parse; for a child it skips its subtree.
    fn handle_xml_tag(&mut self, tag: &str, attrs: &Attributes) -> bool;

    fn handle_xml_end_tag(&mut self, _tag: &str) {}

    fn handle_xml_content(&mut self, _content: &str) {}

    /// Whether the children of the current element should be delivered.
    fn handle_xml_child(&mut self, _tag: &str) -> bool {
        true
    }
}

/// Looks up an attribute by name.
pub fn attr<'a>(attrs: &'a Attributes, name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("Could not open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{name}: line {line}: {message}")]
    Syntax {
        name: String,
        line: usize,
        message: String,
    },

    #[error("Could not load {name}")]
    Rejected { name: String },
}
