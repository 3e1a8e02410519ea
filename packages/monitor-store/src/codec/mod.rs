//! Record codecs
//!
//! - `XmlRecordCodec`: default on-disk format (`<id>.xml`)
//! - `JsonRecordCodec`: serde_json rendition, useful for fixtures and tooling

pub mod json;
pub mod xml;

pub use json::JsonRecordCodec;
pub use xml::XmlRecordCodec;
