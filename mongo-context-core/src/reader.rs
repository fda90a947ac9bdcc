//! Directional, bookmarkable reader over BSON documents.
//!
//! [`BsonReader`] walks a document element by element, descending into
//! arrays and sub-documents on request. A [`Bookmark`] captures the full
//! cursor state, so a decoder can attempt one interpretation of a value and
//! rewind to try another without disturbing the elements that follow.

use std::rc::Rc;

use bson::spec::ElementType;
use bson::{Bson, Document};

use crate::error::{MongoError, MongoResult};

/// Outcome of a decode attempt that may not match the wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeAttempt<T> {
    /// The value matched the expected format.
    Decoded(T),
    /// The value has a different shape than expected.
    FormatMismatch(String),
}

impl<T> DecodeAttempt<T> {
    /// Check if the attempt succeeded.
    pub fn is_decoded(&self) -> bool {
        matches!(self, Self::Decoded(_))
    }

    /// Convert into an option, discarding the mismatch reason.
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Decoded(value) => Some(value),
            Self::FormatMismatch(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Frame<'a> {
    Document {
        entries: Rc<[(&'a str, &'a Bson)]>,
        position: usize,
    },
    Array {
        items: &'a [Bson],
        position: usize,
    },
}

impl<'a> Frame<'a> {
    fn document(doc: &'a Document) -> Self {
        Frame::Document {
            entries: doc.iter().map(|(k, v)| (k.as_str(), v)).collect(),
            position: 0,
        }
    }

    fn current(&self) -> Option<(Option<&'a str>, &'a Bson)> {
        match self {
            Frame::Document { entries, position } => {
                entries.get(*position).map(|(name, value)| (Some(*name), *value))
            }
            Frame::Array { items, position } => items.get(*position).map(|value| (None, value)),
        }
    }

    fn advance(&mut self) {
        match self {
            Frame::Document { position, .. } | Frame::Array { position, .. } => *position += 1,
        }
    }

    fn position(&self) -> usize {
        match self {
            Frame::Document { position, .. } | Frame::Array { position, .. } => *position,
        }
    }
}

/// Saved reader position.
#[derive(Debug, Clone)]
pub struct Bookmark<'a> {
    stack: Vec<Frame<'a>>,
}

/// Cursor over the elements of a BSON document.
#[derive(Debug, Clone)]
pub struct BsonReader<'a> {
    stack: Vec<Frame<'a>>,
}

impl<'a> BsonReader<'a> {
    /// Create a reader positioned on the first element of a document.
    pub fn new(doc: &'a Document) -> Self {
        Self {
            stack: vec![Frame::document(doc)],
        }
    }

    /// Create a reader positioned on the first item of an array.
    pub fn from_array(items: &'a [Bson]) -> Self {
        Self {
            stack: vec![Frame::Array { items, position: 0 }],
        }
    }

    fn top(&self) -> MongoResult<&Frame<'a>> {
        self.stack
            .last()
            .ok_or_else(|| MongoError::serialization("reader has no open container"))
    }

    fn top_mut(&mut self) -> MongoResult<&mut Frame<'a>> {
        self.stack
            .last_mut()
            .ok_or_else(|| MongoError::serialization("reader has no open container"))
    }

    /// Nesting depth (1 for the root container).
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Index of the current element within the innermost container.
    pub fn position(&self) -> usize {
        self.stack.last().map(Frame::position).unwrap_or(0)
    }

    /// Check if the innermost container has no more elements.
    pub fn is_at_end(&self) -> bool {
        self.stack
            .last()
            .map(|frame| frame.current().is_none())
            .unwrap_or(true)
    }

    /// Name of the current element, if the innermost container is a document.
    pub fn read_name(&self) -> Option<&'a str> {
        self.stack
            .last()
            .and_then(Frame::current)
            .and_then(|(name, _)| name)
    }

    /// Type of the current element.
    pub fn current_type(&self) -> Option<ElementType> {
        self.peek_value().map(Bson::element_type)
    }

    /// Look at the current value without consuming it.
    pub fn peek_value(&self) -> Option<&'a Bson> {
        self.stack
            .last()
            .and_then(Frame::current)
            .map(|(_, value)| value)
    }

    /// Consume the current value.
    pub fn read_value(&mut self) -> MongoResult<&'a Bson> {
        let frame = self.top_mut()?;
        let (_, value) = frame
            .current()
            .ok_or_else(|| MongoError::serialization("read past the end of the container"))?;
        frame.advance();
        Ok(value)
    }

    /// Skip the current value.
    pub fn skip_value(&mut self) -> MongoResult<()> {
        self.read_value().map(|_| ())
    }

    /// Enter the current value, which must be an array.
    pub fn read_start_array(&mut self) -> MongoResult<()> {
        match self.peek_value() {
            Some(Bson::Array(items)) => {
                self.top_mut()?.advance();
                self.stack.push(Frame::Array {
                    items: items.as_slice(),
                    position: 0,
                });
                Ok(())
            }
            Some(other) => Err(MongoError::serialization(format!(
                "expected an array, found {:?}",
                other.element_type()
            ))),
            None => Err(MongoError::serialization("expected an array, found end of container")),
        }
    }

    /// Leave the current array; all of its items must have been consumed.
    pub fn read_end_array(&mut self) -> MongoResult<()> {
        let finished = match self.top()? {
            Frame::Array { items, position } => *position >= items.len(),
            Frame::Document { .. } => {
                return Err(MongoError::serialization(
                    "read_end_array called inside a document",
                ));
            }
        };
        if !finished {
            return Err(MongoError::serialization("array still has unread items"));
        }
        self.stack.pop();
        Ok(())
    }

    /// Enter the current value, which must be a document.
    pub fn read_start_document(&mut self) -> MongoResult<()> {
        match self.peek_value() {
            Some(Bson::Document(doc)) => {
                self.top_mut()?.advance();
                self.stack.push(Frame::document(doc));
                Ok(())
            }
            Some(other) => Err(MongoError::serialization(format!(
                "expected a document, found {:?}",
                other.element_type()
            ))),
            None => Err(MongoError::serialization(
                "expected a document, found end of container",
            )),
        }
    }

    /// Leave the current sub-document; all of its elements must have been consumed.
    pub fn read_end_document(&mut self) -> MongoResult<()> {
        if self.stack.len() < 2 {
            return Err(MongoError::serialization("cannot leave the root container"));
        }
        let finished = match self.top()? {
            Frame::Document { entries, position } => *position >= entries.len(),
            Frame::Array { .. } => {
                return Err(MongoError::serialization(
                    "read_end_document called inside an array",
                ));
            }
        };
        if !finished {
            return Err(MongoError::serialization(
                "document still has unread elements",
            ));
        }
        self.stack.pop();
        Ok(())
    }

    /// Capture the current position.
    pub fn bookmark(&self) -> Bookmark<'a> {
        Bookmark {
            stack: self.stack.clone(),
        }
    }

    /// Restore a position captured with [`BsonReader::bookmark`].
    pub fn return_to_bookmark(&mut self, bookmark: Bookmark<'a>) {
        self.stack = bookmark.stack;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_read_names_and_values() {
        let doc = doc! { "a": 1, "b": "two" };
        let mut reader = BsonReader::new(&doc);

        assert_eq!(reader.read_name(), Some("a"));
        assert_eq!(reader.read_value().unwrap(), &Bson::Int32(1));
        assert_eq!(reader.read_name(), Some("b"));
        assert_eq!(reader.current_type(), Some(ElementType::String));
        reader.skip_value().unwrap();
        assert!(reader.is_at_end());
        assert!(reader.read_value().is_err());
    }

    #[test]
    fn test_array_descent() {
        let doc = doc! { "items": ["x", "y"], "after": true };
        let mut reader = BsonReader::new(&doc);

        reader.read_start_array().unwrap();
        assert_eq!(reader.depth(), 2);
        assert_eq!(reader.read_name(), None);
        assert_eq!(reader.read_value().unwrap().as_str(), Some("x"));
        assert!(reader.read_end_array().is_err());
        reader.read_value().unwrap();
        reader.read_end_array().unwrap();

        assert_eq!(reader.read_name(), Some("after"));
    }

    #[test]
    fn test_start_array_rejects_scalars() {
        let doc = doc! { "items": 5 };
        let mut reader = BsonReader::new(&doc);
        assert!(reader.read_start_array().is_err());
        assert_eq!(reader.read_name(), Some("items"));
    }

    #[test]
    fn test_bookmark_restores_nested_position() {
        let doc = doc! { "items": [{ "sku": "A1" }, { "sku": "B2" }], "next": 1 };
        let mut reader = BsonReader::new(&doc);
        let mark = reader.bookmark();

        reader.read_start_array().unwrap();
        reader.read_start_document().unwrap();
        assert_eq!(reader.read_name(), Some("sku"));
        reader.skip_value().unwrap();
        assert_eq!(reader.depth(), 3);

        reader.return_to_bookmark(mark);
        assert_eq!(reader.depth(), 1);
        assert_eq!(reader.read_name(), Some("items"));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_end_document_requires_nesting() {
        let doc = doc! {};
        let mut reader = BsonReader::new(&doc);
        assert!(reader.read_end_document().is_err());
    }

    #[test]
    fn test_decode_attempt() {
        let ok: DecodeAttempt<i32> = DecodeAttempt::Decoded(1);
        assert!(ok.is_decoded());
        assert_eq!(ok.ok(), Some(1));

        let miss: DecodeAttempt<i32> = DecodeAttempt::FormatMismatch("nope".into());
        assert!(!miss.is_decoded());
        assert_eq!(miss.ok(), None);
    }
}
