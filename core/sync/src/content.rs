//! Markdown content with embedded workspace data.
//!
//! A stored document is the markdown text, optionally followed by a block
//! `<!--stackedit_data:\n{base64 JSON}-->` carrying properties, discussions,
//! comments and history. The base64 payload is wrapped at 50 characters.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use docsync_common::{ItemType, Result};
use docsync_workspace::{hash_value, WorkspaceItem};

const DATA_OPEN: &str = "<!--stackedit_data:";
const DATA_CLOSE: &str = "-->";
const WRAP_WIDTH: usize = 50;
const EMPTY_PROPERTIES: &str = "\n";

#[derive(Debug, Default, Serialize, Deserialize)]
struct EmbeddedData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    properties: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    discussions: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comments: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    history: Option<Vec<Value>>,
}

impl EmbeddedData {
    fn is_empty(&self) -> bool {
        self.properties.is_none()
            && self.discussions.is_none()
            && self.comments.is_none()
            && self.history.is_none()
    }
}

/// Body of a file: text plus its workspace data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    /// `{fileId}/content`
    pub id: String,
    pub text: String,
    /// YAML front matter properties.
    pub properties: String,
    pub discussions: Map<String, Value>,
    pub comments: Map<String, Value>,
    pub history: Vec<Value>,
    pub hash: u64,
}

impl Content {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: "\n".to_string(),
            properties: EMPTY_PROPERTIES.to_string(),
            discussions: Map::new(),
            comments: Map::new(),
            history: Vec::new(),
            hash: 0,
        }
        .with_hash()
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self.with_hash()
    }

    pub fn with_hash(mut self) -> Self {
        self.hash = self.compute_hash();
        self
    }

    /// Hash over text, properties, discussions and comments. Id and history
    /// do not take part.
    pub fn compute_hash(&self) -> u64 {
        hash_value(&serde_json::json!({
            "type": ItemType::Content,
            "text": self.text,
            "properties": self.properties,
            "discussions": self.discussions,
            "comments": self.comments,
        }))
    }

    /// Parse a stored document.
    ///
    /// Without a data block, the workspace data of `previous` is kept (the
    /// block may have been removed by hand). A malformed block is ignored.
    pub fn parse(raw: &str, id: &str, previous: Option<&Content>) -> Self {
        let mut content = match split_data(raw) {
            Some((text, payload)) => {
                let mut content = Self::empty(id);
                match decode_data(payload) {
                    Ok(data) => content.merge(data),
                    Err(e) => debug!(id, "Ignoring unreadable content data: {}", e),
                }
                content.text = text.to_string();
                content
            }
            None => {
                let mut content = previous
                    .filter(|p| p.id == id)
                    .cloned()
                    .unwrap_or_else(|| Self::empty(id));
                content.text = raw.to_string();
                content
            }
        };
        if content.properties.is_empty() {
            content.properties = EMPTY_PROPERTIES.to_string();
        }
        content.with_hash()
    }

    fn merge(&mut self, data: EmbeddedData) {
        if let Some(properties) = data.properties {
            self.properties = properties;
        }
        if let Some(discussions) = data.discussions {
            self.discussions = discussions;
        }
        if let Some(comments) = data.comments {
            self.comments = comments;
        }
        if let Some(history) = data.history {
            self.history = history;
        }
    }

    /// Serialize for storage, appending the data block when there is any.
    pub fn serialize(&self) -> Result<String> {
        let data = EmbeddedData {
            properties: (self.properties.len() > 1).then(|| self.properties.clone()),
            discussions: (!self.discussions.is_empty()).then(|| self.discussions.clone()),
            comments: (!self.comments.is_empty()).then(|| self.comments.clone()),
            history: (!self.history.is_empty()).then(|| self.history.clone()),
        };
        if data.is_empty() {
            return Ok(self.text.clone());
        }

        let encoded = STANDARD.encode(serde_json::to_string(&data)?);
        let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / WRAP_WIDTH);
        for (i, c) in encoded.chars().enumerate() {
            wrapped.push(c);
            if (i + 1) % WRAP_WIDTH == 0 {
                wrapped.push('\n');
            }
        }
        Ok(format!("{}{}\n{}\n{}", self.text, DATA_OPEN, wrapped, DATA_CLOSE))
    }

    /// Store as a workspace item.
    pub fn to_item(&self) -> WorkspaceItem {
        let mut extra = Map::new();
        extra.insert("text".to_string(), Value::from(self.text.clone()));
        extra.insert("properties".to_string(), Value::from(self.properties.clone()));
        extra.insert(
            "discussions".to_string(),
            Value::Object(self.discussions.clone()),
        );
        extra.insert("comments".to_string(), Value::Object(self.comments.clone()));
        extra.insert("history".to_string(), Value::Array(self.history.clone()));

        let mut item = WorkspaceItem::placeholder(self.id.clone(), ItemType::Content);
        item.extra = extra;
        item.hash = self.hash;
        item
    }

    /// Read back from a workspace item. Missing fields take their empty value.
    pub fn from_item(item: &WorkspaceItem) -> Self {
        let text = |key: &str| item.extra.get(key).and_then(Value::as_str).map(str::to_string);
        let object = |key: &str| {
            item.extra
                .get(key)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default()
        };
        let empty = Self::empty(item.id.clone());
        Self {
            text: text("text").unwrap_or(empty.text),
            properties: text("properties").unwrap_or(empty.properties),
            discussions: object("discussions"),
            comments: object("comments"),
            history: item
                .extra
                .get("history")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            id: item.id.clone(),
            hash: 0,
        }
        .with_hash()
    }
}

/// Split a document into text and base64 payload of its trailing data block.
fn split_data(raw: &str) -> Option<(&str, &str)> {
    let body = raw.strip_suffix(DATA_CLOSE)?;
    let start = body.rfind(DATA_OPEN)?;
    let payload = &body[start + DATA_OPEN.len()..];
    let valid = !payload.is_empty()
        && payload
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=') || c.is_whitespace());
    valid.then(|| (&raw[..start], payload))
}

fn decode_data(payload: &str) -> Result<EmbeddedData> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact).map_err(|e| {
        docsync_common::Error::Serialization(format!("Invalid content data: {}", e))
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rich() -> Content {
        let mut content = Content::empty("f1/content").with_text("# Title\n\nBody\n");
        content.properties = "title: Title\n".to_string();
        content
            .discussions
            .insert("d1".to_string(), json!({ "text": "Body" }));
        content.history = vec![json!(12345)];
        content.with_hash()
    }

    #[test]
    fn test_plain_text_has_no_data_block() {
        let content = Content::empty("f1/content").with_text("hello");
        assert_eq!(content.serialize().unwrap(), "hello");
    }

    #[test]
    fn test_serialize_then_parse() {
        let content = rich();
        let stored = content.serialize().unwrap();
        assert!(stored.starts_with("# Title\n\nBody\n<!--stackedit_data:\n"));
        assert!(stored.ends_with("\n-->"));
        assert!(stored
            .lines()
            .skip_while(|l| !l.starts_with("<!--"))
            .skip(1)
            .all(|l| l.len() <= WRAP_WIDTH || l == "-->"));

        let parsed = Content::parse(&stored, "f1/content", None);
        assert_eq!(parsed, content);
    }

    #[test]
    fn test_missing_block_keeps_previous_data() {
        let previous = rich();
        let parsed = Content::parse("edited by hand", "f1/content", Some(&previous));
        assert_eq!(parsed.text, "edited by hand");
        assert_eq!(parsed.properties, previous.properties);
        assert_eq!(parsed.discussions, previous.discussions);

        let other = Content::parse("edited by hand", "f2/content", Some(&previous));
        assert!(other.discussions.is_empty());
    }

    #[test]
    fn test_malformed_block_is_ignored() {
        let parsed = Content::parse("text<!--stackedit_data:\nnot*base64-->", "c", None);
        assert_eq!(parsed.text, "text<!--stackedit_data:\nnot*base64-->");

        let parsed = Content::parse("text<!--stackedit_data:\nAAAA\n-->", "c", None);
        assert_eq!(parsed.text, "text");
        assert_eq!(parsed.properties, "\n");
    }

    #[test]
    fn test_hash_ignores_history() {
        let mut content = rich();
        let before = content.hash;
        content.history.push(json!(67890));
        assert_eq!(content.compute_hash(), before);
        content.text.push('!');
        assert_ne!(content.compute_hash(), before);
    }

    #[test]
    fn test_item_conversion() {
        let content = rich();
        let item = content.to_item();
        assert_eq!(item.item_type, ItemType::Content);
        assert_eq!(item.hash, content.hash);
        assert_eq!(Content::from_item(&item), content);
    }
}
