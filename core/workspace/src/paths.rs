//! Mapping between workspace items and repository paths.
//!
//! Layout of the app-data repository:
//! - folder `a/b/`, file `a/b/name.md`
//! - content `/{file path}` (the leading slash keeps it apart from the file)
//! - data `.stackedit-data/{id}.json`
//! - locations `{file path minus .md}.{base64url JSON}.sync` or `.publish`

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

use docsync_common::{Error, ItemType, Result, DATA_PREFIX};

use crate::item::{WorkspaceItem, TRASH_ID};

pub const TRASH_PATH: &str = ".stackedit-trash/";
pub const MARKDOWN_EXT: &str = ".md";
pub const SYNC_EXT: &str = ".sync";
pub const PUBLISH_EXT: &str = ".publish";

pub fn data_path(id: &str) -> String {
    format!("{}{}.json", DATA_PREFIX, id)
}

pub fn content_path(file_path: &str) -> String {
    format!("/{}", file_path)
}

pub fn content_id(file_id: &str) -> String {
    format!("{}/content", file_id)
}

pub fn location_ext(item_type: ItemType) -> Option<&'static str> {
    match item_type {
        ItemType::SyncLocation => Some(SYNC_EXT),
        ItemType::PublishLocation => Some(PUBLISH_EXT),
        _ => None,
    }
}

pub fn encode_location_data(extra: &Map<String, Value>) -> String {
    URL_SAFE_NO_PAD.encode(Value::Object(extra.clone()).to_string())
}

/// Decode the settings segment of a location path.
///
/// # Errors
/// - `Serialization` if the segment is not base64url of a JSON object
pub fn decode_location_data(segment: &str) -> Result<Map<String, Value>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| Error::Serialization(format!("Invalid location data: {}", e)))?;
    match serde_json::from_slice(&bytes)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Serialization(
            "Location data is not an object".to_string(),
        )),
    }
}

/// Split `{stem}.{data}{ext}` into the owning markdown path and the data segment.
pub fn split_location_path<'a>(path: &'a str, ext: &str) -> Option<(String, &'a str)> {
    let (stem, data) = path.strip_suffix(ext)?.rsplit_once('.')?;
    let valid = !stem.is_empty()
        && !data.is_empty()
        && data
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then(|| (format!("{}{}", stem, MARKDOWN_EXT), data))
}

fn folder_path(items: &BTreeMap<String, WorkspaceItem>, id: Option<&str>) -> String {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut prefix = "";
    let mut current = id;
    while let Some(id) = current {
        if id == TRASH_ID {
            prefix = TRASH_PATH;
            break;
        }
        if !seen.insert(id) {
            break;
        }
        match items.get(id) {
            Some(folder) if folder.item_type == ItemType::Folder => {
                names.push(folder.name.as_str());
                current = folder.parent_id.as_deref();
            }
            _ => break,
        }
    }

    let mut path = prefix.to_string();
    for name in names.iter().rev() {
        path.push_str(name);
        path.push('/');
    }
    path
}

/// Repository path of an item, resolved against the other workspace items.
///
/// Returns `None` for content whose file is unknown and for locations
/// whose file is unknown.
pub fn git_path_for_item(
    item: &WorkspaceItem,
    items: &BTreeMap<String, WorkspaceItem>,
) -> Option<String> {
    match item.item_type {
        ItemType::Folder if item.id == TRASH_ID => Some(TRASH_PATH.to_string()),
        ItemType::Folder => Some(format!(
            "{}{}/",
            folder_path(items, item.parent_id.as_deref()),
            item.name
        )),
        ItemType::File => Some(format!(
            "{}{}{}",
            folder_path(items, item.parent_id.as_deref()),
            item.name,
            MARKDOWN_EXT
        )),
        ItemType::Content => {
            let file = items.get(item.id.strip_suffix("/content")?)?;
            git_path_for_item(file, items).map(|p| content_path(&p))
        }
        ItemType::Data => Some(data_path(&item.id)),
        ItemType::SyncLocation | ItemType::PublishLocation => {
            let file = items.get(item.file_id.as_deref()?)?;
            let file_path = git_path_for_item(file, items)?;
            let stem = file_path
                .strip_suffix(MARKDOWN_EXT)
                .unwrap_or(&file_path)
                .to_string();
            let ext = location_ext(item.item_type)?;
            Some(format!("{}.{}{}", stem, encode_location_data(&item.extra), ext))
        }
    }
}

/// Both directions of the item ↔ path mapping for a whole workspace.
#[derive(Debug, Default)]
pub struct GitPaths {
    by_item: HashMap<String, String>,
    by_path: HashMap<String, String>,
}

impl GitPaths {
    /// Compute paths for every item. `bindings` (path → item id) take
    /// precedence over computed paths.
    pub fn compute(
        items: &BTreeMap<String, WorkspaceItem>,
        bindings: &BTreeMap<String, String>,
    ) -> Self {
        let mut paths = Self::default();
        for item in items.values() {
            if item.item_type == ItemType::Content {
                continue;
            }
            if let Some(path) = git_path_for_item(item, items) {
                if item.item_type == ItemType::File {
                    paths.insert(content_id(&item.id), content_path(&path));
                }
                paths.insert(item.id.clone(), path);
            }
        }
        for (path, id) in bindings {
            if items.contains_key(id) {
                paths.insert(id.clone(), path.clone());
            }
        }
        paths
    }

    fn insert(&mut self, id: String, path: String) {
        if let Some(previous) = self.by_item.insert(id.clone(), path.clone()) {
            if self.by_path.get(&previous) == Some(&id) {
                self.by_path.remove(&previous);
            }
        }
        self.by_path.insert(path, id);
    }

    pub fn path_of(&self, item_id: &str) -> Option<&str> {
        self.by_item.get(item_id).map(String::as_str)
    }

    pub fn item_at(&self, path: &str) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }
}
