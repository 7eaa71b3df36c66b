//! Change computation from a remote tree snapshot.
//!
//! Folders, files and locations are compared by item hash. Content and
//! data are compared by blob SHA, since their bodies are only known after
//! a download.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};
use uuid::Uuid;

use docsync_common::{ItemType, RemoteTree, SyncData, DATA_PREFIX};

use crate::item::{WorkspaceItem, FORCE_HASH, TRASH_ID};
use crate::paths::{
    content_id, content_path, data_path, decode_location_data, split_location_path, GitPaths,
    MARKDOWN_EXT, PUBLISH_EXT, SYNC_EXT, TRASH_PATH,
};
use crate::sha_store::ShaStore;
use crate::state::{Change, WorkspaceState};

/// Only this data document is synced through the app-data repository.
pub const TEMPLATES_DATA_ID: &str = "templates";

/// Whether a data item is tracked in the repository. Other data items stay local.
pub fn is_synced_data(id: &str) -> bool {
    id == TEMPLATES_DATA_ID
}

/// Keys owned by the item itself, never taken from a location path.
const LOCATION_RESERVED_KEYS: [&str; 4] = ["id", "type", "fileId", "hash"];

type IdSource = Box<dyn Fn() -> String + Send + Sync>;

/// Blob paths of one tree, sorted by kind.
#[derive(Default)]
struct TreeIndex {
    /// Folder path → parent folder path.
    folders: BTreeMap<String, String>,
    /// Markdown path → parent folder path.
    files: BTreeMap<String, String>,
    data: Vec<String>,
    sync_locations: Vec<String>,
    publish_locations: Vec<String>,
    shas: HashMap<String, String>,
}

impl TreeIndex {
    fn build(tree: &RemoteTree) -> Self {
        let mut index = Self::default();
        for entry in tree.blobs() {
            let path = entry.path.as_str();
            index.shas.insert(entry.path.clone(), entry.sha.clone());
            if path.starts_with(DATA_PREFIX) {
                index.data.push(entry.path.clone());
                continue;
            }

            let segments: Vec<&str> = path.split('/').collect();
            let mut parent = String::new();
            if let Some((_, dirs)) = segments.split_last() {
                for name in dirs {
                    let folder = format!("{}{}/", parent, name);
                    index.folders.insert(folder.clone(), parent);
                    parent = folder;
                }
            }

            if path.ends_with(MARKDOWN_EXT) {
                index.files.insert(entry.path.clone(), parent);
            } else if path.ends_with(SYNC_EXT) {
                index.sync_locations.push(entry.path.clone());
            } else if path.ends_with(PUBLISH_EXT) {
                index.publish_locations.push(entry.path.clone());
            }
        }
        index
    }
}

/// Computes the changes that bring a workspace in line with a remote tree.
pub struct Reconciler {
    new_id: IdSource,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            new_id: Box::new(|| Uuid::new_v4().simple().to_string()),
        }
    }

    /// Use a custom generator for ids of newly discovered items.
    pub fn with_id_source(new_id: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self {
            new_id: Box::new(new_id),
        }
    }

    /// Compute the changes for `tree` against `state`.
    ///
    /// Replaces the SHA store with the tree's blob SHAs.
    pub fn make_changes(
        &self,
        tree: &RemoteTree,
        state: &WorkspaceState,
        sha_store: &dyn ShaStore,
    ) -> Vec<Change> {
        let index = TreeIndex::build(tree);
        sha_store.replace_all(index.shas.clone());

        let mut pass = Pass {
            reconciler: self,
            state,
            paths: state.git_paths(),
            ids_by_path: HashMap::new(),
            changes: Vec::new(),
        };

        for (path, parent) in &index.folders {
            if path == TRASH_PATH {
                pass.ids_by_path.insert(path.clone(), TRASH_ID.to_string());
                continue;
            }
            let id = pass.id_for(path, false);
            let name = &path[parent.len()..path.len() - 1];
            let item = WorkspaceItem::folder(id, name, pass.ids_by_path.get(parent).cloned());
            pass.push_if_hash_changed(path, item);
        }

        for (path, parent) in &index.files {
            let id = pass.id_for(path, true);
            let name = &path[parent.len()..path.len() - MARKDOWN_EXT.len()];
            let item = WorkspaceItem::file(id.clone(), name, pass.ids_by_path.get(parent).cloned());
            pass.push_if_hash_changed(path, item);

            pass.push_if_sha_changed(
                &content_path(path),
                WorkspaceItem::placeholder(content_id(&id), ItemType::Content),
                index.shas.get(path),
            );
        }

        let templates_path = data_path(TEMPLATES_DATA_ID);
        for path in index.data.iter().filter(|p| **p == templates_path) {
            pass.ids_by_path
                .insert(path.clone(), TEMPLATES_DATA_ID.to_string());
            pass.push_if_sha_changed(
                path,
                WorkspaceItem::placeholder(TEMPLATES_DATA_ID, ItemType::Data),
                index.shas.get(path),
            );
        }

        for (paths, ext, item_type) in [
            (&index.sync_locations, SYNC_EXT, ItemType::SyncLocation),
            (&index.publish_locations, PUBLISH_EXT, ItemType::PublishLocation),
        ] {
            for path in paths {
                pass.location(path, ext, item_type);
            }
        }

        let mut changes = pass.changes;
        for path in state.sync_data().keys() {
            if !pass.ids_by_path.contains_key(path) {
                changes.push(Change::deletion(path.clone()));
            }
        }

        debug!(
            entries = tree.entries.len(),
            changes = changes.len(),
            "Reconciled remote tree"
        );
        changes
    }
}

/// Working set of one `make_changes` call.
struct Pass<'a> {
    reconciler: &'a Reconciler,
    state: &'a WorkspaceState,
    paths: GitPaths,
    ids_by_path: HashMap<String, String>,
    changes: Vec<Change>,
}

impl Pass<'_> {
    /// Id for the item at `path`. A file id is only reused once the file
    /// or its content has been synced.
    fn id_for(&mut self, path: &str, is_file: bool) -> String {
        if let Some(id) = self.ids_by_path.get(path) {
            return id.clone();
        }
        let reusable = self.paths.item_at(path).filter(|_| {
            !is_file
                || self.state.sync_data_for(path).is_some()
                || self.state.sync_data_for(&content_path(path)).is_some()
        });
        let id = match reusable {
            Some(id) => id.to_string(),
            None => (self.reconciler.new_id)(),
        };
        if is_file {
            self.ids_by_path.insert(content_path(path), content_id(&id));
        }
        self.ids_by_path.insert(path.to_string(), id.clone());
        id
    }

    fn push_if_hash_changed(&mut self, path: &str, item: WorkspaceItem) {
        let unchanged = self
            .state
            .sync_data_for(path)
            .is_some_and(|recorded| recorded.hash == item.hash);
        if !unchanged {
            let sync_data = SyncData::new(path, item.item_type, item.hash);
            self.changes.push(Change::upsert(path, item, sync_data));
        }
    }

    fn push_if_sha_changed(&mut self, path: &str, item: WorkspaceItem, sha: Option<&String>) {
        let unchanged = self
            .state
            .sync_data_for(path)
            .is_some_and(|recorded| recorded.sha.as_ref() == sha);
        if !unchanged {
            let sync_data = SyncData {
                sha: sha.cloned(),
                ..SyncData::new(path, item.item_type, FORCE_HASH)
            };
            self.changes.push(Change::upsert(path, item, sync_data));
        }
    }

    fn location(&mut self, path: &str, ext: &str, item_type: ItemType) {
        let Some((file_path, data)) = split_location_path(path, ext) else {
            return;
        };
        // Locations of files that are not in the tree are ignored
        let Some(file_id) = self.ids_by_path.get(&file_path).cloned() else {
            return;
        };
        let mut extra = match decode_location_data(data) {
            Ok(extra) => extra,
            Err(e) => {
                warn!(path, "Skipping location: {}", e);
                return;
            }
        };
        for key in LOCATION_RESERVED_KEYS {
            extra.remove(key);
        }

        let id = match self.paths.item_at(path) {
            Some(id) => id.to_string(),
            None => (self.reconciler.new_id)(),
        };
        self.ids_by_path.insert(path.to_string(), id.clone());
        self.push_if_hash_changed(path, WorkspaceItem::location(id, item_type, file_id, extra));
    }
}
