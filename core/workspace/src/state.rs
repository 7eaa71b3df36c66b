//! Local workspace state: items and their sync data.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use docsync_common::SyncData;

use crate::item::WorkspaceItem;
use crate::paths::{git_path_for_item, GitPaths};

/// One mutation computed by reconciliation.
///
/// A change without item and sync data is a deletion of whatever was
/// recorded under `sync_data_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Remote path the sync data is recorded under.
    pub sync_data_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<WorkspaceItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_data: Option<SyncData>,
}

impl Change {
    pub fn upsert(sync_data_id: impl Into<String>, item: WorkspaceItem, sync_data: SyncData) -> Self {
        Self {
            sync_data_id: sync_data_id.into(),
            item: Some(item),
            sync_data: Some(sync_data),
        }
    }

    pub fn deletion(sync_data_id: impl Into<String>) -> Self {
        Self {
            sync_data_id: sync_data_id.into(),
            item: None,
            sync_data: None,
        }
    }

    pub fn is_deletion(&self) -> bool {
        self.item.is_none()
    }
}

/// Items of the local workspace and the sync data recorded for each remote path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    items: BTreeMap<String, WorkspaceItem>,
    sync_data: BTreeMap<String, SyncData>,
    /// Remote location paths whose settings segment does not re-encode
    /// to the same string, pinned to their item.
    #[serde(default)]
    bindings: BTreeMap<String, String>,
}

impl WorkspaceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &BTreeMap<String, WorkspaceItem> {
        &self.items
    }

    pub fn item(&self, id: &str) -> Option<&WorkspaceItem> {
        self.items.get(id)
    }

    /// Insert or replace a local item.
    pub fn upsert_item(&mut self, item: WorkspaceItem) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn remove_item(&mut self, id: &str) -> Option<WorkspaceItem> {
        self.items.remove(id)
    }

    /// Sync data keyed by remote path.
    pub fn sync_data(&self) -> &BTreeMap<String, SyncData> {
        &self.sync_data
    }

    pub fn sync_data_for(&self, sync_data_id: &str) -> Option<&SyncData> {
        self.sync_data.get(sync_data_id)
    }

    pub fn set_sync_data(&mut self, sync_data_id: impl Into<String>, sync_data: SyncData) {
        self.sync_data.insert(sync_data_id.into(), sync_data);
    }

    pub fn remove_sync_data(&mut self, sync_data_id: &str) -> Option<SyncData> {
        self.sync_data.remove(sync_data_id)
    }

    pub fn git_paths(&self) -> GitPaths {
        GitPaths::compute(&self.items, &self.bindings)
    }

    /// Repository path of an item against the current workspace.
    pub fn git_path_for_item(&self, item: &WorkspaceItem) -> Option<String> {
        if let Some((path, _)) = self.bindings.iter().find(|(_, id)| **id == item.id) {
            return Some(path.clone());
        }
        git_path_for_item(item, &self.items)
    }

    /// Record upserted items and sync data, and drop what deletions name.
    pub fn apply_changes(&mut self, changes: &[Change]) {
        let paths = self.git_paths();
        for change in changes {
            match (&change.item, &change.sync_data) {
                (Some(item), Some(sync_data)) => {
                    if item.is_location() {
                        self.bindings
                            .insert(change.sync_data_id.clone(), item.id.clone());
                    }
                    self.items.insert(item.id.clone(), item.clone());
                    self.sync_data
                        .insert(change.sync_data_id.clone(), sync_data.clone());
                }
                _ => {
                    self.sync_data.remove(&change.sync_data_id);
                    self.bindings.remove(&change.sync_data_id);
                    if let Some(id) = paths.item_at(&change.sync_data_id) {
                        self.items.remove(id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_common::ItemType;

    #[test]
    fn test_apply_upsert_and_delete() {
        let mut state = WorkspaceState::new();
        let folder = WorkspaceItem::folder("f1", "notes", None);
        let file = WorkspaceItem::file("n1", "todo", Some("f1".to_string()));
        state.apply_changes(&[
            Change::upsert(
                "notes/",
                folder.clone(),
                SyncData::new("notes/", ItemType::Folder, folder.hash),
            ),
            Change::upsert(
                "notes/todo.md",
                file.clone(),
                SyncData::new("notes/todo.md", ItemType::File, file.hash),
            ),
        ]);
        assert_eq!(state.items().len(), 2);
        assert_eq!(
            state.git_path_for_item(&file).as_deref(),
            Some("notes/todo.md")
        );

        state.apply_changes(&[Change::deletion("notes/todo.md")]);
        assert!(state.item("n1").is_none());
        assert!(state.sync_data_for("notes/todo.md").is_none());
        assert!(state.item("f1").is_some());
    }

    #[test]
    fn test_deleting_unknown_path_is_harmless() {
        let mut state = WorkspaceState::new();
        state.apply_changes(&[Change::deletion("ghost.md")]);
        assert_eq!(state, WorkspaceState::new());
    }

    #[test]
    fn test_state_serializes() {
        let mut state = WorkspaceState::new();
        state.upsert_item(WorkspaceItem::file("n1", "todo", None));
        state.set_sync_data(
            "/todo.md",
            SyncData::new("/todo.md", ItemType::Content, 7).with_sha("abc"),
        );

        let json = serde_json::to_string(&state).unwrap();
        let back: WorkspaceState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
