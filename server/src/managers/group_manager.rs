//! Group state and change log. The server never
//! inspects group membership; it only enforces monotonic `GroupChange`
//! versioning and keeps the append-only log clients replay from.
//!
//! Not present in the retrieved base files; grounded on
//! `client_presence_manager.rs`'s shape (an `Arc<Mutex<HashMap<..>>>` behind
//! a manager struct) since groups have no dedicated base module.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use common::web_api::{GroupChange, GroupChangeLog, GroupState};
use tokio::sync::RwLock;

use super::manager::Manager;

#[derive(Debug, Clone)]
struct Group {
    state: GroupState,
    log: GroupChangeLog,
}

#[derive(Debug, Clone, Default)]
pub struct GroupManager {
    groups: Arc<RwLock<HashMap<Box<[u8]>, Group>>>,
}

impl Manager for GroupManager {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl GroupManager {
    pub fn connect() -> Self {
        Self::default()
    }

    /// `PUT /v1/groups`: creates the group at version 0 if `group_id` is not
    /// already taken.
    pub async fn create(&self, group_id: Box<[u8]>, group: Box<[u8]>) -> Result<(), GroupState> {
        let mut groups = self.groups.write().await;
        if let Some(existing) = groups.get(&group_id) {
            return Err(existing.state.clone());
        }
        groups.insert(
            group_id,
            Group {
                state: GroupState { version: 0, group },
                log: GroupChangeLog::default(),
            },
        );
        Ok(())
    }

    pub async fn get_state(&self, group_id: &[u8]) -> Option<GroupState> {
        self.groups.read().await.get(group_id).map(|g| g.state.clone())
    }

    /// `PATCH /v1/groups`: applies `change` if it advances the stored
    /// version by exactly one. Returns the current state on mismatch so the
    /// caller can surface a 409.
    pub async fn apply_change(
        &self,
        group_id: &[u8],
        updated_group: Box<[u8]>,
        change: GroupChange,
    ) -> Result<(), Option<GroupState>> {
        let mut groups = self.groups.write().await;
        let group = groups.get_mut(group_id).ok_or(None)?;
        if change.version != group.state.version + 1 {
            return Err(Some(group.state.clone()));
        }
        group.state = GroupState {
            version: change.version,
            group: updated_group,
        };
        group.log.changes.push(change);
        Ok(())
    }

    /// `GET /v1/groups/logs/{fromVersion}`.
    pub async fn change_log_since(&self, group_id: &[u8], from_version: u32) -> GroupChangeLog {
        let groups = self.groups.read().await;
        let changes = groups
            .get(group_id)
            .map(|g| {
                g.log
                    .changes
                    .iter()
                    .filter(|change| change.version > from_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        GroupChangeLog { changes }
    }
}
