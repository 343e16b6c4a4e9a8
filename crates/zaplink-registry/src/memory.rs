// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory registry backend.
//!
//! Mirrors the PostgreSQL backend's semantics (set-once fields, state-change
//! timestamps, worker-id uniqueness) over a plain `HashMap`. Used by tests
//! and local development; not durable.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{RegistryError, Result};
use crate::record::{AdoptInstance, InstanceRecord, NewInstance, StatusPatch};
use crate::{Registry, is_connected_state};

/// `HashMap`-backed registry.
#[derive(Default)]
pub struct MemoryRegistry {
    records: Mutex<HashMap<Uuid, InstanceRecord>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

fn fill_once(slot: &mut Option<String>, offered: Option<String>) {
    let empty = slot.as_deref().is_none_or(str::is_empty);
    if empty && let Some(value) = offered.filter(|v| !v.is_empty()) {
        *slot = Some(value);
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn get(&self, id: Uuid) -> Result<Option<InstanceRecord>> {
        Ok(self.records.lock().unwrap().get(&id).cloned())
    }

    async fn get_by_worker_id(
        &self,
        worker_instance_id: &str,
    ) -> Result<Option<InstanceRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.worker_instance_id.as_deref() == Some(worker_instance_id))
            .cloned())
    }

    async fn list(&self, tenant_id: Option<&str>) -> Result<Vec<InstanceRecord>> {
        let records = self.records.lock().unwrap();
        let mut out: Vec<InstanceRecord> = records
            .values()
            .filter(|r| tenant_id.is_none_or(|t| r.tenant_id == t))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    async fn list_by_states(&self, states: &[&str]) -> Result<Vec<InstanceRecord>> {
        let records = self.records.lock().unwrap();
        let mut out: Vec<InstanceRecord> = records
            .values()
            .filter(|r| states.contains(&r.connection_state.as_str()))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    async fn insert(&self, new: NewInstance) -> Result<InstanceRecord> {
        if new.name.trim().is_empty() {
            return Err(RegistryError::Invalid("instance name is empty".into()));
        }

        let mut records = self.records.lock().unwrap();

        if let Some(worker_id) = new.worker_instance_id.as_deref()
            && records
                .values()
                .any(|r| r.worker_instance_id.as_deref() == Some(worker_id))
        {
            return Err(RegistryError::WorkerConflict(worker_id.to_string()));
        }

        let now = Utc::now();
        let record = InstanceRecord {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            worker_instance_id: new.worker_instance_id,
            name: new.name,
            connection_state: new.connection_state,
            phone: None,
            profile_name: None,
            profile_picture_ref: None,
            last_state_change_at: None,
            date_connected: None,
            date_disconnected: None,
            created_at: now,
            updated_at: now,
        };
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn apply_status(&self, id: Uuid, patch: StatusPatch) -> Result<InstanceRecord> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&id).ok_or(RegistryError::NotFound(id))?;

        let now = Utc::now();
        let was_connected = is_connected_state(&record.connection_state);
        let is_connected = is_connected_state(&patch.connection_state);

        if record.connection_state != patch.connection_state {
            record.last_state_change_at = Some(now);
        }
        if is_connected && !was_connected {
            record.date_connected = Some(now);
        }
        if !is_connected && was_connected {
            record.date_disconnected = Some(now);
        }

        record.connection_state = patch.connection_state;
        fill_once(&mut record.phone, patch.phone);
        fill_once(&mut record.profile_name, patch.profile_name);
        fill_once(&mut record.profile_picture_ref, patch.profile_picture_ref);
        record.updated_at = now;

        Ok(record.clone())
    }

    async fn bind_worker(&self, id: Uuid, worker_instance_id: &str) -> Result<InstanceRecord> {
        let mut records = self.records.lock().unwrap();

        if records
            .values()
            .any(|r| r.id != id && r.worker_instance_id.as_deref() == Some(worker_instance_id))
        {
            return Err(RegistryError::WorkerConflict(worker_instance_id.to_string()));
        }

        let record = records.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        record.worker_instance_id = Some(worker_instance_id.to_string());
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn adopt(&self, adoption: AdoptInstance) -> Result<InstanceRecord> {
        if adoption.name.trim().is_empty() {
            return Err(RegistryError::Invalid(
                "adoption requires a human-supplied name".into(),
            ));
        }

        let mut records = self.records.lock().unwrap();
        let now = Utc::now();

        // Second adoption of the same worker session binds to the existing
        // row, matching the PostgreSQL ON CONFLICT behavior.
        let existing = records
            .values_mut()
            .find(|r| r.worker_instance_id.as_deref() == Some(&adoption.worker_instance_id));

        if let Some(record) = existing {
            record.name = adoption.name;
            record.connection_state = adoption.connection_state;
            fill_once(&mut record.phone, adoption.phone);
            fill_once(&mut record.profile_name, adoption.profile_name);
            record.last_state_change_at = Some(now);
            record.updated_at = now;
            return Ok(record.clone());
        }

        let connected = is_connected_state(&adoption.connection_state);
        let record = InstanceRecord {
            id: Uuid::new_v4(),
            tenant_id: adoption.tenant_id,
            worker_instance_id: Some(adoption.worker_instance_id),
            name: adoption.name,
            connection_state: adoption.connection_state,
            phone: adoption.phone.filter(|p| !p.is_empty()),
            profile_name: adoption.profile_name,
            profile_picture_ref: None,
            last_state_change_at: Some(now),
            date_connected: connected.then_some(now),
            date_disconnected: None,
            created_at: now,
            updated_at: now,
        };
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.records.lock().unwrap().remove(&id);
        Ok(())
    }
}
