// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock fleet for tests and local development.
//!
//! Sessions live in an in-process map; tests seed them, script status
//! sequences, and inject failures per session id.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::Fleet;
use crate::error::{FleetError, Result};
use crate::types::{CreateSessionRequest, FleetHealth, FleetSession, QrCode};

#[derive(Default)]
struct MockState {
    sessions: HashMap<String, FleetSession>,
    /// Scripted status sequences; once drained, the last value repeats.
    status_scripts: HashMap<String, VecDeque<String>>,
    /// Session ids whose status endpoint fails with HTTP 500.
    failing: Vec<String>,
    /// Session ids with a QR code available.
    qr_codes: HashMap<String, String>,
    created: Vec<CreateSessionRequest>,
    deleted: Vec<String>,
}

/// In-process [`Fleet`] implementation.
#[derive(Default)]
pub struct MockFleet {
    state: Mutex<MockState>,
}

impl MockFleet {
    /// Create an empty mock fleet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session visible to `list_instances` and `instance_status`.
    pub fn add_session(&self, session: FleetSession) {
        let mut state = self.state.lock().unwrap();
        state.sessions.insert(session.instance_id.clone(), session);
    }

    /// Convenience: add a bare session with just an id and status.
    pub fn add_simple_session(&self, instance_id: &str, status: &str) {
        self.add_session(FleetSession {
            instance_id: instance_id.to_string(),
            status: status.to_string(),
            phone: None,
            profile_name: None,
            company_name: None,
        });
    }

    /// Script a sequence of statuses for one session. Each `instance_status`
    /// call consumes one entry; the final entry repeats once drained.
    pub fn script_statuses(&self, instance_id: &str, statuses: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.status_scripts.insert(
            instance_id.to_string(),
            statuses.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Make `instance_status` for this session fail with HTTP 500.
    pub fn fail_status(&self, instance_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .push(instance_id.to_string());
    }

    /// Provide a QR code for a session.
    pub fn set_qr_code(&self, instance_id: &str, image: &str) {
        self.state
            .lock()
            .unwrap()
            .qr_codes
            .insert(instance_id.to_string(), image.to_string());
    }

    /// Sessions created through this mock.
    pub fn created(&self) -> Vec<CreateSessionRequest> {
        self.state.lock().unwrap().created.clone()
    }

    /// Session ids deleted through this mock.
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl Fleet for MockFleet {
    async fn health(&self) -> Result<FleetHealth> {
        let state = self.state.lock().unwrap();
        Ok(FleetHealth {
            success: true,
            status: "online".to_string(),
            active_instances: state.sessions.len() as u32,
        })
    }

    async fn list_instances(&self) -> Result<Vec<FleetSession>> {
        let state = self.state.lock().unwrap();
        let mut sessions: Vec<FleetSession> = state.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(sessions)
    }

    async fn instance_status(&self, worker_instance_id: &str) -> Result<String> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        if state.failing.iter().any(|id| id == worker_instance_id) {
            return Err(FleetError::Status {
                endpoint: "instance-status".to_string(),
                status: 500,
                body: "mock failure".to_string(),
            });
        }

        if let Some(script) = state.status_scripts.get_mut(worker_instance_id) {
            let status = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap_or_else(|| "unknown".to_string())
            };
            if let Some(session) = state.sessions.get_mut(worker_instance_id) {
                session.status = status.clone();
            }
            return Ok(status);
        }

        state
            .sessions
            .get(worker_instance_id)
            .map(|s| s.status.clone())
            .ok_or_else(|| FleetError::Rejected {
                endpoint: "instance-status".to_string(),
                message: format!("unknown session {worker_instance_id}"),
            })
    }

    async fn create_instance(&self, request: &CreateSessionRequest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.sessions.insert(
            request.instance_id.clone(),
            FleetSession {
                instance_id: request.instance_id.clone(),
                status: "initializing".to_string(),
                phone: None,
                profile_name: None,
                company_name: None,
            },
        );
        state.created.push(request.clone());
        Ok(())
    }

    async fn delete_instance(&self, worker_instance_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.sessions.remove(worker_instance_id);
        state.deleted.push(worker_instance_id.to_string());
        Ok(())
    }

    async fn qr_code(&self, worker_instance_id: &str) -> Result<QrCode> {
        let state = self.state.lock().unwrap();
        match state.qr_codes.get(worker_instance_id) {
            Some(image) => Ok(QrCode::Image(image.clone())),
            None => Ok(QrCode::Waiting),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_statuses_drain_and_repeat() {
        let fleet = MockFleet::new();
        fleet.add_simple_session("w-1", "connecting");
        fleet.script_statuses("w-1", &["error", "error", "ready"]);

        assert_eq!(fleet.instance_status("w-1").await.unwrap(), "error");
        assert_eq!(fleet.instance_status("w-1").await.unwrap(), "error");
        assert_eq!(fleet.instance_status("w-1").await.unwrap(), "ready");
        // Last entry repeats.
        assert_eq!(fleet.instance_status("w-1").await.unwrap(), "ready");
    }

    #[tokio::test]
    async fn failing_session_returns_server_error() {
        let fleet = MockFleet::new();
        fleet.add_simple_session("w-1", "connecting");
        fleet.fail_status("w-1");

        let err = fleet.instance_status("w-1").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unknown_session_is_not_transient() {
        let fleet = MockFleet::new();
        let err = fleet.instance_status("missing").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
