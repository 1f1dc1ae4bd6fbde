//! DeviceArbiter - camera role ownership
//!
//! ## Responsibilities
//!
//! - Map the two logical roles (identity camera, shelf camera) to physical devices
//! - Reject any assignment that would point both roles at one device
//! - Auto-assign the first two distinct devices on first run
//! - Revalidate persisted assignments against the live device list
//!
//! A capture device is exclusively owned by at most one role at a time; the
//! sampling loops only start streams for devices this arbiter resolves.

use crate::config_store::ConfigStore;
use crate::error::{Error, Result};
use crate::models::DeviceInfo;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

const ASSIGNMENTS_KEY: &str = "camera_roles";

/// Logical camera role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraRole {
    /// Faces the operator; feeds the identity matcher
    Identity,
    /// Faces the shelf; feeds the detection-diff engine
    Shelf,
}

impl CameraRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraRole::Identity => "identity",
            CameraRole::Shelf => "shelf",
        }
    }
}

/// Persisted role-to-device mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignments {
    pub identity: Option<String>,
    pub shelf: Option<String>,
}

impl RoleAssignments {
    fn get(&self, role: CameraRole) -> Option<&String> {
        match role {
            CameraRole::Identity => self.identity.as_ref(),
            CameraRole::Shelf => self.shelf.as_ref(),
        }
    }

    fn set(&mut self, role: CameraRole, device_id: Option<String>) {
        match role {
            CameraRole::Identity => self.identity = device_id,
            CameraRole::Shelf => self.shelf = device_id,
        }
    }
}

/// Non-fatal notice surfaced after revalidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "notice")]
pub enum ArbiterNotice {
    /// A previously assigned device disappeared; roles were re-assigned
    /// from the current device list.
    DeviceChanged { missing: Vec<String> },
}

/// DeviceArbiter instance
pub struct DeviceArbiter {
    config: Arc<ConfigStore>,
    assignments: RwLock<RoleAssignments>,
}

impl DeviceArbiter {
    /// Create the arbiter, restoring any persisted assignments
    pub async fn new(config: Arc<ConfigStore>) -> Result<Self> {
        let assignments: RoleAssignments = config
            .get(ASSIGNMENTS_KEY)
            .await?
            .unwrap_or_default();

        tracing::info!(
            identity = ?assignments.identity,
            shelf = ?assignments.shelf,
            "DeviceArbiter restored"
        );

        Ok(Self {
            config,
            assignments: RwLock::new(assignments),
        })
    }

    /// Record a device for a role.
    ///
    /// Rejected with `DeviceConflict` if the other role already resolves to
    /// the same device; on rejection both assignments are left unchanged.
    pub async fn assign(&self, role: CameraRole, device_id: String) -> Result<()> {
        let mut assignments = self.assignments.write().await;

        let other = match role {
            CameraRole::Identity => CameraRole::Shelf,
            CameraRole::Shelf => CameraRole::Identity,
        };
        if assignments.get(other) == Some(&device_id) {
            return Err(Error::DeviceConflict(format!(
                "device {} is already assigned to the {} role",
                device_id,
                other.as_str()
            )));
        }

        assignments.set(role, Some(device_id.clone()));
        self.config.set(ASSIGNMENTS_KEY, &*assignments).await?;

        tracing::info!(role = role.as_str(), device_id = %device_id, "Camera role assigned");
        Ok(())
    }

    /// Resolve the device currently assigned to a role
    pub async fn resolve(&self, role: CameraRole) -> Option<String> {
        self.assignments.read().await.get(role).cloned()
    }

    /// Snapshot of both assignments
    pub async fn assignments(&self) -> RoleAssignments {
        self.assignments.read().await.clone()
    }

    /// Revalidate assignments against the currently enumerated devices.
    ///
    /// Called before any stream is started. Falls back to auto-assignment
    /// when a stored device is gone (surfacing a non-fatal `DeviceChanged`
    /// notice) or when nothing is stored yet. With fewer than two devices
    /// both roles are cleared and `InsufficientDevices` is returned so no
    /// stream starts.
    pub async fn sync_with_devices(
        &self,
        devices: &[DeviceInfo],
    ) -> Result<Option<ArbiterNotice>> {
        let mut assignments = self.assignments.write().await;

        if devices.len() < 2 {
            *assignments = RoleAssignments::default();
            self.config.set(ASSIGNMENTS_KEY, &*assignments).await?;
            return Err(Error::InsufficientDevices {
                found: devices.len(),
            });
        }

        let present = |id: &Option<String>| {
            id.as_ref()
                .map(|id| devices.iter().any(|d| &d.device_id == id))
                .unwrap_or(false)
        };

        let identity_ok = present(&assignments.identity);
        let shelf_ok = present(&assignments.shelf);

        if identity_ok && shelf_ok {
            return Ok(None);
        }

        let mut missing = Vec::new();
        if let Some(id) = assignments.identity.clone() {
            if !identity_ok {
                missing.push(id);
            }
        }
        if let Some(id) = assignments.shelf.clone() {
            if !shelf_ok {
                missing.push(id);
            }
        }

        // Keep a still-present assignment, fill the other role with the
        // first enumerated device that does not collide with it.
        let keep_identity = assignments.identity.clone().filter(|_| identity_ok);
        let keep_shelf = assignments.shelf.clone().filter(|_| shelf_ok);

        let identity = keep_identity.unwrap_or_else(|| {
            devices
                .iter()
                .find(|d| Some(&d.device_id) != keep_shelf.as_ref())
                .map(|d| d.device_id.clone())
                .unwrap_or_else(|| devices[0].device_id.clone())
        });
        let shelf = keep_shelf.unwrap_or_else(|| {
            devices
                .iter()
                .find(|d| d.device_id != identity)
                .map(|d| d.device_id.clone())
                .unwrap_or_else(|| devices[1].device_id.clone())
        });

        if identity == shelf {
            // Enumerated list had duplicate ids only
            *assignments = RoleAssignments::default();
            self.config.set(ASSIGNMENTS_KEY, &*assignments).await?;
            return Err(Error::InsufficientDevices { found: 1 });
        }

        assignments.identity = Some(identity.clone());
        assignments.shelf = Some(shelf.clone());
        self.config.set(ASSIGNMENTS_KEY, &*assignments).await?;

        tracing::info!(
            identity = %identity,
            shelf = %shelf,
            missing = ?missing,
            "Camera roles auto-assigned"
        );

        if missing.is_empty() {
            // First run: nothing was stored, so this is not a change notice
            Ok(None)
        } else {
            Ok(Some(ArbiterNotice::DeviceChanged { missing }))
        }
    }
}
