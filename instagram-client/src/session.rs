//! Persisted login state for the private API.

use crate::device::DeviceProfile;
use chrono::{DateTime, Utc};
use orders_core::CoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

/// Identifiers the app generates once per install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIds {
    pub uuid: String,
    pub phone_id: String,
    pub client_session_id: String,
    pub advertising_id: String,
    pub android_device_id: String,
}

impl DeviceIds {
    pub fn generate() -> Self {
        let android_device_id = format!(
            "android-{}",
            &Uuid::new_v4().simple().to_string()[..16]
        );
        Self {
            uuid: Uuid::new_v4().to_string(),
            phone_id: Uuid::new_v4().to_string(),
            client_session_id: Uuid::new_v4().to_string(),
            advertising_id: Uuid::new_v4().to_string(),
            android_device_id,
        }
    }
}

/// Authenticated (or about to be) handle for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Value of the `Authorization` header handed out at login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    pub device: DeviceProfile,
    pub ids: DeviceIds,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_validated: Option<DateTime<Utc>>,
}

impl Session {
    /// Fresh, unauthenticated session with a random device identity.
    #[must_use]
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            user_id: None,
            authorization: None,
            mid: None,
            device: DeviceProfile::random(),
            ids: DeviceIds::generate(),
            created_at: Utc::now(),
            last_validated: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authorization.is_some()
    }

    pub fn mark_validated(&mut self) {
        self.last_validated = Some(Utc::now());
    }

    pub fn user_agent(&self) -> String {
        self.device.user_agent()
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let session: Self = serde_json::from_str(&content)?;
        debug!("Loaded session for {} from {}", session.username, path.display());
        Ok(session)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Deletes the persisted session at `path`. Missing files are ignored.
    pub fn remove(path: &Path) -> Result<(), CoreError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let mut session = Session::new("shop");
        session.authorization = Some("Bearer IGT:2:abc".to_string());
        session.user_id = Some("1234".to_string());
        session.save(&path).unwrap();

        let loaded = Session::load(&path).unwrap();
        assert_eq!(loaded.username, "shop");
        assert!(loaded.is_authenticated());
        assert_eq!(loaded.ids, session.ids);
        assert_eq!(loaded.device, session.device);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Session::load(&path),
            Err(CoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Session::remove(&dir.path().join("absent.json")).is_ok());
    }

    #[test]
    fn test_android_device_id_shape() {
        let ids = DeviceIds::generate();
        assert!(ids.android_device_id.starts_with("android-"));
        assert_eq!(ids.android_device_id.len(), "android-".len() + 16);
    }
}
