//! Application registry
//!
//! Applications, their versions (client credential pairs), master key pair
//! bootstrap, and the integration credentials that guard the REST boundary.
//! Version credentials sit on the hot path of every signature verification,
//! so lookups go through an in-process read-through cache invalidated on
//! any version mutation.

use argon2::password_hash::{rand_core::OsRng as ArgonRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::core_crypto::EcKeyPair;
use crate::core_store::model::{Application, ApplicationVersion, Integration};
use crate::core_store::{repository, Store};
use crate::error::{ServiceError, ServiceResult};

/// Application detail with its versions and current master public key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDetail {
    pub id: i64,
    pub name: String,
    pub master_public_key: String,
    pub versions: Vec<ApplicationVersion>,
}

/// Cached credential tuple for an application version
#[derive(Debug, Clone)]
pub struct VersionCredentials {
    pub application_id: i64,
    pub version_id: i64,
    pub application_secret: String,
    pub supported: bool,
}

/// Freshly created integration; the secret is returned exactly once
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedIntegration {
    pub id: String,
    pub name: String,
    pub client_token: String,
    pub client_secret: String,
}

/// Application and integration management
pub struct ApplicationService {
    store: Store,
    clock: Arc<dyn Clock>,
    credential_cache: RwLock<HashMap<String, VersionCredentials>>,
}

fn random_identifier() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

impl ApplicationService {
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            credential_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Create an application with a default version and its first master
    /// key pair, all in one transaction
    pub fn create_application(&self, name: &str) -> ServiceResult<ApplicationDetail> {
        if name.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("application name is empty".to_string()));
        }

        let now = self.clock.now();
        let key_pair = EcKeyPair::generate();
        let public_key = key_pair.public_key().to_base64();
        let private_key = key_pair.private_base64();

        let detail = self.store.transaction(|tx| {
            let app = repository::insert_application(tx, name)?;
            let version = repository::insert_application_version(
                tx,
                app.id,
                "default",
                &random_identifier(),
                &random_identifier(),
            )?;
            repository::insert_master_key_pair(tx, app.id, None, &public_key, &private_key, now)?;
            Ok(ApplicationDetail {
                id: app.id,
                name: app.name,
                master_public_key: public_key.clone(),
                versions: vec![version],
            })
        })?;

        info!(application_id = detail.id, "created application");
        Ok(detail)
    }

    pub fn list_applications(&self) -> ServiceResult<Vec<Application>> {
        self.store.read(repository::list_applications)
    }

    pub fn get_application_detail(&self, application_id: i64) -> ServiceResult<ApplicationDetail> {
        self.store.read(|conn| {
            let app = repository::find_application(conn, application_id)?
                .ok_or(ServiceError::NoApplicationId)?;
            let key_pair = repository::find_current_master_key_pair(conn, application_id)?
                .ok_or(ServiceError::NoMasterKeyPair)?;
            let versions = repository::list_versions(conn, application_id)?;
            Ok(ApplicationDetail {
                id: app.id,
                name: app.name,
                master_public_key: key_pair.master_key_public,
                versions,
            })
        })
    }

    pub fn create_application_version(
        &self,
        application_id: i64,
        name: &str,
    ) -> ServiceResult<ApplicationVersion> {
        let version = self.store.transaction(|tx| {
            repository::find_application(tx, application_id)?.ok_or(ServiceError::NoApplicationId)?;
            repository::insert_application_version(
                tx,
                application_id,
                name,
                &random_identifier(),
                &random_identifier(),
            )
        })?;
        self.invalidate_cache();
        Ok(version)
    }

    /// Toggle support for a version; unsupported versions reject signatures
    pub fn set_version_supported(&self, version_id: i64, supported: bool) -> ServiceResult<ApplicationVersion> {
        let version = self.store.transaction(|tx| {
            if !repository::set_version_supported(tx, version_id, supported)? {
                return Err(ServiceError::InvalidRequest("unknown application version".to_string()));
            }
            repository::find_version(tx, version_id)?
                .ok_or_else(|| ServiceError::InvalidRequest("unknown application version".to_string()))
        })?;
        self.invalidate_cache();
        Ok(version)
    }

    /// Resolve version credentials by application key, via the cache
    pub fn lookup_credentials(&self, application_key: &str) -> ServiceResult<Option<VersionCredentials>> {
        if let Some(hit) = self
            .credential_cache
            .read()
            .expect("credential cache poisoned")
            .get(application_key)
        {
            return Ok(Some(hit.clone()));
        }

        let loaded = self
            .store
            .read(|conn| repository::find_version_by_application_key(conn, application_key))?;

        Ok(loaded.map(|version| {
            let credentials = VersionCredentials {
                application_id: version.application_id,
                version_id: version.id,
                application_secret: version.application_secret,
                supported: version.supported,
            };
            self.credential_cache
                .write()
                .expect("credential cache poisoned")
                .insert(application_key.to_string(), credentials.clone());
            credentials
        }))
    }

    fn invalidate_cache(&self) {
        self.credential_cache
            .write()
            .expect("credential cache poisoned")
            .clear();
    }

    // ===== Integrations =====

    /// Register an integration; the plaintext secret is returned once and
    /// only its argon2 hash is stored
    pub fn create_integration(&self, name: &str) -> ServiceResult<CreatedIntegration> {
        let client_token = Uuid::new_v4().to_string();
        let client_secret = Uuid::new_v4().to_string();

        let salt = SaltString::generate(&mut ArgonRng);
        let hash = Argon2::default()
            .hash_password(client_secret.as_bytes(), &salt)
            .map_err(|e| ServiceError::Cryptography(format!("secret hashing failed: {}", e)))?
            .to_string();

        let integration = Integration {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            client_token: client_token.clone(),
            client_secret_hash: hash,
        };
        self.store
            .transaction(|tx| repository::insert_integration(tx, &integration))?;

        Ok(CreatedIntegration {
            id: integration.id,
            name: integration.name,
            client_token,
            client_secret,
        })
    }

    pub fn list_integrations(&self) -> ServiceResult<Vec<Integration>> {
        self.store.read(repository::list_integrations)
    }

    pub fn remove_integration(&self, id: &str) -> ServiceResult<bool> {
        self.store.transaction(|tx| repository::delete_integration(tx, id))
    }

    /// Check HTTP Basic credentials against the integration table
    pub fn verify_integration(&self, client_token: &str, client_secret: &str) -> ServiceResult<bool> {
        let Some(integration) = self
            .store
            .read(|conn| repository::find_integration_by_token(conn, client_token))?
        else {
            return Ok(false);
        };

        let parsed = PasswordHash::new(&integration.client_secret_hash)
            .map_err(|e| ServiceError::Cryptography(format!("stored hash invalid: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(client_secret.as_bytes(), &parsed)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn service() -> ApplicationService {
        let store = Store::in_memory().unwrap();
        ApplicationService::new(store, Arc::new(ManualClock::new(1000)))
    }

    #[test]
    fn test_create_application_bootstraps_version_and_keypair() {
        let service = service();
        let detail = service.create_application("mobile-bank").unwrap();
        assert_eq!(detail.versions.len(), 1);
        assert!(!detail.master_public_key.is_empty());

        let fetched = service.get_application_detail(detail.id).unwrap();
        assert_eq!(fetched.name, "mobile-bank");
        assert_eq!(fetched.master_public_key, detail.master_public_key);
    }

    #[test]
    fn test_empty_name_rejected() {
        let service = service();
        assert!(service.create_application("  ").is_err());
    }

    #[test]
    fn test_credential_lookup_and_cache() {
        let service = service();
        let detail = service.create_application("app").unwrap();
        let key = detail.versions[0].application_key.clone();

        let first = service.lookup_credentials(&key).unwrap().unwrap();
        assert_eq!(first.application_id, detail.id);
        assert!(first.supported);

        // second lookup hits the cache
        let second = service.lookup_credentials(&key).unwrap().unwrap();
        assert_eq!(second.version_id, first.version_id);

        assert!(service.lookup_credentials("missing").unwrap().is_none());
    }

    #[test]
    fn test_unsupport_invalidates_cache() {
        let service = service();
        let detail = service.create_application("app").unwrap();
        let key = detail.versions[0].application_key.clone();
        let version_id = detail.versions[0].id;

        assert!(service.lookup_credentials(&key).unwrap().unwrap().supported);
        service.set_version_supported(version_id, false).unwrap();
        assert!(!service.lookup_credentials(&key).unwrap().unwrap().supported);
        service.set_version_supported(version_id, true).unwrap();
        assert!(service.lookup_credentials(&key).unwrap().unwrap().supported);
    }

    #[test]
    fn test_integration_round_trip() {
        let service = service();
        let created = service.create_integration("gateway").unwrap();
        assert!(service
            .verify_integration(&created.client_token, &created.client_secret)
            .unwrap());
        assert!(!service
            .verify_integration(&created.client_token, "wrong")
            .unwrap());
        assert!(!service.verify_integration("unknown", "whatever").unwrap());

        assert_eq!(service.list_integrations().unwrap().len(), 1);
        assert!(service.remove_integration(&created.id).unwrap());
        assert!(service.list_integrations().unwrap().is_empty());
    }
}
