//! Shared test harness: in-memory services plus a simulated device.

#![allow(dead_code)]

use std::sync::Arc;

use tessera_core::callback::CallbackDispatcher;
use tessera_core::clock::ManualClock;
use tessera_core::config::{CryptoConfig, RecoveryConfig, TokenConfig};
use tessera_core::core_activation::{
    ActivationService, InitActivationRequest, InitActivationResponse, PrepareActivationRequest,
    PreparePayload,
};
use tessera_core::core_application::{ApplicationDetail, ApplicationService};
use tessera_core::core_crypto::ecies::encrypt_request;
use tessera_core::core_crypto::kdf::{derive_factor_key, derive_transport_key};
use tessera_core::core_crypto::signature::compute_signature;
use tessera_core::core_crypto::{EcKeyPair, EcPublicKey, SignatureType};
use tessera_core::core_recovery::RecoveryService;
use tessera_core::core_signature::SignatureService;
use tessera_core::core_store::repository;
use tessera_core::core_token::TokenService;
use tessera_core::core_vault::VaultService;
use tessera_core::{KeyAtRestCodec, Store};

pub const START_TIME: u64 = 1_700_000_000_000;

pub struct Harness {
    pub clock: ManualClock,
    pub store: Store,
    pub activation: Arc<ActivationService>,
    pub applications: Arc<ApplicationService>,
    pub signature: Arc<SignatureService>,
    pub recovery: RecoveryService,
    pub tokens: TokenService,
    pub vault: VaultService,
    pub app: ApplicationDetail,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_crypto_config(CryptoConfig::default())
    }

    pub fn with_crypto_config(crypto: CryptoConfig) -> Self {
        let store = Store::in_memory().expect("in-memory store");
        let clock = ManualClock::new(START_TIME);
        let clock_arc: Arc<dyn tessera_core::Clock> = Arc::new(clock.clone());
        let recovery_config = RecoveryConfig::default();

        let applications = Arc::new(ApplicationService::new(store.clone(), clock_arc.clone()));
        let activation = Arc::new(ActivationService::new(
            store.clone(),
            clock_arc,
            KeyAtRestCodec::new("").expect("codec"),
            CallbackDispatcher::disabled(),
            crypto,
            recovery_config.clone(),
        ));
        let signature = Arc::new(SignatureService::new(activation.clone(), applications.clone()));
        let recovery = RecoveryService::new(activation.clone(), recovery_config);
        let tokens = TokenService::new(signature.clone(), TokenConfig::default());
        let vault = VaultService::new(signature.clone());

        let app = applications.create_application("test-app").expect("application");

        Self {
            clock,
            store,
            activation,
            applications,
            signature,
            recovery,
            tokens,
            vault,
            app,
        }
    }

    pub fn application_key(&self) -> &str {
        &self.app.versions[0].application_key
    }

    pub fn application_secret(&self) -> &[u8] {
        self.app.versions[0].application_secret.as_bytes()
    }

    pub fn init(&self, user_id: &str) -> InitActivationResponse {
        self.activation
            .init(InitActivationRequest {
                user_id: user_id.to_string(),
                application_id: self.app.id,
                activation_name: None,
                extras: None,
                max_failed_attempts: None,
                expire_at: None,
            })
            .expect("init")
    }

    /// Run the device side of Prepare; returns the decrypted payload
    pub fn prepare(&self, activation_code: &str, device: &EcKeyPair) -> PreparePayload {
        self.try_prepare(activation_code, device).expect("prepare")
    }

    pub fn try_prepare(
        &self,
        activation_code: &str,
        device: &EcKeyPair,
    ) -> Result<PreparePayload, tessera_core::ServiceError> {
        let master_public =
            EcPublicKey::from_base64(&self.app.master_public_key).expect("master key");
        let (envelope, context) = encrypt_request(
            &master_public,
            self.application_secret(),
            &device.public_key().to_bytes(),
        );
        let sealed = self.activation.prepare(PrepareActivationRequest {
            activation_code: activation_code.to_string(),
            application_key: self.application_key().to_string(),
            envelope,
        })?;
        let plaintext = context.decrypt_response(&sealed).expect("response decrypt");
        Ok(serde_json::from_slice(&plaintext).expect("payload decode"))
    }

    /// Full happy path: init + prepare + commit; returns the init response
    /// and the device key pair
    pub fn activate(&self, user_id: &str) -> (InitActivationResponse, EcKeyPair) {
        let init = self.init(user_id);
        let device = EcKeyPair::generate();
        self.prepare(&init.activation_code, &device);
        self.activation.commit(&init.activation_id).expect("commit");
        (init, device)
    }

    /// Server public key as the device learned it during Prepare
    pub fn server_public_key(&self, activation_id: &str) -> EcPublicKey {
        let record = self
            .store
            .read(|conn| repository::find_activation(conn, activation_id))
            .expect("read")
            .expect("activation exists");
        EcPublicKey::from_base64(&record.server_key_public).expect("server key")
    }

    /// Device-side master secret for an activation
    pub fn device_master_secret(&self, activation_id: &str, device: &EcKeyPair) -> [u8; 32] {
        device.shared_secret(&self.server_public_key(activation_id))
    }

    /// Compute a device-side signature at an explicit counter
    pub fn device_signature(
        &self,
        activation_id: &str,
        device: &EcKeyPair,
        signature_type: SignatureType,
        counter: u64,
        data: &[u8],
    ) -> String {
        let secret = self.device_master_secret(activation_id, device);
        let keys: Vec<[u8; 16]> = signature_type
            .factors()
            .iter()
            .map(|f| derive_factor_key(&secret, *f))
            .collect();
        compute_signature(&keys, counter, data, self.application_secret())
    }

    /// Device-side transport key
    pub fn device_transport_key(&self, activation_id: &str, device: &EcKeyPair) -> [u8; 16] {
        derive_transport_key(&self.device_master_secret(activation_id, device))
    }
}
