//! Shared application state: configuration plus the wired service graph.

use std::sync::Arc;

use tessera_core::callback::CallbackDispatcher;
use tessera_core::{
    ActivationService, ApplicationService, Clock, Config, KeyAtRestCodec, RecoveryService,
    SignatureService, Store, SystemClock, TokenService, VaultService,
};

pub struct AppState {
    pub config: Config,
    pub applications: Arc<ApplicationService>,
    pub activation: Arc<ActivationService>,
    pub signature: Arc<SignatureService>,
    pub recovery: RecoveryService,
    pub tokens: TokenService,
    pub vault: VaultService,
}

impl AppState {
    /// Wire the full service graph over the given store and clock. The
    /// callback dispatcher must already be started (or disabled).
    pub fn build(
        config: Config,
        store: Store,
        clock: Arc<dyn Clock>,
        callbacks: CallbackDispatcher,
    ) -> anyhow::Result<Arc<Self>> {
        let codec = KeyAtRestCodec::new(&config.crypto.master_db_encryption_key)?;

        let applications = Arc::new(ApplicationService::new(store.clone(), clock.clone()));
        let activation = Arc::new(ActivationService::new(
            store,
            clock,
            codec,
            callbacks,
            config.crypto.clone(),
            config.recovery.clone(),
        ));
        let signature = Arc::new(SignatureService::new(activation.clone(), applications.clone()));
        let recovery = RecoveryService::new(activation.clone(), config.recovery.clone());
        let tokens = TokenService::new(signature.clone(), config.token.clone());
        let vault = VaultService::new(signature.clone());

        Ok(Arc::new(Self {
            config,
            applications,
            activation,
            signature,
            recovery,
            tokens,
            vault,
        }))
    }

    /// Production wiring: file-or-memory store per config, system clock,
    /// live callback worker
    pub fn from_config(config: Config) -> anyhow::Result<Arc<Self>> {
        let store = match &config.database.path {
            Some(path) => Store::open(path, config.database.lock_timeout, config.database.pool_size)?,
            None => Store::in_memory()?,
        };
        let callbacks = CallbackDispatcher::start(&config.callback)?;
        Self::build(config, store, Arc::new(SystemClock), callbacks)
    }
}
