//! Wiring: one local store, one session store, one client handle, and every
//! feature service built on top of them.

use std::sync::Arc;

use tracing::info;

use crate::auth::AuthService;
use crate::backend::BackendFactory;
use crate::backend_memory::{MemoryBackendFactory, MemoryDatabase};
use crate::backend_rest::RestBackendFactory;
use crate::cart::Cart;
use crate::client::ClientHandle;
use crate::config::{MarketConfig, StorageBackend};
use crate::customers::CustomerService;
use crate::errors::{MarketError, MarketResult};
use crate::local_store::{MemoryStorage, Storage};
use crate::local_store_logging::LoggingStorage;
use crate::local_store_sled::SledStorage;
use crate::orders::OrderService;
use crate::payment_methods::{PaymentMethodsController, DEFAULT_MAX_FETCH_ATTEMPTS};
use crate::products::ProductService;
use crate::reviews::ReviewService;
use crate::session::SessionStore;
use crate::settings::{SettingsService, ThemeStore};

pub const OFFLINE_ANON_KEY: &str = "offline-anon-key";
const DEFAULT_PAGE_SIZE: usize = 20;

pub struct Marketplace {
    pub handle: ClientHandle,
    pub auth: AuthService,
    pub cart: Cart,
    pub orders: OrderService,
    pub payment_methods: PaymentMethodsController,
    pub products: ProductService,
    pub reviews: ReviewService,
    pub customers: CustomerService,
    pub settings: SettingsService,
    pub theme: ThemeStore,
}

impl Marketplace {
    pub fn new(
        storage: Arc<dyn Storage>,
        factory: Arc<dyn BackendFactory>,
        page_size: usize,
        max_fetch_attempts: u32,
    ) -> MarketResult<Self> {
        let sessions = SessionStore::new(Arc::clone(&storage));
        let handle = ClientHandle::new(factory, sessions)?;
        let cart = Cart::new(Arc::clone(&storage));

        Ok(Self {
            auth: AuthService::new(handle.clone()),
            orders: OrderService::new(handle.clone(), cart.clone(), page_size),
            payment_methods: PaymentMethodsController::new(handle.clone(), max_fetch_attempts),
            products: ProductService::new(handle.clone(), page_size),
            reviews: ReviewService::new(handle.clone()),
            customers: CustomerService::new(handle.clone(), page_size),
            settings: SettingsService::new(handle.clone()),
            theme: ThemeStore::new(storage),
            cart,
            handle,
        })
    }

    /// Build against the hosted backend described by `config`.
    pub fn from_config(config: &MarketConfig) -> MarketResult<Self> {
        config.validate()?;

        let storage: Arc<dyn Storage> = match config.storage_backend {
            StorageBackend::Sled => {
                let path = config.storage_path.to_string_lossy();
                let sled = SledStorage::open(&path).map_err(|e| MarketError::storage("open local store", e.to_string()))?;
                Arc::new(LoggingStorage::new(sled))
            }
            StorageBackend::Memory => Arc::new(LoggingStorage::new(MemoryStorage::new())),
        };
        let factory = Arc::new(RestBackendFactory::new(
            config.backend_url.clone(),
            config.anon_key.clone(),
            config.request_timeout(),
        ));

        info!(backend = %config.backend_url, storage = ?config.storage_backend, "marketplace client ready");
        Self::new(storage, factory, config.page_size, config.payment_fetch_max_attempts)
    }

    /// Everything in process: memory storage and a memory database.
    pub fn in_memory(db: Arc<MemoryDatabase>) -> MarketResult<Self> {
        Self::with_storage(db, Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(db: Arc<MemoryDatabase>, storage: Arc<dyn Storage>) -> MarketResult<Self> {
        let factory = Arc::new(MemoryBackendFactory::new(db, OFFLINE_ANON_KEY));
        Self::new(storage, factory, DEFAULT_PAGE_SIZE, DEFAULT_MAX_FETCH_ATTEMPTS)
    }

    /// Sign out and forget per-user client state.
    pub fn logout(&self) -> MarketResult<()> {
        self.payment_methods.reset();
        self.auth.logout()
    }
}
