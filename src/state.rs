use std::sync::Arc;

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    error::AppResult,
    storage::ObjectStorage,
    store::{Store, StoreTx},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        jwt: JwtService,
    ) -> Self {
        Self {
            store,
            config: Arc::new(config),
            storage,
            jwt,
        }
    }

    pub fn tx(&self) -> AppResult<Box<dyn StoreTx>> {
        Ok(self.store.begin()?)
    }
}
