use crate::config::ServerConfig;
use crate::subnet::TrustedSubnet;
use metron_storage::Storage;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    /// `None` disables caller address checks.
    pub trusted_subnet: Option<TrustedSubnet>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, config: ServerConfig) -> anyhow::Result<Self> {
        let trusted_subnet = config
            .trusted_subnet
            .as_deref()
            .map(str::parse::<TrustedSubnet>)
            .transpose()?;
        Ok(Self {
            storage,
            trusted_subnet,
            config: Arc::new(config),
        })
    }
}
