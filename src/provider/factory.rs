use std::sync::Arc;

use crate::config::{CloudProviderType, Config, ConfigError, FleetCatalog};
use crate::constants::LOCAL_ZONE;

use super::ProviderAdapter;
use super::azure::AzureProvider;
use super::gce::GceProvider;
use super::local::LocalProvider;
use super::types::Provider;

/// Builds one adapter per configured provider.
///
/// The local provider is seeded with every catalog entry, powered off.
pub fn build_providers(
    config: &Config,
    catalog: &FleetCatalog,
) -> Result<Vec<Arc<dyn ProviderAdapter>>, ConfigError> {
    let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::with_capacity(config.providers.len());

    for kind in &config.providers {
        let adapter: Arc<dyn ProviderAdapter> = match kind {
            CloudProviderType::Gcp => Arc::new(GceProvider::new(config.gce_config()?)),
            CloudProviderType::Azure => Arc::new(AzureProvider::new(config.azure_config()?)),
            CloudProviderType::Local => {
                let local = LocalProvider::new(Provider::Google);
                for entry in catalog.entries() {
                    local.insert_instance(
                        &entry.id,
                        LOCAL_ZONE,
                        Provider::Google.stopped_status(),
                    );
                }
                Arc::new(local)
            }
        };
        adapters.push(adapter);
    }

    Ok(adapters)
}
