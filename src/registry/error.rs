use thiserror::Error;

use crate::provider::{Provider, ProviderError};

#[derive(Error, Debug)]
pub enum RegistryError {
    /// A provider listing failed; the whole cycle was skipped.
    #[error("listing {provider} instances failed, skipping cycle: {source}")]
    FleetList {
        provider: Provider,
        #[source]
        source: ProviderError,
    },
}
