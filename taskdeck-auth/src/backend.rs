//! Backend selection from configuration

use crate::error::AuthResult;
use crate::memory::InMemoryIdentityService;
use crate::rest::{RestClientConfig, RestIdentityService};
use crate::service::IdentityService;
use std::sync::Arc;
use taskdeck_core::{BackendKind, TaskdeckConfig};
use tracing::info;

/// Build the identity service named by `config.backend.kind`
pub fn create_identity_service(config: &TaskdeckConfig) -> AuthResult<Arc<dyn IdentityService>> {
    let buffer = config.store.notification_buffer;

    match config.backend.kind {
        BackendKind::Memory => {
            let service = match &config.backend.seed_file {
                Some(path) => InMemoryIdentityService::from_seed_file(path, buffer)?,
                None => InMemoryIdentityService::with_capacity(buffer),
            };
            info!("Using in-memory identity service");
            Ok(Arc::new(service))
        }
        BackendKind::Rest => {
            let rest = RestClientConfig::from_backend(&config.backend, buffer)?;
            Ok(Arc::new(RestIdentityService::new(rest)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;

    #[test]
    fn test_memory_backend_by_default() {
        let service = create_identity_service(&TaskdeckConfig::default());
        assert!(service.is_ok());
    }

    #[test]
    fn test_rest_backend_needs_url() {
        let mut config = TaskdeckConfig::default();
        config.backend.kind = BackendKind::Rest;
        assert!(matches!(
            create_identity_service(&config),
            Err(AuthError::Config { .. })
        ));
    }

    #[test]
    fn test_missing_seed_file_is_config_error() {
        let mut config = TaskdeckConfig::default();
        config.backend.seed_file = Some("/definitely/not/here.toml".into());
        assert!(matches!(
            create_identity_service(&config),
            Err(AuthError::Config { .. })
        ));
    }
}
