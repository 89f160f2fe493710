use std::sync::Arc;

use anyhow::Context;

use fiscalflow_infra::{ArtifactStore, FiscalConfig, FiscalToolkit, FsArtifactStore, Pipelines, ProcessToolkit};

/// Everything the handlers reach through `Extension<Arc<AppServices>>`.
#[derive(Clone)]
pub struct AppServices {
    pub pipelines: Pipelines,
}

impl AppServices {
    pub fn new(config: &FiscalConfig, toolkit: Arc<dyn FiscalToolkit>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            pipelines: Pipelines::new(config, toolkit, store),
        }
    }
}

/// Production wiring: subprocess toolkit + filesystem artifact store.
pub async fn build_services(config: &FiscalConfig) -> anyhow::Result<AppServices> {
    let store = FsArtifactStore::open(config.storage_root.clone())
        .with_context(|| format!("opening artifact store at {}", config.storage_root.display()))?;
    let toolkit = ProcessToolkit::connect(config.toolkit_program.clone(), config.toolkit_args.clone())
        .await
        .with_context(|| format!("starting toolkit {}", config.toolkit_program))?;
    tracing::info!(
        toolkit = %config.toolkit_program,
        capabilities = ?toolkit.capabilities(),
        storage_root = %store.root().display(),
        "services ready"
    );
    Ok(AppServices::new(config, Arc::new(toolkit), Arc::new(store)))
}
