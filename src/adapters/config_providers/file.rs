use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eyre::{Context, Result};
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::{
    config::{loader::load_config, models::GatewayConfig},
    ports::config_provider::{ConfigProvider, RouteConfig, RouteConfigSource},
};

/// Configuration provider backed by a local file, with a notify watcher on its
/// directory.
pub struct FileConfigProvider {
    path: PathBuf,
    // Kept alive for the lifetime of the provider
    _watcher: Option<notify::RecommendedWatcher>,
    update_tx: mpsc::Sender<()>,
    // Handed out once by `watch()`
    update_rx: std::sync::Mutex<Option<mpsc::Receiver<()>>>,
}

impl FileConfigProvider {
    /// Provider with a running file watcher.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let mut provider = Self::unwatched(path);
        provider.init_watcher()?;
        Ok(provider)
    }

    /// Provider that only loads; its watch channel never fires.
    pub fn unwatched(path: impl Into<PathBuf>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            path: path.into(),
            _watcher: None,
            update_tx: tx,
            update_rx: std::sync::Mutex::new(Some(rx)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_watcher(&mut self) -> Result<()> {
        let tx = self.update_tx.clone();
        let config_filename = self
            .path
            .file_name()
            .ok_or_else(|| eyre::eyre!("Invalid config path"))?
            .to_owned();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if (event.kind.is_modify()
                            || event.kind.is_create()
                            || event.kind.is_remove())
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(&config_filename))
                        {
                            tracing::debug!("Config file changed: {:?}", event.kind);
                            // A pending signal already covers this change
                            let _ = tx.try_send(());
                        }
                    }
                    Err(e) => tracing::error!("File watch error: {:?}", e),
                }
            })?;

        let watch_dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .wrap_err("Failed to watch config directory")?;

        self._watcher = Some(watcher);
        Ok(())
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn load_config(&self) -> Result<GatewayConfig> {
        let path_str = self
            .path
            .to_str()
            .ok_or_else(|| eyre::eyre!("Invalid path"))?;
        load_config(path_str).await
    }

    fn watch(&self) -> Option<mpsc::Receiver<()>> {
        match self.update_rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl RouteConfigSource for FileConfigProvider {
    async fn load_routes(&self) -> Result<RouteConfig> {
        let config = self.load_config().await?;
        Ok(RouteConfig::from(&config))
    }
}
