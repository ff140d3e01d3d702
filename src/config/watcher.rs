//! Configuration hot-reload
//!
//! Watches the mounted config file and the controller's ConfigMap and pushes
//! every new, valid configuration into a channel. Each source remembers the
//! digest of the last document it offered, so a ConfigMap relist or a
//! spurious file event with unchanged content does not trigger a rebuild.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use notify::{Event, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::loader::read_config_from_str;
use super::types::Config;
use crate::error::{Error, Result};

/// Key holding the YAML document inside the ConfigMap
pub const CONFIG_MAP_KEY: &str = "config.yaml";

/// Quiet period after a file event before the file is read
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Hex SHA-256 of a configuration document
pub fn content_digest(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Remembers the digest of the last document handed to the controller
#[derive(Clone, Default)]
pub struct ChangeFilter {
    last: Arc<Mutex<Option<String>>>,
}

impl ChangeFilter {
    pub fn new(initial: Option<&str>) -> Self {
        Self {
            last: Arc::new(Mutex::new(initial.map(content_digest))),
        }
    }

    /// Independent filter starting from the same digest
    pub fn fork(&self) -> Self {
        Self {
            last: Arc::new(Mutex::new(self.current())),
        }
    }

    fn current(&self) -> Option<String> {
        match self.last.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Returns true if `data` differs from the last accepted document and records it
    pub fn accept(&self, data: &str) -> bool {
        let digest = content_digest(data);
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if last.as_deref() == Some(digest.as_str()) {
            return false;
        }
        *last = Some(digest);
        true
    }
}

/// Watches configuration sources and emits parsed configurations
pub struct ConfigWatcher {
    pub config_path: Option<PathBuf>,
    pub client: Option<Client>,
    pub namespace: String,
    pub config_map_name: String,
    /// Seeds the per-source filters, normally with the document loaded at startup
    pub filter: ChangeFilter,
}

impl ConfigWatcher {
    /// Run both watchers until the receiving side goes away
    pub async fn run(self, tx: mpsc::Sender<Config>) -> Result<()> {
        let file_task = {
            let tx = tx.clone();
            let filter = self.filter.fork();
            let path = self.config_path.clone();
            async move {
                match path {
                    Some(path) => watch_file(path, filter, tx).await,
                    None => Ok(()),
                }
            }
        };

        let config_map_task = {
            let filter = self.filter.fork();
            let client = self.client.clone();
            let namespace = self.namespace.clone();
            let name = self.config_map_name.clone();
            async move {
                if let Some(client) = client {
                    watch_config_map(client, &namespace, &name, filter, tx).await;
                }
            }
        };

        let (file_result, ()) = tokio::join!(file_task, config_map_task);
        file_result
    }
}

/// Parse a candidate document and forward it if it is new and valid
async fn offer(source: &str, data: &str, filter: &ChangeFilter, tx: &mpsc::Sender<Config>) -> bool {
    if !filter.accept(data) {
        debug!(source, "Configuration unchanged");
        return true;
    }
    match read_config_from_str(data) {
        Ok(cfg) => {
            info!(source, "Configuration changed, reloading");
            tx.send(cfg).await.is_ok()
        }
        Err(e) => {
            error!(source, error = %e, "Failed to parse updated configuration");
            true
        }
    }
}

/// Directory events that may change what `path` resolves to
fn is_content_change(event: &Event) -> bool {
    event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove()
}

/// Watch the file's directory rather than the file, so the symlink swap a
/// mounted ConfigMap performs on update is seen as well.
async fn watch_file(path: PathBuf, filter: ChangeFilter, tx: mpsc::Sender<Config>) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let mut fs_watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if event_tx.send(event).is_err() {
                debug!("File watch receiver closed");
            }
        }
        Err(e) => warn!(error = %e, "File watch error"),
    })
    .map_err(|e| Error::ConfigError(format!("failed to create file watcher: {e}")))?;

    fs_watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| Error::ConfigError(format!("failed to watch {}: {e}", dir.display())))?;
    info!("Watching {} for configuration changes", path.display());

    while let Some(event) = events.recv().await {
        if !is_content_change(&event) {
            continue;
        }

        // Collapse the burst of events a single write or swap produces
        tokio::time::sleep(DEBOUNCE).await;
        while events.try_recv().is_ok() {}

        match tokio::fs::read_to_string(&path).await {
            Ok(data) => {
                if !offer("file", &data, &filter, &tx).await {
                    return Ok(());
                }
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Config file not readable");
            }
        }
    }

    Ok(())
}

async fn watch_config_map(
    client: Client,
    namespace: &str,
    name: &str,
    filter: ChangeFilter,
    tx: mpsc::Sender<Config>,
) {
    let api: Api<ConfigMap> = Api::namespaced(client, namespace);
    let cfg = watcher::Config::default().fields(&format!("metadata.name={name}"));
    let mut stream = watcher(api, cfg).applied_objects().boxed();

    info!("Watching ConfigMap {}/{} for configuration changes", namespace, name);

    while let Some(event) = stream.next().await {
        match event {
            Ok(cm) => {
                let Some(data) = cm.data.as_ref().and_then(|d| d.get(CONFIG_MAP_KEY)) else {
                    warn!(
                        "ConfigMap {} has no {} key, ignoring",
                        cm.name_any(),
                        CONFIG_MAP_KEY
                    );
                    continue;
                };
                if !offer("configmap", data, &filter, &tx).await {
                    return;
                }
            }
            Err(e) => warn!(error = %e, "ConfigMap watch error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "nodeSpecs:\n  - nodePoolName: pool-a\n    cloudProvider: gke\n    offTimeCount: 1\n";

    #[test]
    fn test_change_filter_skips_identical_content() {
        let filter = ChangeFilter::new(Some(DOC));
        assert!(!filter.accept(DOC));

        let changed = DOC.replace("offTimeCount: 1", "offTimeCount: 2");
        assert!(filter.accept(&changed));
        assert!(!filter.accept(&changed));
        assert!(filter.accept(DOC));
    }

    #[test]
    fn test_sources_keep_their_own_digest() {
        let seed = ChangeFilter::new(Some(DOC));
        let file = seed.fork();
        let config_map = seed.fork();

        let from_config_map = DOC.replace("pool-a", "pool-b");
        assert!(config_map.accept(&from_config_map));
        // a relist of the same ConfigMap must not re-apply it
        assert!(!config_map.accept(&from_config_map));
        // the unchanged file is still at its startup content
        assert!(!file.accept(DOC));
    }

    #[tokio::test]
    async fn test_offer_drops_invalid_documents() {
        let (tx, mut rx) = mpsc::channel(4);
        let filter = ChangeFilter::new(None);

        assert!(offer("test", "schedule:\n  timeZone: Nowhere/Else\n", &filter, &tx).await);
        assert!(rx.try_recv().is_err());

        assert!(offer("test", DOC, &filter, &tx).await);
        let cfg = rx.try_recv().unwrap();
        assert_eq!(cfg.node_specs[0].node_pool_name, "pool-a");
    }

    fn file_watcher(path: PathBuf) -> ConfigWatcher {
        ConfigWatcher {
            config_path: Some(path),
            client: None,
            namespace: "default".to_string(),
            config_map_name: "unused".to_string(),
            filter: ChangeFilter::new(Some(DOC)),
        }
    }

    /// Wait for the next configuration, applying `change` until the watcher reacts
    async fn next_config(rx: &mut mpsc::Receiver<Config>, mut change: impl FnMut(usize)) -> Config {
        for attempt in 0..40 {
            change(attempt);
            if let Ok(Some(cfg)) = tokio::time::timeout(Duration::from_millis(250), rx.recv()).await {
                return cfg;
            }
        }
        panic!("no configuration update received");
    }

    #[tokio::test]
    async fn test_file_watcher_emits_new_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, DOC).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let handle = tokio::spawn(file_watcher(path.clone()).run(tx));

        let updated = DOC.replace("pool-a", "pool-b");
        let cfg = next_config(&mut rx, |_| std::fs::write(&path, &updated).unwrap()).await;
        assert_eq!(cfg.node_specs[0].node_pool_name, "pool-b");
        handle.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_watcher_follows_config_map_symlink_swap() {
        use std::os::unix::fs::symlink;

        // Layout of a ConfigMap volume: config.yaml -> ..data/config.yaml, ..data -> ..v0
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("..v0")).unwrap();
        std::fs::write(dir.path().join("..v0/config.yaml"), DOC).unwrap();
        symlink("..v0", dir.path().join("..data")).unwrap();
        symlink("..data/config.yaml", dir.path().join("config.yaml")).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let handle = tokio::spawn(file_watcher(dir.path().join("config.yaml")).run(tx));

        let updated = DOC.replace("offTimeCount: 1", "offTimeCount: 0");
        let root = dir.path().to_path_buf();
        let cfg = next_config(&mut rx, |attempt| {
            let version = format!("..v{}", attempt + 1);
            std::fs::create_dir(root.join(&version)).unwrap();
            std::fs::write(root.join(&version).join("config.yaml"), &updated).unwrap();
            symlink(&version, root.join("..data_tmp")).unwrap();
            std::fs::rename(root.join("..data_tmp"), root.join("..data")).unwrap();
        })
        .await;
        assert_eq!(cfg.node_specs[0].off_time_count, 0);
        handle.abort();
    }
}
