use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::info;

use crate::{config::ConnectionStrings, error::InstallError};

const CONNECTION_STRINGS_SECTION: &str = "ConnectionStrings";

/// Persists connection settings and signals when they have been reloaded.
#[async_trait]
pub trait ConfigManipulator: Send + Sync {
    async fn save_connection_string(
        &self,
        connection_string: &str,
        provider_name: &str,
    ) -> Result<(), InstallError>;

    /// A receiver notified every time the persisted connection strings are
    /// reloaded.
    fn subscribe(&self) -> watch::Receiver<ConnectionStrings>;
}

/// Stores connection strings in the `ConnectionStrings` section of a JSON
/// settings file, leaving every other section untouched.
#[derive(Debug)]
pub struct JsonConfigManipulator {
    path: PathBuf,
    sender: watch::Sender<ConnectionStrings>,
}

impl JsonConfigManipulator {
    /// Opens the settings file at `path`, it is created on first save.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, InstallError> {
        let path = path.into();
        let current = match read_settings(&path).await? {
            Some(Value::Object(settings)) => match settings.get(CONNECTION_STRINGS_SECTION) {
                Some(section) => serde_json::from_value(section.clone())?,
                None => ConnectionStrings::default(),
            },
            _ => ConnectionStrings::default(),
        };

        let (sender, _) = watch::channel(current);

        Ok(Self { path, sender })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> ConnectionStrings {
        self.sender.borrow().clone()
    }
}

#[async_trait]
impl ConfigManipulator for JsonConfigManipulator {
    async fn save_connection_string(
        &self,
        connection_string: &str,
        provider_name: &str,
    ) -> Result<(), InstallError> {
        let mut settings = match read_settings(&self.path).await? {
            Some(Value::Object(settings)) => settings,
            _ => Map::new(),
        };

        let connection_strings = ConnectionStrings::new(connection_string, provider_name);
        settings.insert(
            CONNECTION_STRINGS_SECTION.to_owned(),
            serde_json::to_value(&connection_strings)?,
        );

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_vec_pretty(&Value::Object(settings))?;
        tokio::fs::write(&self.path, content).await?;

        info!(path = %self.path.display(), provider_name, "connection string saved");

        self.sender.send_replace(connection_strings);

        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionStrings> {
        self.sender.subscribe()
    }
}

async fn read_settings(path: &Path) -> Result<Option<Value>, InstallError> {
    match tokio::fs::read(path).await {
        Ok(content) if content.is_empty() => Ok(None),
        Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
