use crate::errors::StoreError;
use serde::{Serialize, de::DeserializeOwned};
use std::path::Path;
use tokio::fs;
use tracing::error;

/// Reads a JSON file, falling back to an empty value when it is missing or unreadable.
pub async fn load_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(data) => data,
            Err(err) => {
                error!("failed to parse {}: {err}", path.display());
                T::default()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(err) => {
            error!("failed to read {}: {err}", path.display());
            T::default()
        }
    }
}

pub async fn persist_json<T: Serialize>(path: &Path, data: &T) -> Result<(), StoreError> {
    let payload = serde_json::to_vec_pretty(data)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, payload).await?;
    Ok(())
}
