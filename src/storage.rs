use crate::errors::AppError;
use crate::models::ServiceData;
use std::path::Path;
use tokio::fs;
use tracing::{error, warn};

/// Loads the service state. A missing file starts empty; an unreadable one is logged and ignored.
pub async fn load_data(path: &Path) -> ServiceData {
    match fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(data) => data,
            Err(err) => {
                error!(path = %path.display(), "failed to parse data file: {err}");
                ServiceData::default()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "no data file yet, starting empty");
            ServiceData::default()
        }
        Err(err) => {
            error!(path = %path.display(), "failed to read data file: {err}");
            ServiceData::default()
        }
    }
}

pub async fn persist_data(path: &Path, data: &ServiceData) -> Result<(), AppError> {
    let payload = serde_json::to_vec_pretty(data).map_err(AppError::internal)?;
    fs::write(path, payload).await?;
    Ok(())
}
