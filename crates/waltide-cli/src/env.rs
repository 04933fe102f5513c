use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Name of the dotenv file for an optional environment.
fn dotenv_name(env: Option<&str>) -> String {
    match env {
        Some(name) => format!(".env.{}", name),
        None => ".env".to_string(),
    }
}

/// Find a file named `name` in `start` or any parent directory.
fn find_in_ancestors(start: &Path, name: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Load `.env` (or `.env.{ENV}`) from the current directory or any parent.
///
/// A missing default `.env` is not an error since settings can come from the
/// process environment. A missing `.env.{ENV}` that was asked for is.
pub fn load_dotenv(env: Option<&str>) -> Result<Option<PathBuf>> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let name = dotenv_name(env);

    let Some(path) = find_in_ancestors(&cwd, &name) else {
        if env.is_some() {
            anyhow::bail!(
                "No {} file found.\n\nSearched from {} to filesystem root.",
                name,
                cwd.display()
            );
        }
        return Ok(None);
    };

    dotenvy::from_path(&path)
        .with_context(|| format!("Failed to load {} from {}", name, path.display()))?;
    debug!(path = %path.display(), "Loaded environment file");
    Ok(Some(path))
}
