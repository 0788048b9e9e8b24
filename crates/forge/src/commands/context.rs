//! Manifest discovery and store-path resolution shared by every command.

use anyhow::{Context, Result};
use forge_core::config::{Manifest, ManifestLoader};
use std::path::PathBuf;

/// Loaded context every command operates against: the parsed manifest, the
/// workspace root (the process CWD — `spec.md` §4.4), and the absolute
/// artifact-store path.
pub struct Context {
    pub manifest: Manifest,
    pub root_dir: PathBuf,
    pub store_path: PathBuf,
}

/// Discover and load `forge.yaml` from the current directory. A missing
/// manifest is fatal for the CLI, unlike library callers which may want a
/// fallback (`spec.md` §4.3's `ManifestLocation` keeps that distinction).
pub fn load() -> Result<Context> {
    let root_dir = std::env::current_dir().context("failed to read current directory")?;
    let location = ManifestLoader::discover(&root_dir)?;
    if !location.exists() {
        anyhow::bail!("no forge.yaml found in {}", root_dir.display());
    }
    let manifest = ManifestLoader::load(location.path())?;
    let store_path = root_dir.join(&manifest.artifact_store_path);
    Ok(Context {
        manifest,
        root_dir,
        store_path,
    })
}
