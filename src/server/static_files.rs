use std::path::{Component, Path, PathBuf};

/// Resolves `requested` inside `root`, refusing anything that would escape
/// it (parent components, absolute paths, symlinks pointing outside).
pub async fn resolve(root: &Path, requested: &str) -> Option<PathBuf> {
    let relative = Path::new(requested);
    if relative.as_os_str().is_empty()
        || !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
    {
        log::warn!("Rejected static path '{}'", requested);
        return None;
    }

    let root = tokio::fs::canonicalize(root).await.ok()?;
    let candidate = tokio::fs::canonicalize(root.join(relative)).await.ok()?;
    if !candidate.starts_with(&root) {
        log::warn!("Static path '{}' resolves outside the asset root", requested);
        return None;
    }

    let metadata = tokio::fs::metadata(&candidate).await.ok()?;
    metadata.is_file().then_some(candidate)
}
