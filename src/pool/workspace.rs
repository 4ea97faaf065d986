//! Bidirectional workspace linking between the root workspace and a task's
//! isolated worker/supervisor directory.

use std::path::Path;

const SKIP_ENTRIES: &[&str] = &[".github", ".data", ".tasks", "copilot-mcp-config.json"];

/// Hard-link (files) or symlink/junction (directories) every top-level entry
/// of `root` into `target`, skipping task-internal entries.
pub async fn link_root_into(root: &Path, target: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(target).await?;
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if SKIP_ENTRIES.contains(&name_str.as_ref()) {
            continue;
        }
        let dest = target.join(&name);
        if dest.exists() {
            continue;
        }
        link_entry(&entry.path(), &dest).await?;
    }
    Ok(())
}

async fn link_entry(src: &Path, dest: &Path) -> std::io::Result<()> {
    let metadata = tokio::fs::metadata(src).await?;
    if metadata.is_dir() {
        symlink_dir(src, dest)?;
    } else {
        match tokio::fs::hard_link(src, dest).await {
            Ok(()) => {}
            Err(_) => {
                tokio::fs::copy(src, dest).await?;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink_dir(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dest)
}

#[cfg(windows)]
fn symlink_dir(src: &Path, dest: &Path) -> std::io::Result<()> {
    // Directory junctions require no admin privilege on Windows, unlike
    // symlinks; junctions are the platform-appropriate choice here.
    std::os::windows::fs::symlink_dir(src, dest)
}

/// Reconcile a worker workspace against the root workspace: forward-link any
/// new root entries, and move newly created *real* (non-link) entries inside
/// the workspace back to the root, replacing them with a link.
pub async fn sync_workspace(root: &Path, workspace: &Path) -> std::io::Result<()> {
    link_root_into(root, workspace).await?;

    let mut entries = tokio::fs::read_dir(workspace).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if SKIP_ENTRIES.contains(&name_str.as_ref()) {
            continue;
        }
        let path = entry.path();
        let metadata = tokio::fs::symlink_metadata(&path).await?;
        if metadata.is_symlink() {
            continue;
        }
        let root_dest = root.join(&name);
        if root_dest.exists() {
            continue;
        }
        tokio::fs::rename(&path, &root_dest).await?;
        link_entry(&root_dest, &path).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_root_into_skips_task_internal_entries() {
        let root = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        tokio::fs::write(root.path().join("README.md"), "hi")
            .await
            .unwrap();
        tokio::fs::create_dir(root.path().join(".tasks"))
            .await
            .unwrap();

        link_root_into(root.path(), target.path()).await.unwrap();

        assert!(target.path().join("README.md").exists());
        assert!(!target.path().join(".tasks").exists());
    }
}
