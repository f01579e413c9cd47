use std::path::Path;

use anyhow::Context;
use bk_core::{CommitRequest, FileChange, RepoSession};

pub async fn commit(
    session: &mut RepoSession,
    branch: &str,
    message: &str,
    from: &Path,
    force: bool,
    files: &[String],
) -> anyhow::Result<()> {
    let changes = read_changes(from, files).await?;
    let mut request = CommitRequest::new(branch, changes, message);
    request.force = force;
    match session.commit_files(&request).await? {
        Some(sha) => println!("{sha}"),
        None => println!("nothing to commit"),
    }
    Ok(())
}

pub async fn delete(session: &mut RepoSession, branch: &str) -> anyhow::Result<()> {
    session.delete_branch(branch).await?;
    Ok(())
}

pub async fn merge(session: &mut RepoSession, branch: &str) -> anyhow::Result<()> {
    session.merge_branch(branch).await?;
    Ok(())
}

pub async fn clear_refs(session: &mut RepoSession) -> anyhow::Result<()> {
    session.clear_side_refs().await?;
    Ok(())
}

/// Existing files become additions, missing ones deletions.
pub async fn read_changes(from: &Path, files: &[String]) -> anyhow::Result<Vec<FileChange>> {
    let mut changes = Vec::with_capacity(files.len());
    for file in files {
        let path = from.join(file);
        let meta = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                changes.push(FileChange::deletion(file.as_str()));
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        let is_symlink = meta.file_type().is_symlink();
        let contents = if is_symlink {
            let target = tokio::fs::read_link(&path).await?;
            target.to_string_lossy().into_owned().into_bytes()
        } else {
            tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?
        };
        changes.push(FileChange::Addition {
            path: file.clone(),
            contents: Some(contents),
            is_executable: is_executable(&meta),
            is_symlink,
        });
    }
    Ok(changes)
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.is_file() && meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}
