use bk_core::{ConflictStatus, RepoSession};

pub fn branches(session: &RepoSession) -> anyhow::Result<()> {
    for name in session.branch_list() {
        let sha = session.branch_commit(&name).unwrap_or("-");
        println!("{sha}  {name}");
    }
    Ok(())
}

pub async fn sync(session: &mut RepoSession) -> anyhow::Result<()> {
    session.sync().await?;
    println!(
        "{} at {}",
        session.current_branch().unwrap_or("?"),
        session.current_branch_sha().unwrap_or("?")
    );
    Ok(())
}

pub async fn status(session: &mut RepoSession, path: Option<&str>) -> anyhow::Result<()> {
    let status = session.repo_status(path).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

pub async fn stale(session: &mut RepoSession, branch: &str) -> anyhow::Result<()> {
    println!("{}", session.is_branch_stale(branch).await?);
    Ok(())
}

pub async fn modified(session: &mut RepoSession, branch: &str) -> anyhow::Result<()> {
    println!("{}", session.is_branch_modified(branch).await?);
    Ok(())
}

pub async fn conflicted(session: &mut RepoSession, base: &str, branch: &str) -> anyhow::Result<()> {
    match session.check_branch_conflict(base, branch).await? {
        ConflictStatus::Clean => println!("clean"),
        ConflictStatus::Conflicted => println!("conflicted"),
        ConflictStatus::Error(reason) => println!("error: {reason}"),
    }
    Ok(())
}
