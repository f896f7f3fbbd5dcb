use super::mount_manager;
use eden_cli::client_dir::RevisionId;
use eden_cli::EdenPaths;
use std::path::Path;

pub(crate) async fn cmd_clone(
    paths: &EdenPaths,
    repo: &str,
    path: &Path,
    snapshot: Option<&str>,
) -> anyhow::Result<()> {
    let snapshot = snapshot.map(str::parse::<RevisionId>).transpose()?;
    let mount = mount_manager(paths)
        .clone(repo, path, snapshot.as_ref())
        .await?;
    println!("Cloned {repo} at {}", mount.display());
    Ok(())
}

pub(crate) async fn cmd_mount(paths: &EdenPaths, path: &Path) -> anyhow::Result<()> {
    mount_manager(paths).mount(path).await?;
    Ok(())
}

pub(crate) async fn cmd_unmount(paths: &EdenPaths, path: &Path, forget: bool) -> anyhow::Result<()> {
    mount_manager(paths).unmount(path, forget).await?;
    Ok(())
}

pub(crate) fn cmd_list(paths: &EdenPaths) -> anyhow::Result<()> {
    for mount in mount_manager(paths).list()? {
        println!("{}", mount.display());
    }
    Ok(())
}

pub(crate) fn cmd_info(paths: &EdenPaths, path: Option<&Path>) -> anyhow::Result<()> {
    let manager = mount_manager(paths);
    let json = match path {
        Some(path) => serde_json::to_string_pretty(&manager.client_info(path)?)?,
        None => serde_json::to_string_pretty(&manager.all_client_info()?)?,
    };
    println!("{json}");
    Ok(())
}

pub(crate) async fn cmd_checkout(paths: &EdenPaths, path: &Path, revision: &str) -> anyhow::Result<()> {
    let revision: RevisionId = revision.parse()?;
    mount_manager(paths).checkout(path, &revision).await?;
    Ok(())
}
