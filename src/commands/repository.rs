use anyhow::{anyhow, bail, Context};
use eden_cli::{ConfigStore, EdenPaths, RepoKind};
use std::path::PathBuf;

pub(crate) fn cmd_repository(
    paths: &EdenPaths,
    name: Option<String>,
    path: Option<PathBuf>,
    with_buck: bool,
) -> anyhow::Result<()> {
    let store = ConfigStore::new(paths.clone());
    match (name, path) {
        (Some(name), Some(path)) => {
            let source = path
                .canonicalize()
                .with_context(|| format!("{} does not exist", path.display()))?;
            let kind = RepoKind::detect(&source).ok_or_else(|| {
                anyhow!("{} is not a mercurial or git repository", source.display())
            })?;
            store.add_repository(&name, kind, &source, with_buck)?;
        }
        (Some(name), None) => bail!("a source path is required to add repository {name}"),
        (None, _) => {
            for name in store.repository_names()? {
                println!("{name}");
            }
        }
    }
    Ok(())
}
