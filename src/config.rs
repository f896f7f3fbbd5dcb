//! Layered INI configuration: every fragment in `<etc>/config.d` (sorted by
//! name) followed by the user's `~/.edenrc`, merged section by section.

use crate::error::{EdenError, IoContext, Result};
use crate::ini::{IniDocument, Section};
use crate::locked_file::LockedFile;
use crate::paths::EdenPaths;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, trace, warn};

const REPOSITORY_PREFIX: &str = "repository ";
const BINDMOUNTS_PREFIX: &str = "bindmounts ";
const BUCK_OUT: &str = "buck-out";

/// Expands substitution tokens in config values.
pub trait Interpolator: Send + Sync {
    fn interpolate(&self, value: &str) -> String;
}

/// Replaces `${NAME}` for a fixed table of variables; anything else is left as written.
#[derive(Debug, Clone, Default)]
pub struct VariableInterpolator {
    vars: BTreeMap<String, String>,
}

impl VariableInterpolator {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// `${HOME}` and `${USER}` from the configuration root.
    pub fn for_paths(paths: &EdenPaths) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert(
            "HOME".to_string(),
            paths.home_dir().to_string_lossy().into_owned(),
        );
        if let Some(user) = paths.user() {
            vars.insert("USER".to_string(), user.to_string());
        }
        Self { vars }
    }
}

impl Interpolator for VariableInterpolator {
    fn interpolate(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.vars.get(name) {
                        Some(replacement) => out.push_str(replacement),
                        None => out.push_str(&rest[start..start + 2 + end + 1]),
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    Hg,
    Git,
}

impl RepoKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hg => "hg",
            Self::Git => "git",
        }
    }

    /// Guess the kind from the metadata directory at the root of `source`.
    pub fn detect(source: &Path) -> Option<Self> {
        if source.join(".hg").is_dir() {
            Some(Self::Hg)
        } else if source.join(".git").is_dir() {
            Some(Self::Git)
        } else {
            None
        }
    }
}

impl fmt::Display for RepoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoKind {
    type Err = EdenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hg" => Ok(Self::Hg),
            "git" => Ok(Self::Git),
            other => Err(EdenError::Usage(format!(
                "unsupported repository type \"{other}\" (expected \"hg\" or \"git\")"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryDefinition {
    pub name: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: RepoKind,
    /// Private storage sub-path -> path relative to the mount
    pub bind_mounts: BTreeMap<String, String>,
}

pub struct ConfigStore {
    paths: EdenPaths,
    interpolator: Box<dyn Interpolator>,
}

impl ConfigStore {
    pub fn new(paths: EdenPaths) -> Self {
        let interpolator = Box::new(VariableInterpolator::for_paths(&paths));
        Self {
            paths,
            interpolator,
        }
    }

    pub fn with_interpolator(paths: EdenPaths, interpolator: Box<dyn Interpolator>) -> Self {
        Self {
            paths,
            interpolator,
        }
    }

    pub fn paths(&self) -> &EdenPaths {
        &self.paths
    }

    /// Sorted regular files in `config.d` followed by the user config.
    pub fn rc_files(&self) -> Result<Vec<PathBuf>> {
        let config_d = self.paths.config_d();
        let mut files = Vec::new();
        if config_d.is_dir() {
            for entry in fs::read_dir(&config_d)
                .io_context(|| format!("failed to list {}", config_d.display()))?
            {
                let entry =
                    entry.io_context(|| format!("failed to list {}", config_d.display()))?;
                let path = entry.path();
                if path.is_file() {
                    files.push(path);
                } else {
                    trace!(path = %path.display(), "Not a regular file, skipping");
                }
            }
            files.sort();
        }
        files.push(self.paths.user_config());
        Ok(files)
    }

    /// Parse and merge every source, then expand substitution tokens. A source
    /// that cannot be read is skipped; one that does not parse is an error.
    pub fn load(&self) -> Result<IniDocument> {
        let mut merged = IniDocument::default();
        for path in self.rc_files()? {
            match read_ini(&path) {
                Ok(Some(doc)) => merged.merge(doc),
                Ok(None) => trace!(path = %path.display(), "Config source missing, skipping"),
                Err(e) if e.kind() == crate::error::ErrorKind::Io => {
                    warn!("Skipping unreadable config source: {}", e)
                }
                Err(e) => return Err(e),
            }
        }
        merged.map_values(|v| self.interpolator.interpolate(v));
        Ok(merged)
    }

    pub fn repository_names(&self) -> Result<Vec<String>> {
        Ok(repository_names(&self.load()?))
    }

    /// Look up `section.key`; the section part may itself contain spaces.
    pub fn get_value(&self, key: &str) -> Result<String> {
        let (section, option) = key.split_once('.').ok_or_else(|| {
            EdenError::Usage(format!("config key \"{key}\" must have the form section.key"))
        })?;
        let config = self.load()?;
        let found = config.section(section).ok_or_else(|| {
            EdenError::NotFound(format!("No section: '{section}'"))
        })?;
        found.get(option).map(str::to_string).ok_or_else(|| {
            EdenError::NotFound(format!("No option '{option}' in section: '{section}'"))
        })
    }

    pub fn repository(&self, name: &str) -> Result<RepositoryDefinition> {
        let config = self.load()?;
        let repo = config
            .section(&format!("{REPOSITORY_PREFIX}{name}"))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| not_found_with_suggestions(name, &config))?;

        let kind = repo.get("type").ok_or_else(|| {
            EdenError::StateCorruption(format!("repository \"{name}\" missing key \"type\"."))
        })?;
        let path = repo.get("path").ok_or_else(|| {
            EdenError::StateCorruption(format!("repository \"{name}\" missing key \"path\"."))
        })?;
        let kind = kind.parse::<RepoKind>().map_err(|e| {
            EdenError::StateCorruption(format!("repository \"{name}\": {e}"))
        })?;

        Ok(RepositoryDefinition {
            name: name.to_string(),
            path: PathBuf::from(path),
            kind,
            bind_mounts: bind_mounts(&config, name),
        })
    }

    pub fn bind_mounts(&self, name: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.repository(name)?.bind_mounts)
    }

    /// Add a `[repository <name>]` section to the user config.
    pub fn add_repository(
        &self,
        name: &str,
        kind: RepoKind,
        source: &Path,
        with_buck: bool,
    ) -> Result<()> {
        self.mutate(|config| {
            if repository_names(config).iter().any(|n| n == name) {
                return Err(EdenError::Usage(format!(
                    "repository {name} already exists. You will need to edit the ~/.edenrc \
                     config file by hand to make changes to the repository or remove it."
                )));
            }

            let mut repo = Section::new(format!("{REPOSITORY_PREFIX}{name}"));
            repo.set("type", kind.as_str());
            repo.set("path", source.to_string_lossy());
            config.set_section(repo);

            if with_buck {
                let mut mounts = Section::new(format!("{BINDMOUNTS_PREFIX}{name}"));
                mounts.set(BUCK_OUT, BUCK_OUT);
                config.set_section(mounts);
            }
            Ok(())
        })?;
        debug!(name, kind = %kind, source = %source.display(), "Added repository");
        Ok(())
    }

    /// Read-modify-write the user config under its lock.
    pub fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut IniDocument) -> Result<()>,
    {
        update_ini(&self.paths.user_config(), f)
    }
}

/// Lock `path`, parse it, apply `f` and commit the result atomically.
pub fn update_ini<F>(path: &Path, f: F) -> Result<()>
where
    F: FnOnce(&mut IniDocument) -> Result<()>,
{
    let locked = LockedFile::acquire(path)?;
    let mut doc = parse_ini(path, &locked.read_to_string()?)?;
    f(&mut doc)?;
    locked.commit(doc.to_string().as_bytes())?;
    locked.release()
}

/// Parse an INI file, `None` when it does not exist.
pub fn read_ini(path: &Path) -> Result<Option<IniDocument>> {
    match fs::read_to_string(path) {
        Ok(text) => parse_ini(path, &text).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EdenError::io(format!("failed to read {}", path.display()), e)),
    }
}

fn parse_ini(path: &Path, text: &str) -> Result<IniDocument> {
    IniDocument::parse(text)
        .map_err(|e| EdenError::StateCorruption(format!("{}: {}", path.display(), e)))
}

fn repository_names(config: &IniDocument) -> Vec<String> {
    let mut names: Vec<String> = config
        .sections()
        .filter_map(|s| s.name().strip_prefix(REPOSITORY_PREFIX))
        .filter(|n| !n.is_empty() && !n.contains(' '))
        .map(str::to_string)
        .collect();
    names.sort();
    names
}

fn bind_mounts(config: &IniDocument, name: &str) -> BTreeMap<String, String> {
    config
        .section(&format!("{BINDMOUNTS_PREFIX}{name}"))
        .map(|s| {
            s.entries()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn not_found_with_suggestions(name: &str, config: &IniDocument) -> EdenError {
    let mut msg = format!("No repository configured named \"{name}\".");
    let others = repository_names(config);
    if !others.is_empty() {
        let quoted: Vec<String> = others.iter().map(|r| format!("\"{r}\"")).collect();
        msg.push_str(&format!(" Try one of: {}.", quoted.join(", ")));
    }
    EdenError::NotFound(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind as Kind;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ConfigStore {
        let root = dir.path();
        fs::create_dir_all(root.join("etc/config.d")).unwrap();
        fs::create_dir_all(root.join("home")).unwrap();
        ConfigStore::new(EdenPaths::new(
            root.join("state"),
            root.join("etc"),
            root.join("home"),
            Some("alice".to_string()),
        ))
    }

    fn write_user_config(dir: &TempDir, text: &str) {
        fs::create_dir_all(dir.path().join("home")).unwrap();
        fs::write(dir.path().join("home/.edenrc"), text).unwrap();
    }

    #[test]
    fn test_detect_repo_kind() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(RepoKind::detect(dir.path()), None);
        fs::create_dir(dir.path().join(".git")).unwrap();
        assert_eq!(RepoKind::detect(dir.path()), Some(RepoKind::Git));
        fs::create_dir(dir.path().join(".hg")).unwrap();
        assert_eq!(RepoKind::detect(dir.path()), Some(RepoKind::Hg));
    }

    #[test]
    fn test_fbsource_repository_definition() {
        let dir = tempfile::tempdir().unwrap();
        write_user_config(
            &dir,
            "[repository fbsource]\ntype = hg\npath = /data/fbsource\n\n[bindmounts fbsource]\nbuck-out = buck-out\n",
        );

        let repo = store(&dir).repository("fbsource").unwrap();
        assert_eq!(repo.kind, RepoKind::Hg);
        assert_eq!(repo.path, PathBuf::from("/data/fbsource"));
        assert_eq!(
            repo.bind_mounts,
            BTreeMap::from([("buck-out".to_string(), "buck-out".to_string())])
        );
    }

    #[test]
    fn test_unknown_repository_suggests_others() {
        let dir = tempfile::tempdir().unwrap();
        write_user_config(
            &dir,
            "[repository b]\ntype = git\npath = /b\n[repository a]\ntype = hg\npath = /a\n",
        );

        let err = store(&dir).repository("x").unwrap_err();
        assert_eq!(err.kind(), Kind::NotFound);
        assert_eq!(
            err.to_string(),
            "No repository configured named \"x\". Try one of: \"a\", \"b\"."
        );
    }

    #[test]
    fn test_missing_required_keys_are_distinct_errors() {
        let dir = tempfile::tempdir().unwrap();
        write_user_config(&dir, "[repository a]\npath = /a\n[repository b]\ntype = hg\n");
        let config = store(&dir);

        let err = config.repository("a").unwrap_err();
        assert_eq!(err.kind(), Kind::StateCorruption);
        assert!(err.to_string().contains("missing key \"type\""));

        let err = config.repository("b").unwrap_err();
        assert!(err.to_string().contains("missing key \"path\""));
    }

    #[test]
    fn test_fragments_merge_in_name_order_then_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = store(&dir);
        let config_d = dir.path().join("etc/config.d");
        fs::write(config_d.join("10-base"), "[repository r]\ntype = hg\npath = /one\n").unwrap();
        fs::write(config_d.join("20-site"), "[repository r]\npath = /two\n").unwrap();
        write_user_config(&dir, "[bindmounts r]\nout = out\n");

        let files = config.rc_files().unwrap();
        assert_eq!(files.len(), 3);
        assert!(files[0].ends_with("10-base"));
        assert!(files[2].ends_with(".edenrc"));

        let repo = config.repository("r").unwrap();
        assert_eq!(repo.path, PathBuf::from("/two"));
        assert_eq!(repo.bind_mounts.get("out").map(String::as_str), Some("out"));
    }

    #[test]
    fn test_directories_in_config_d_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let config = store(&dir);
        fs::create_dir(dir.path().join("etc/config.d/subdir")).unwrap();
        write_user_config(&dir, "[repository r]\ntype = git\npath = /r\n");

        let files = config.rc_files().unwrap();
        assert_eq!(files, vec![dir.path().join("home/.edenrc")]);
        assert_eq!(config.repository("r").unwrap().path, PathBuf::from("/r"));
    }

    #[test]
    fn test_unreadable_source_is_skipped_but_bad_syntax_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let config = store(&dir);
        let config_d = dir.path().join("etc/config.d");
        fs::write(config_d.join("10-base"), "[repository r]\ntype = hg\npath = /r\n").unwrap();
        // A directory where the user file should be cannot be read as text.
        fs::create_dir(dir.path().join("home/.edenrc")).unwrap();

        assert_eq!(config.repository_names().unwrap(), vec!["r"]);

        fs::write(config_d.join("20-broken"), "key without a section\n").unwrap();
        let err = config.load().unwrap_err();
        assert_eq!(err.kind(), Kind::StateCorruption);
    }

    #[test]
    fn test_values_are_interpolated() {
        let dir = tempfile::tempdir().unwrap();
        write_user_config(
            &dir,
            "[repository r]\ntype = git\npath = ${HOME}/src/${USER}/${UNKNOWN}\n",
        );
        let config = store(&dir);
        let home = dir.path().join("home");

        let repo = config.repository("r").unwrap();
        assert_eq!(
            repo.path,
            PathBuf::from(format!("{}/src/alice/${{UNKNOWN}}", home.display()))
        );
    }

    #[test]
    fn test_get_value() {
        let dir = tempfile::tempdir().unwrap();
        write_user_config(&dir, "[core]\nsystemIgnoreFile = /etc/ignore\n");
        let config = store(&dir);

        assert_eq!(config.get_value("core.systemignorefile").unwrap(), "/etc/ignore");
        assert_eq!(config.get_value("core.missing").unwrap_err().kind(), Kind::NotFound);
        assert_eq!(config.get_value("nosection.x").unwrap_err().kind(), Kind::NotFound);
        assert_eq!(config.get_value("nodot").unwrap_err().kind(), Kind::Usage);
    }

    #[test]
    fn test_add_repository_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let config = store(&dir);

        config
            .add_repository("fbsource", RepoKind::Hg, Path::new("/data/fbsource"), true)
            .unwrap();
        let before = fs::read_to_string(dir.path().join("home/.edenrc")).unwrap();
        assert_eq!(
            before,
            "[repository fbsource]\ntype = hg\npath = /data/fbsource\n\n[bindmounts fbsource]\nbuck-out = buck-out\n\n"
        );

        let err = config
            .add_repository("fbsource", RepoKind::Git, Path::new("/other"), false)
            .unwrap_err();
        assert_eq!(err.kind(), Kind::Usage);
        let after = fs::read_to_string(dir.path().join("home/.edenrc")).unwrap();
        assert_eq!(before, after);
        assert_eq!(config.repository_names().unwrap(), vec!["fbsource"]);
    }

    #[test]
    fn test_concurrent_mutations_apply_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(store(&dir));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let config = Arc::clone(&config);
                thread::spawn(move || {
                    config
                        .add_repository(
                            &format!("repo{i}"),
                            RepoKind::Git,
                            Path::new(&format!("/src/repo{i}")),
                            false,
                        )
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let names = config.repository_names().unwrap();
        assert_eq!(names.len(), 10);
        for i in 0..10 {
            let repo = config.repository(&format!("repo{i}")).unwrap();
            assert_eq!(repo.path, PathBuf::from(format!("/src/repo{i}")));
        }
    }

    #[test]
    fn test_interpolator_handles_unterminated_token() {
        let interp = VariableInterpolator::new(BTreeMap::from([(
            "HOME".to_string(),
            "/h".to_string(),
        )]));
        assert_eq!(interp.interpolate("${HOME}/x/${HOME"), "/h/x/${HOME");
    }
}
