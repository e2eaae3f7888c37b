//! Path filtering for watched directories
//!
//! A path passes when it survives every rule source:
//! 1. Built-in ignores (VCS metadata, caches, virtualenvs, editor temp files)
//! 2. The watched directory's `.gitignore` (optional, enabled by default)
//! 3. Extra patterns from configuration, in gitignore syntax
//! 4. The extension allow-list (empty list = any extension)

use crate::error::WatchError;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use respawn_core::WatchConfig;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Directory names that never contain watched sources
const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "__pycache__",
    ".venv",
    "venv",
    "node_modules",
    "target",
    ".idea",
    ".vscode",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".tox",
];

/// Filter deciding which paths under one watched directory count as changes
#[derive(Debug)]
pub struct WatchFilter {
    root: PathBuf,
    extensions: Vec<String>,
    gitignore: Option<Gitignore>,
    extra: Option<Gitignore>,
}

impl WatchFilter {
    /// Build the filter for `root`
    pub fn load(root: &Path, config: &WatchConfig) -> Result<Self, WatchError> {
        let ignore_err = |source| WatchError::Ignore {
            path: root.to_path_buf(),
            source,
        };

        let gitignore_path = root.join(".gitignore");
        let gitignore = if config.use_gitignore && gitignore_path.is_file() {
            let mut builder = GitignoreBuilder::new(root);
            if let Some(e) = builder.add(&gitignore_path) {
                return Err(ignore_err(e));
            }
            Some(builder.build().map_err(ignore_err)?)
        } else {
            None
        };

        let extra = if config.additional_patterns.is_empty() {
            None
        } else {
            let mut builder = GitignoreBuilder::new(root);
            for pattern in &config.additional_patterns {
                builder.add_line(None, pattern).map_err(ignore_err)?;
            }
            Some(builder.build().map_err(ignore_err)?)
        };

        let extensions = config
            .extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        Ok(Self {
            root: root.to_path_buf(),
            extensions,
            gitignore,
            extra,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `path` relative to the watched root, if it lies under it
    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        if path.is_absolute() {
            path.strip_prefix(&self.root).ok()
        } else {
            Some(path)
        }
    }

    /// Whether a change to the file at `path` should trigger a restart
    ///
    /// `path` may be absolute (under the root) or relative to it.
    pub fn matches(&self, path: &Path) -> bool {
        let Some(rel) = self.relative(path) else {
            return false;
        };
        if rel.as_os_str().is_empty() {
            return false;
        }

        if self.is_builtin_ignored(rel) {
            return false;
        }

        for rules in [&self.gitignore, &self.extra].into_iter().flatten() {
            if rules.matched_path_or_any_parents(rel, false).is_ignore() {
                return false;
            }
        }

        self.has_watched_extension(rel)
    }

    /// Whether a walk should descend into directory `path`
    pub fn enters_dir(&self, path: &Path) -> bool {
        let Some(rel) = self.relative(path) else {
            return false;
        };
        if rel.as_os_str().is_empty() {
            return true;
        }
        if rel.components().any(|c| is_ignored_dir(c.as_os_str())) {
            return false;
        }
        [&self.gitignore, &self.extra]
            .into_iter()
            .flatten()
            .all(|rules| !rules.matched(rel, true).is_ignore())
    }

    fn is_builtin_ignored(&self, rel: &Path) -> bool {
        let mut components = rel.components().peekable();
        while let Some(component) = components.next() {
            // Only directory components are checked against the dir list
            if components.peek().is_some() && is_ignored_dir(component.as_os_str()) {
                return true;
            }
        }

        rel.file_name()
            .and_then(OsStr::to_str)
            .map(is_editor_temp)
            .unwrap_or(true)
    }

    fn has_watched_extension(&self, rel: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        rel.extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

fn is_ignored_dir(name: &OsStr) -> bool {
    name.to_str().is_some_and(|name| IGNORED_DIRS.contains(&name))
}

/// Editor swap/backup files, OS droppings and bytecode
fn is_editor_temp(filename: &str) -> bool {
    // Vim swap files
    if [".swp", ".swo", ".swn", ".swx"].iter().any(|s| filename.ends_with(s)) {
        return true;
    }

    // Backups and Emacs autosave/lock files
    if filename.ends_with('~')
        || (filename.starts_with('#') && filename.ends_with('#'))
        || filename.starts_with(".#")
    {
        return true;
    }

    if filename == ".DS_Store" || filename.starts_with("._") || filename == "Thumbs.db" {
        return true;
    }

    // JetBrains safe-write temporaries
    if filename.ends_with("___jb_tmp___") || filename.ends_with("___jb_old___") {
        return true;
    }

    filename.ends_with(".pyc") || filename.ends_with(".pyo")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config(extensions: &[&str]) -> WatchConfig {
        WatchConfig {
            dirs: vec![],
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            use_gitignore: true,
            additional_patterns: vec![],
        }
    }

    #[test]
    fn test_extension_allow_list() {
        let dir = TempDir::new().unwrap();
        let filter = WatchFilter::load(dir.path(), &config(&["py", ".PYI"])).unwrap();

        assert!(filter.matches(Path::new("main.py")));
        assert!(filter.matches(Path::new("routes/users.py")));
        assert!(filter.matches(Path::new("stubs/types.pyi")));
        assert!(!filter.matches(Path::new("README.md")));
        assert!(!filter.matches(Path::new("Makefile")));
    }

    #[test]
    fn test_empty_extension_list_accepts_any() {
        let dir = TempDir::new().unwrap();
        let filter = WatchFilter::load(dir.path(), &config(&[])).unwrap();

        assert!(filter.matches(Path::new("README.md")));
        assert!(filter.matches(Path::new("Makefile")));
    }

    #[test]
    fn test_builtin_ignores() {
        let dir = TempDir::new().unwrap();
        let filter = WatchFilter::load(dir.path(), &config(&["py"])).unwrap();

        assert!(!filter.matches(Path::new(".git/hooks/pre-commit.py")));
        assert!(!filter.matches(Path::new("__pycache__/main.py")));
        assert!(!filter.matches(Path::new("app/.venv/lib/site.py")));
        assert!(!filter.matches(Path::new("venv/bin/activate.py")));
        assert!(!filter.matches(Path::new(".main.py.swp")));
        assert!(!filter.matches(Path::new("main.py~")));
        assert!(!filter.matches(Path::new(".#main.py")));
        assert!(!filter.matches(Path::new("main.cpython-311.pyc")));

        // A file merely named like an ignored dir is fine
        let any = WatchFilter::load(dir.path(), &config(&[])).unwrap();
        assert!(any.matches(Path::new("target")));
    }

    #[test]
    fn test_absolute_paths_outside_root_rejected() {
        let dir = TempDir::new().unwrap();
        let filter = WatchFilter::load(dir.path(), &config(&["py"])).unwrap();

        assert!(filter.matches(&dir.path().join("main.py")));
        assert!(!filter.matches(Path::new("/somewhere/else/main.py")));
    }

    #[test]
    fn test_gitignore_respected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "generated/\nsettings_local.py\n").unwrap();

        let filter = WatchFilter::load(dir.path(), &config(&["py"])).unwrap();
        assert!(!filter.matches(Path::new("generated/schema.py")));
        assert!(!filter.matches(Path::new("settings_local.py")));
        assert!(filter.matches(Path::new("settings.py")));
        assert!(!filter.enters_dir(&dir.path().join("generated")));

        let mut no_git = config(&["py"]);
        no_git.use_gitignore = false;
        let filter = WatchFilter::load(dir.path(), &no_git).unwrap();
        assert!(filter.matches(Path::new("generated/schema.py")));
    }

    #[test]
    fn test_additional_patterns() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&["py"]);
        cfg.additional_patterns = vec!["migrations/".into(), "*_test.py".into()];

        let filter = WatchFilter::load(dir.path(), &cfg).unwrap();
        assert!(!filter.matches(Path::new("migrations/0001_initial.py")));
        assert!(!filter.matches(Path::new("api/users_test.py")));
        assert!(filter.matches(Path::new("api/users.py")));
    }
}
