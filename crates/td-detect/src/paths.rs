//! Search path sources and resolution.
//!
//! Search paths come from four places: static configuration, environment
//! variables, the directory of an executable found on `PATH`, and (on
//! Windows) the registry. Each is turned into a list of absolute paths and
//! the union is resolved with [`resolve_all`]:
//!
//! - existing paths are replaced by their canonical realpath
//! - missing paths are kept as given, so a watch can still notice when they
//!   are created
//! - duplicates are dropped, keeping the first occurrence

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use td_core::{FxHashSet, NamespaceCache};
use tracing::{debug, trace};

use crate::error::DetectError;

/// Future returned by a dynamic search path source.
pub type PathsFuture = BoxFuture<'static, anyhow::Result<Vec<Utf8PathBuf>>>;

/// Looks up a process environment variable.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// One configured source of search paths.
#[derive(Clone)]
pub enum SearchPath {
    /// A fixed path.
    Static(Utf8PathBuf),
    /// A function producing any number of paths.
    Dynamic(Arc<dyn Fn() -> PathsFuture + Send + Sync>),
}

impl SearchPath {
    /// Wraps an async function that produces paths.
    ///
    /// # Examples
    ///
    /// ```
    /// use camino::Utf8PathBuf;
    /// use td_detect::SearchPath;
    ///
    /// let home_sdks = SearchPath::dynamic(|| async {
    ///     Ok(vec![Utf8PathBuf::from("/home/dev/sdks")])
    /// });
    /// # let _ = home_sdks;
    /// ```
    pub fn dynamic<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<Utf8PathBuf>>> + Send + 'static,
    {
        Self::Dynamic(Arc::new(move || f().boxed()))
    }

    /// Produces the paths this source stands for.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::InvalidOption`] for an empty static path or a
    /// failing dynamic source.
    pub async fn expand(&self) -> Result<Vec<Utf8PathBuf>, DetectError> {
        let paths = match self {
            Self::Static(path) => vec![path.clone()],
            Self::Dynamic(f) => f()
                .await
                .map_err(|err| DetectError::invalid_option("paths", format!("{err:#}")))?,
        };
        if paths.iter().any(|path| path.as_str().is_empty()) {
            return Err(DetectError::invalid_option(
                "paths",
                "search paths must be non-empty strings",
            ));
        }
        Ok(paths)
    }
}

impl fmt::Debug for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(path) => f.debug_tuple("Static").field(path).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<Utf8PathBuf> for SearchPath {
    fn from(path: Utf8PathBuf) -> Self {
        Self::Static(path)
    }
}

impl From<&Utf8Path> for SearchPath {
    fn from(path: &Utf8Path) -> Self {
        Self::Static(path.to_owned())
    }
}

impl From<&str> for SearchPath {
    fn from(path: &str) -> Self {
        Self::Static(Utf8PathBuf::from(path))
    }
}

/// Expands every source in order.
///
/// # Errors
///
/// Fails on the first source that fails to expand.
pub async fn expand_all(sources: &[SearchPath]) -> Result<Vec<Utf8PathBuf>, DetectError> {
    let mut paths = Vec::new();
    for source in sources {
        paths.extend(source.expand().await?);
    }
    Ok(paths)
}

/// Resolves `path` to its canonical realpath, or to its absolute form when
/// it does not exist.
pub async fn resolve_dir(path: &Utf8Path) -> Utf8PathBuf {
    let absolute = std::path::absolute(path)
        .ok()
        .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
        .unwrap_or_else(|| path.to_owned());

    match tokio::fs::canonicalize(&absolute).await {
        Ok(real) => match Utf8PathBuf::from_path_buf(real) {
            Ok(real) => real,
            Err(real) => {
                debug!(path = %real.display(), "Realpath is not UTF-8, keeping original");
                absolute
            }
        },
        Err(err) => {
            trace!(path = %absolute, error = %err, "Path does not resolve, keeping original");
            absolute
        }
    }
}

/// Resolves and dedupes `paths`, preserving first-seen order.
pub async fn resolve_all<I>(paths: I) -> Vec<Utf8PathBuf>
where
    I: IntoIterator<Item = Utf8PathBuf>,
{
    let mut seen = FxHashSet::default();
    let mut resolved = Vec::new();
    for path in paths {
        let real = resolve_dir(&path).await;
        if seen.insert(real.clone()) {
            resolved.push(real);
        }
    }
    resolved
}

/// Paths derived from environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvPaths {
    /// First entry of the first variable that is set.
    pub default_path: Option<Utf8PathBuf>,
    /// Every entry of every variable that is set, in order.
    pub paths: Vec<Utf8PathBuf>,
}

/// Reads `vars` through `lookup`, splitting each value on the platform path
/// list separator.
pub fn env_paths(
    vars: &[String],
    lookup: &(dyn Fn(&str) -> Option<String> + Send + Sync),
) -> EnvPaths {
    let mut found = EnvPaths::default();
    for var in vars {
        let Some(value) = lookup(var).filter(|v| !v.is_empty()) else {
            continue;
        };
        for entry in std::env::split_paths(&value) {
            let Ok(entry) = Utf8PathBuf::from_path_buf(entry) else {
                continue;
            };
            if entry.as_str().is_empty() {
                continue;
            }
            if found.default_path.is_none() {
                found.default_path = Some(entry.clone());
            }
            found.paths.push(entry);
        }
    }
    found
}

/// Returns the canonical directory holding `exe` on the `PATH` seen through
/// `lookup`, memoized per executable name.
pub async fn exe_dir(
    exe: &str,
    lookup: &EnvLookup,
    cache: &NamespaceCache<Option<Utf8PathBuf>>,
) -> Option<Utf8PathBuf> {
    cache
        .get_or_init(exe, || {
            let exe = exe.to_owned();
            let search = lookup("PATH");
            async move {
                tokio::task::spawn_blocking(move || locate(&exe, search))
                    .await
                    .ok()
                    .flatten()
            }
        })
        .await
}

fn locate(exe: &str, search: Option<String>) -> Option<Utf8PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let found = match which::which_in(exe, search, cwd) {
        Ok(found) => found,
        Err(err) => {
            debug!(exe, error = %err, "Executable not found on PATH");
            return None;
        }
    };
    let real = std::fs::canonicalize(&found).unwrap_or(found);
    let dir = Utf8PathBuf::from_path_buf(real.parent()?.to_path_buf()).ok()?;
    debug!(exe, dir = %dir, "Located executable");
    Some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_resolve_existing_dir_to_realpath() {
        let (_guard, dir) = temp_dir();
        let expected =
            Utf8PathBuf::from_path_buf(dir.as_std_path().canonicalize().unwrap()).unwrap();
        assert_eq!(resolve_dir(&dir).await, expected);
    }

    #[tokio::test]
    async fn test_resolve_missing_keeps_original() {
        let (_guard, dir) = temp_dir();
        let missing = dir.join("does").join("not").join("exist");
        assert_eq!(resolve_dir(&missing).await, missing);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_all_dedupes_symlinks() {
        let (_guard, dir) = temp_dir();
        let real = dir.join("real");
        std::fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, dir.join("link")).unwrap();

        let resolved = resolve_all(vec![dir.join("link"), real.clone(), dir.join("missing")]).await;
        assert_eq!(resolved.len(), 2);
        assert!(resolved[0].ends_with("real"));
        assert_eq!(resolved[1], dir.join("missing"));
    }

    #[test]
    fn test_env_paths_default_is_first_set_var() {
        let sep = if cfg!(windows) { ";" } else { ":" };
        let lookup = move |name: &str| match name {
            "SDK_HOME" => Some(format!("/opt/a{sep}/opt/b")),
            "SDK_ROOT" => Some("/opt/c".to_owned()),
            "EMPTY" => Some(String::new()),
            _ => None,
        };
        let vars = ["UNSET", "EMPTY", "SDK_HOME", "SDK_ROOT"].map(str::to_owned);

        let found = env_paths(&vars, &lookup);
        assert_eq!(found.default_path, Some(Utf8PathBuf::from("/opt/a")));
        assert_eq!(
            found.paths,
            ["/opt/a", "/opt/b", "/opt/c"].map(Utf8PathBuf::from).to_vec()
        );
    }

    #[tokio::test]
    async fn test_static_and_dynamic_expand() {
        let sources = vec![
            SearchPath::from("/opt/a"),
            SearchPath::dynamic(|| async {
                Ok(vec![Utf8PathBuf::from("/opt/b"), Utf8PathBuf::from("/opt/c")])
            }),
        ];
        let paths = expand_all(&sources).await.unwrap();
        assert_eq!(paths, ["/opt/a", "/opt/b", "/opt/c"].map(Utf8PathBuf::from).to_vec());
    }

    #[tokio::test]
    async fn test_empty_static_path_rejected() {
        let err = SearchPath::from("").expand().await.unwrap_err();
        assert!(matches!(err, DetectError::InvalidOption { .. }));

        let failing = SearchPath::dynamic(|| async { Err(anyhow::anyhow!("no sdk root")) });
        let err = failing.expand().await.unwrap_err();
        assert!(err.to_string().contains("no sdk root"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exe_dir_found_and_memoized() {
        use std::os::unix::fs::PermissionsExt;

        let (_guard, dir) = temp_dir();
        let bin = dir.join("bin");
        std::fs::create_dir(&bin).unwrap();
        let tool = bin.join("fake-tool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let search = bin.to_string();
        let lookup: EnvLookup = Arc::new(move |name| (name == "PATH").then(|| search.clone()));
        let cache = NamespaceCache::new();

        let expected =
            Utf8PathBuf::from_path_buf(bin.as_std_path().canonicalize().unwrap()).unwrap();
        assert_eq!(exe_dir("fake-tool", &lookup, &cache).await, Some(expected.clone()));

        std::fs::remove_file(&tool).unwrap();
        assert_eq!(exe_dir("fake-tool", &lookup, &cache).await, Some(expected));
        assert_eq!(exe_dir("missing-tool", &lookup, &cache).await, None);
    }
}
