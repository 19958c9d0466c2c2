//! Registry-derived search paths.
//!
//! Some tools record their install location in the Windows registry. The
//! engine reads it through a [`RegistryBackend`], which is a no-op off
//! Windows ([`NoRegistry`]) and shells out to `reg.exe` on Windows.
//!
//! Lookups are best effort: a key that cannot be read is treated as absent.
//! Only a failing [`RegistryKeys::Dynamic`] function is reported as an error.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use td_core::{Hive, RegistryKeySpec};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::DetectError;

/// Access to a hierarchical key/value store.
pub trait RegistryBackend: Send + Sync {
    /// Returns `true` if this backend can answer queries on this platform.
    fn is_supported(&self) -> bool;

    /// Reads value `name` under `hive\key`.
    fn query<'a>(
        &'a self,
        hive: Hive,
        key: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, DetectError>>;

    /// Lists the subkey names under `hive\key`.
    fn list_keys<'a>(
        &'a self,
        hive: Hive,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, DetectError>>;
}

/// A backend with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegistry;

impl RegistryBackend for NoRegistry {
    fn is_supported(&self) -> bool {
        false
    }

    fn query<'a>(
        &'a self,
        _hive: Hive,
        _key: &'a str,
        _name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, DetectError>> {
        futures_util::future::ready(Ok(None)).boxed()
    }

    fn list_keys<'a>(
        &'a self,
        _hive: Hive,
        _key: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, DetectError>> {
        futures_util::future::ready(Ok(Vec::new())).boxed()
    }
}

/// Returns the backend for the current platform.
#[must_use]
pub fn default_backend() -> Arc<dyn RegistryBackend> {
    #[cfg(windows)]
    {
        Arc::new(RegExeBackend)
    }
    #[cfg(not(windows))]
    {
        Arc::new(NoRegistry)
    }
}

/// Queries the registry by running `reg query`.
#[cfg(windows)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RegExeBackend;

#[cfg(windows)]
impl RegExeBackend {
    async fn run(args: &[&str]) -> Result<Option<String>, DetectError> {
        let output = tokio::process::Command::new("reg")
            .args(args)
            .output()
            .await
            .map_err(DetectError::registry)?;
        if !output.status.success() {
            // reg.exe exits non-zero for missing keys and values.
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }
}

#[cfg(windows)]
impl RegistryBackend for RegExeBackend {
    fn is_supported(&self) -> bool {
        true
    }

    fn query<'a>(
        &'a self,
        hive: Hive,
        key: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, DetectError>> {
        async move {
            let path = format!("{}\\{key}", hive.short_name());
            let stdout = Self::run(&["query", &path, "/v", name]).await?;
            Ok(stdout.and_then(|out| parse_value(&out, name)))
        }
        .boxed()
    }

    fn list_keys<'a>(
        &'a self,
        hive: Hive,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, DetectError>> {
        async move {
            let path = format!("{}\\{key}", hive.short_name());
            let stdout = Self::run(&["query", &path]).await?;
            Ok(stdout.map(|out| parse_subkeys(&out, key)).unwrap_or_default())
        }
        .boxed()
    }
}

/// Extracts the data of value `name` from `reg query /v` output, where each
/// value is printed as `<name>    <REG_TYPE>    <data>`.
#[cfg_attr(not(windows), allow(dead_code))]
fn parse_value(output: &str, name: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix(name)?;
        let rest = rest.trim_start();
        let (kind, data) = rest.split_once(char::is_whitespace)?;
        kind.starts_with("REG_").then(|| data.trim().to_owned())
    })
}

/// Extracts subkey names from `reg query` output, which lists each subkey
/// as a full path below the queried key.
#[cfg_attr(not(windows), allow(dead_code))]
fn parse_subkeys(output: &str, key: &str) -> Vec<String> {
    let suffix = format!("\\{}\\", key.trim_matches('\\')).to_ascii_lowercase();
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("HKEY_"))
        .filter_map(|line| {
            let lower = line.to_ascii_lowercase();
            let start = lower.find(&suffix)? + suffix.len();
            let name = &line[start..];
            (!name.is_empty() && !name.contains('\\')).then(|| name.to_owned())
        })
        .collect()
}

/// Paths found in the registry, plus an optional preferred default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryLookup {
    /// Preferred install location, taking precedence over environment and
    /// executable-derived defaults.
    pub default_path: Option<Utf8PathBuf>,
    /// Every path found.
    pub paths: Vec<Utf8PathBuf>,
}

/// Future returned by a dynamic registry function.
pub type RegistryFuture = BoxFuture<'static, anyhow::Result<RegistryLookup>>;

/// Which registry values hold search paths.
#[derive(Clone)]
pub enum RegistryKeys {
    /// Fixed values, each read as one path.
    Keys(Vec<RegistryKeySpec>),
    /// A function that explores the registry itself.
    Dynamic(Arc<dyn Fn(Arc<dyn RegistryBackend>) -> RegistryFuture + Send + Sync>),
}

impl RegistryKeys {
    /// Wraps an async function that explores the registry.
    pub fn dynamic<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<dyn RegistryBackend>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<RegistryLookup>> + Send + 'static,
    {
        Self::Dynamic(Arc::new(move |backend| f(backend).boxed()))
    }

    /// Returns `true` if there is nothing to query.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Keys(keys) if keys.is_empty())
    }
}

impl Default for RegistryKeys {
    fn default() -> Self {
        Self::Keys(Vec::new())
    }
}

impl fmt::Debug for RegistryKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keys(keys) => f.debug_tuple("Keys").field(keys).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<Vec<RegistryKeySpec>> for RegistryKeys {
    fn from(keys: Vec<RegistryKeySpec>) -> Self {
        Self::Keys(keys)
    }
}

/// Reads every configured value through `backend`.
///
/// # Errors
///
/// Returns [`DetectError::Registry`] only when a dynamic function fails;
/// unreadable fixed keys are skipped.
pub async fn query_keys(
    backend: &Arc<dyn RegistryBackend>,
    keys: &RegistryKeys,
) -> Result<RegistryLookup, DetectError> {
    if !backend.is_supported() {
        return Ok(RegistryLookup::default());
    }

    match keys {
        RegistryKeys::Keys(specs) => {
            let mut lookup = RegistryLookup::default();
            for spec in specs {
                match backend.query(spec.root, &spec.key, &spec.name).await {
                    Ok(Some(value)) if !value.trim().is_empty() => {
                        trace!(key = %spec.key, name = %spec.name, "Registry value found");
                        lookup.paths.push(Utf8PathBuf::from(value.trim()));
                    }
                    Ok(_) => trace!(key = %spec.key, name = %spec.name, "Registry value absent"),
                    Err(err) => {
                        debug!(
                            key = %spec.key,
                            name = %spec.name,
                            error = %err,
                            "Registry query failed"
                        );
                    }
                }
            }
            Ok(lookup)
        }
        RegistryKeys::Dynamic(f) => f(Arc::clone(backend)).await.map_err(DetectError::registry),
    }
}

/// Runs `tick` every `interval` until `token` is cancelled.
///
/// The next wait starts after `tick` completes, so slow checks never overlap.
pub(crate) fn spawn_poller<F, Fut>(
    interval: Duration,
    token: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(interval) => tick().await,
            }
        }
        trace!("Registry poller stopped");
    })
}
