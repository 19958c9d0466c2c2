//! The directory predicate supplied by a detector.
//!
//! A predicate inspects one directory and returns a descriptive value when
//! the directory is an installation it recognizes. Anything that is not
//! [truthy](is_truthy) tells the engine to keep descending.

use std::future::Future;

use camino::{Utf8Path, Utf8PathBuf};
use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use serde_json::Value;

/// Classifies a directory as a match or not.
///
/// Implemented by [`SyncCheck`] and [`AsyncCheck`] for plain closures.
pub trait DirCheck: Send + Sync {
    /// Inspects `dir`.
    ///
    /// Returning an error aborts the scan that called it.
    fn check<'a>(&'a self, dir: &'a Utf8Path) -> BoxFuture<'a, anyhow::Result<Option<Value>>>;
}

/// Adapts a synchronous closure into a [`DirCheck`].
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use td_detect::SyncCheck;
///
/// let check = SyncCheck::new(|dir: &camino::Utf8Path| {
///     Ok(dir.join("bin/adb").exists().then(|| json!({ "id": dir.as_str() })))
/// });
/// # let _ = check;
/// ```
pub struct SyncCheck<F>(F);

impl<F> SyncCheck<F>
where
    F: Fn(&Utf8Path) -> anyhow::Result<Option<Value>> + Send + Sync,
{
    /// Wraps `f`.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> DirCheck for SyncCheck<F>
where
    F: Fn(&Utf8Path) -> anyhow::Result<Option<Value>> + Send + Sync,
{
    fn check<'a>(&'a self, dir: &'a Utf8Path) -> BoxFuture<'a, anyhow::Result<Option<Value>>> {
        future::ready((self.0)(dir)).boxed()
    }
}

/// Adapts an async closure into a [`DirCheck`].
pub struct AsyncCheck<F>(F);

impl<F, Fut> AsyncCheck<F>
where
    F: Fn(Utf8PathBuf) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
{
    /// Wraps `f`.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> DirCheck for AsyncCheck<F>
where
    F: Fn(Utf8PathBuf) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
{
    fn check<'a>(&'a self, dir: &'a Utf8Path) -> BoxFuture<'a, anyhow::Result<Option<Value>>> {
        (self.0)(dir.to_owned()).boxed()
    }
}

/// Returns `true` for a present value other than `null` or `false`.
#[must_use]
pub fn is_truthy(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null | Value::Bool(false)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&Value::Null)));
        assert!(!is_truthy(Some(&json!(false))));
        assert!(is_truthy(Some(&json!(true))));
        assert!(is_truthy(Some(&json!({ "id": "sdk" }))));
        assert!(is_truthy(Some(&json!([]))));
    }

    #[tokio::test]
    async fn test_sync_and_async_checks() {
        let sync = SyncCheck::new(|dir: &Utf8Path| Ok(Some(json!(dir.as_str()))));
        let value = sync.check(Utf8Path::new("/opt/sdk")).await.unwrap();
        assert_eq!(value, Some(json!("/opt/sdk")));

        let async_check = AsyncCheck::new(|dir: Utf8PathBuf| async move {
            Ok((dir.as_str() == "/opt/jdk").then(|| json!("jdk")))
        });
        assert_eq!(
            async_check.check(Utf8Path::new("/opt/jdk")).await.unwrap(),
            Some(json!("jdk"))
        );
        assert_eq!(async_check.check(Utf8Path::new("/opt/sdk")).await.unwrap(), None);
    }
}
