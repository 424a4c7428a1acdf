use std::fmt;

use tracing::{debug, info};

use super::store::ObjectStore;
use crate::core::{BackoffPolicy, Transient};
use crate::error::{Error, Result, StoreError};

enum Check {
    /// Not visible yet; stores with eventual consistency may need a moment.
    Missing,
    Store(StoreError),
}

impl Transient for Check {
    fn is_transient(&self) -> bool {
        match self {
            Check::Missing => true,
            Check::Store(err) => err.is_transient(),
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::Missing => write!(f, "object not visible yet"),
            Check::Store(err) => err.fmt(f),
        }
    }
}

/// Confirm the uploaded archive is visible at `container/path`.
pub async fn verify_destination<S: ObjectStore + ?Sized>(
    store: &S,
    container: &str,
    path: &str,
    policy: &BackoffPolicy,
) -> Result<()> {
    let mut attempts = 0;
    let checked = policy
        .attempt("verify destination", |attempt| {
            attempts = attempt + 1;
            debug!(container, path, attempt, "checking uploaded archive");
            async move {
                match store.exists(container, path).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(Check::Missing),
                    Err(err) => Err(Check::Store(err)),
                }
            }
        })
        .await;

    match checked {
        Ok(()) => {
            info!(container, path, "destination verified");
            Ok(())
        }
        Err(Check::Missing) => Err(Error::NotFoundAfterUpload {
            container: container.to_string(),
            path: path.to_string(),
            attempts,
        }),
        Err(Check::Store(source)) => Err(Error::Verify {
            container: container.to_string(),
            path: path.to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::MemoryStore;
    use std::time::Duration;

    fn quick(attempts: u32) -> BackoffPolicy {
        BackoffPolicy::default()
            .max_attempts(attempts)
            .base(Duration::ZERO)
            .jitter(false)
    }

    #[tokio::test]
    async fn test_present_object() {
        let store = MemoryStore::new();
        store.insert("b", "out.zip", "zip");
        verify_destination(&store, "b", "out.zip", &quick(3)).await.unwrap();
        assert_eq!(store.exists_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_object_exhausts_budget() {
        let store = MemoryStore::new();
        let err = verify_destination(&store, "b", "out.zip", &quick(4)).await.unwrap_err();
        match err {
            Error::NotFoundAfterUpload { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.exists_calls(), 4);
    }

    #[tokio::test]
    async fn test_invalid_name_fails_fast() {
        let store = crate::effects::DirStore::new(std::env::temp_dir());
        let err = verify_destination(&store, "b", "../x", &quick(4)).await.unwrap_err();
        assert!(matches!(err, Error::Verify { .. }));
    }
}
