use tracing::{debug, info};

use super::store::ObjectStore;
use crate::core::BackoffPolicy;
use crate::data::ObjectRef;
use crate::error::{Error, Result};

/// List the objects under `prefix`, retrying transient failures.
///
/// The result is sorted by name and free of duplicates, so archive order does
/// not depend on how the store pages its listing.
pub async fn list_sources<S: ObjectStore + ?Sized>(
    store: &S,
    container: &str,
    prefix: &str,
    policy: &BackoffPolicy,
) -> Result<Vec<ObjectRef>> {
    let mut objects = policy
        .attempt("list sources", |attempt| {
            debug!(container, prefix, attempt, "listing source objects");
            store.list(container, prefix)
        })
        .await
        .map_err(|source| Error::List {
            container: container.to_string(),
            prefix: prefix.to_string(),
            source,
        })?;

    objects.sort();
    objects.dedup();
    info!(container, prefix, count = objects.len(), "listed source objects");
    Ok(objects)
}
