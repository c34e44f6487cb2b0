//! Small helpers around the Kubernetes API shared by the controllers

use std::fmt::Debug;

use kube::api::{Api, Patch, PatchParams};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::FIELD_MANAGER;

/// Compute a deterministic hash of the input, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 so values persisted in annotations stay stable
/// across toolchain versions.
pub fn deterministic_hash(input: &[u8]) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input);
    // First 8 bytes (16 hex chars) keep annotation values compact
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Whether a kube error is a 404 from the API server
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// Whether a kube error is a 409 conflict from the API server
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

/// Server-side apply `object` as `name` through `api`, owning the fields
/// under the operator's field manager.
pub async fn server_side_apply<K>(api: &Api<K>, name: &str, object: &K) -> Result<K, kube::Error>
where
    K: kube::Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(object))
        .await
}

/// Merge-patch the status sub-resource of an object
pub async fn merge_patch_status<K>(
    api: &Api<K>,
    name: &str,
    patch: &serde_json::Value,
) -> Result<K, kube::Error>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug,
{
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
}
