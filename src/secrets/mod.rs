//! Secret resolution and drift detection
//!
//! Credential fields of a pipeline are either literals or references to a
//! key of a Kubernetes Secret. The resolver materializes them into concrete
//! strings and remembers a fingerprint of every referenced key. Secret watch
//! events feed [`SecretResolver::observe_secret`], so drift is detected by
//! comparing fingerprints instead of re-reading secrets on every reconcile.
//!
//! A watch mapper sees the last known state of a deleted secret, which looks
//! exactly like an update without changes. Every event for a referenced
//! secret therefore marks its dependents unconfirmed, and their next cached
//! resolution reads the secret again.

mod fields;
pub mod tls;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures::future::try_join_all;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::{Client, ResourceExt};
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

pub use fields::{credential_fields, ids, CredentialField};

use crate::crd::{SecretKeyRef, SignalSpec, SignalType};
use crate::kube_utils::deterministic_hash;
use crate::retry::{retry_transient, with_timeout, RetryConfig};
use crate::Error;

/// Resolved credentials are reused at most this long without a re-read, so a
/// missed watch event cannot pin a stale value forever.
pub const DEFAULT_MAX_CACHE_AGE: Duration = Duration::from_secs(300);

/// Raw secret data keyed by data key
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Trait abstracting secret reads
///
/// Allows tests to serve secrets from memory while production reads them
/// from the API server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Data of `namespace/name`, or `None` when the secret does not exist
    async fn read(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, Error>;
}

/// Real reader backed by the Kubernetes API
pub struct SecretReaderImpl {
    client: Client,
    timeout: Duration,
}

impl SecretReaderImpl {
    /// Create a reader bounding every call by `timeout`
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl SecretReader for SecretReaderImpl {
    async fn read(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = with_timeout(self.timeout, "get secret", async {
            api.get_opt(name).await.map_err(Error::from)
        })
        .await?;
        Ok(secret.map(|s| secret_data(&s)))
    }
}

fn secret_data(secret: &Secret) -> SecretData {
    let mut data: SecretData = secret
        .data
        .as_ref()
        .map(|d| d.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
        .unwrap_or_default();
    // stringData is only present on objects that were never round-tripped
    if let Some(string_data) = &secret.string_data {
        for (k, v) in string_data {
            data.entry(k.clone()).or_insert_with(|| v.as_bytes().to_vec());
        }
    }
    data
}

/// Stable fingerprint of a secret key's bytes
pub fn fingerprint(bytes: &[u8]) -> String {
    deterministic_hash(bytes)
}

/// Key identifying a pipeline across kinds, e.g. `logs/app-logs`
pub fn pipeline_key(signal: SignalType, name: &str) -> String {
    format!("{signal}/{name}")
}

/// A credential field materialized to a concrete value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedCredential {
    /// Field id, see [`ids`]
    pub field: String,
    /// Concrete value
    pub value: String,
    /// Source reference, `None` for literals
    pub source: Option<SecretKeyRef>,
    /// Fingerprint of the source key's bytes, `None` for literals
    pub fingerprint: Option<String>,
}

/// All resolved credentials of one pipeline
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedCredentials {
    entries: BTreeMap<String, ResolvedCredential>,
}

impl ResolvedCredentials {
    /// Credentials built from literal values only, for tests and fixtures
    pub fn from_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = values
            .into_iter()
            .map(|(k, v)| {
                let field = k.into();
                (
                    field.clone(),
                    ResolvedCredential {
                        field,
                        value: v.into(),
                        source: None,
                        fingerprint: None,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Add a secret-backed value, for tests and fixtures
    pub fn insert_secret(&mut self, field: impl Into<String>, value: impl Into<String>, source: SecretKeyRef) {
        let field = field.into();
        let value = value.into();
        let entry = ResolvedCredential {
            field: field.clone(),
            fingerprint: Some(fingerprint(value.as_bytes())),
            value,
            source: Some(source),
        };
        self.entries.insert(field, entry);
    }

    /// Resolved entry of a field
    pub fn get(&self, field: &str) -> Option<&ResolvedCredential> {
        self.entries.get(field)
    }

    /// Resolved value of a field
    pub fn value(&self, field: &str) -> Option<&str> {
        self.entries.get(field).map(|c| c.value.as_str())
    }

    /// Whether the field was read from a secret
    pub fn is_secret(&self, field: &str) -> bool {
        self.entries.get(field).is_some_and(|c| c.source.is_some())
    }

    /// All entries in field order
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedCredential> {
        self.entries.values()
    }

    /// Number of resolved fields
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was resolved
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug)]
struct AppliedFingerprint {
    reference: SecretKeyRef,
    fingerprint: String,
}

#[derive(Clone, Debug)]
struct CachedResolution {
    spec_hash: String,
    resolved_at: Instant,
    credentials: ResolvedCredentials,
}

/// Resolves credential fields and tracks secret drift.
///
/// All maps are concurrent so pipelines of different signal types can be
/// resolved in parallel.
pub struct SecretResolver {
    reader: Arc<dyn SecretReader>,
    retry: RetryConfig,
    max_cache_age: Duration,
    /// pipeline key -> fingerprints used for the last successful resolution
    applied: DashMap<String, Vec<AppliedFingerprint>>,
    /// `namespace/name` -> fingerprint per data key, from watch events
    observed: DashMap<String, BTreeMap<String, String>>,
    /// pipeline key -> last successful resolution
    cache: DashMap<String, CachedResolution>,
    /// pipeline keys whose secrets had watch events since their last read
    unconfirmed: DashSet<String>,
}

impl SecretResolver {
    /// Create a resolver reading through `reader`
    pub fn new(reader: Arc<dyn SecretReader>, retry: RetryConfig) -> Self {
        Self {
            reader,
            retry,
            max_cache_age: DEFAULT_MAX_CACHE_AGE,
            applied: DashMap::new(),
            observed: DashMap::new(),
            cache: DashMap::new(),
            unconfirmed: DashSet::new(),
        }
    }

    /// Override how long a resolution may be reused without a re-read
    pub fn with_max_cache_age(mut self, max_cache_age: Duration) -> Self {
        self.max_cache_age = max_cache_age;
        self
    }

    /// Resolve every credential field of a pipeline, reading each referenced
    /// secret once. Missing secrets or keys yield [`Error::SecretNotFound`].
    #[instrument(skip(self, spec), fields(pipeline = %pipeline))]
    pub async fn resolve(&self, pipeline: &str, spec: &SignalSpec) -> crate::Result<ResolvedCredentials> {
        // A failed resolution must not leave an older one to be reused
        self.cache.remove(pipeline);
        let fields = credential_fields(spec);

        let secret_ids: BTreeSet<(String, String)> = fields
            .iter()
            .filter_map(|f| f.value.secret_key_ref())
            .map(|r| (r.namespace.clone(), r.name.clone()))
            .collect();

        let reads = secret_ids.into_iter().map(|(namespace, name)| async move {
            let data = retry_transient(&self.retry, "read_secret", || {
                let (namespace, name) = (namespace.clone(), name.clone());
                async move { self.reader.read(&namespace, &name).await }
            })
            .await?;
            Ok::<_, Error>((format!("{namespace}/{name}"), data))
        });
        let secrets: BTreeMap<String, Option<SecretData>> =
            try_join_all(reads).await?.into_iter().collect();

        // A fresh read is at least as recent as any watch event seen so far
        for (secret_id, data) in &secrets {
            let keys = data.as_ref().map(fingerprints_of).unwrap_or_default();
            self.observed.insert(secret_id.clone(), keys);
        }

        let mut entries = BTreeMap::new();
        let mut applied = Vec::new();
        for field in fields {
            let resolved = match field.value.secret_key_ref() {
                None => ResolvedCredential {
                    field: field.id.clone(),
                    value: field.value.value.clone().unwrap_or_default(),
                    source: None,
                    fingerprint: None,
                },
                Some(reference) => {
                    let bytes = secrets
                        .get(&reference.secret_id())
                        .and_then(|data| data.as_ref())
                        .and_then(|data| data.get(&reference.key))
                        .ok_or_else(|| Error::secret_not_found(reference.to_string()))?;
                    let value = String::from_utf8(bytes.clone()).map_err(|_| {
                        Error::secret_resolution(format!("{reference} is not valid UTF-8"))
                    })?;
                    let fp = fingerprint(bytes);
                    applied.push(AppliedFingerprint {
                        reference: reference.clone(),
                        fingerprint: fp.clone(),
                    });
                    ResolvedCredential {
                        field: field.id.clone(),
                        value,
                        source: Some(reference.clone()),
                        fingerprint: Some(fp),
                    }
                }
            };
            entries.insert(field.id, resolved);
        }

        let credentials = ResolvedCredentials { entries };
        self.applied.insert(pipeline.to_string(), applied);
        self.unconfirmed.remove(pipeline);
        self.cache.insert(
            pipeline.to_string(),
            CachedResolution {
                spec_hash: spec_hash(spec),
                resolved_at: Instant::now(),
                credentials: credentials.clone(),
            },
        );
        debug!(fields = credentials.len(), "Resolved credentials");
        Ok(credentials)
    }

    /// Like [`resolve`](Self::resolve), but reuses the previous resolution
    /// when the credential fields are unchanged, no referenced secret drifted
    /// or had a watch event since, and the cached value is younger than the
    /// cache age.
    pub async fn resolve_cached(
        &self,
        pipeline: &str,
        spec: &SignalSpec,
    ) -> crate::Result<ResolvedCredentials> {
        let reusable = self.cache.get(pipeline).and_then(|cached| {
            (cached.spec_hash == spec_hash(spec)
                && cached.resolved_at.elapsed() < self.max_cache_age)
                .then(|| cached.credentials.clone())
        });
        match reusable {
            Some(credentials)
                if !self.has_drifted(pipeline) && !self.unconfirmed.contains(pipeline) =>
            {
                Ok(credentials)
            }
            _ => self.resolve(pipeline, spec).await,
        }
    }

    /// Whether any secret key used by the last resolution of `pipeline` has
    /// since been observed changed or gone.
    pub fn has_drifted(&self, pipeline: &str) -> bool {
        let Some(applied) = self.applied.get(pipeline) else {
            return false;
        };
        applied.iter().any(|a| match self.observed.get(&a.reference.secret_id()) {
            Some(keys) => keys.get(&a.reference.key) != Some(&a.fingerprint),
            None => false,
        })
    }

    /// Record the current content of a secret from a watch event and return
    /// the pipelines referencing it, which must re-read it before their
    /// cached credentials are used again.
    pub fn observe_secret(&self, secret: &Secret) -> Vec<String> {
        let secret_id = format!(
            "{}/{}",
            secret.namespace().unwrap_or_default(),
            secret.name_any()
        );
        let keys = if secret.metadata.deletion_timestamp.is_some() {
            BTreeMap::new()
        } else {
            fingerprints_of(&secret_data(secret))
        };
        self.observed.insert(secret_id.clone(), keys);

        let dependents = self.dependents(&secret_id);
        for pipeline in &dependents {
            self.unconfirmed.insert(pipeline.clone());
        }
        if !dependents.is_empty() {
            info!(secret = %secret_id, dependents = dependents.len(), "Referenced secret changed");
        }
        dependents
    }

    /// Pipelines whose last resolution used `namespace/name`
    pub fn dependents(&self, secret_id: &str) -> Vec<String> {
        let mut pipelines: Vec<String> = self
            .applied
            .iter()
            .filter(|entry| entry.value().iter().any(|a| a.reference.secret_id() == secret_id))
            .map(|entry| entry.key().clone())
            .collect();
        pipelines.sort();
        pipelines
    }

    /// Drop all state of a deleted pipeline
    pub fn forget(&self, pipeline: &str) {
        self.applied.remove(pipeline);
        self.cache.remove(pipeline);
        self.unconfirmed.remove(pipeline);
    }
}

fn fingerprints_of(data: &SecretData) -> BTreeMap<String, String> {
    data.iter()
        .map(|(k, v)| (k.clone(), fingerprint(v)))
        .collect()
}

/// Hash of the credential fields of a spec; changes whenever a reference or
/// literal changes.
fn spec_hash(spec: &SignalSpec) -> String {
    let rendered: Vec<String> = credential_fields(spec)
        .into_iter()
        .map(|f| match f.value.secret_key_ref() {
            Some(r) => format!("{}=ref:{r}", f.id),
            None => format!("{}=lit:{}", f.id, f.value.value.unwrap_or_default()),
        })
        .collect();
    deterministic_hash(rendered.join("\n").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{HttpOutput, LogPipelineOutput, LogPipelineSpec, ValueType};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use std::sync::atomic::{AtomicU32, Ordering};

    // =========================================================================
    // Test Fixtures
    // =========================================================================

    fn http_pipeline(password: ValueType) -> SignalSpec {
        SignalSpec::Logs(LogPipelineSpec {
            output: LogPipelineOutput {
                http: Some(HttpOutput {
                    host: ValueType::literal("logs.example.com"),
                    user: Some(ValueType::literal("shipper")),
                    password: Some(password),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn data(pairs: &[(&str, &str)]) -> SecretData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    fn secret(namespace: &str, name: &str, pairs: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    fn resolver_with(reader: MockSecretReader) -> SecretResolver {
        SecretResolver::new(Arc::new(reader), fast_retry())
    }

    // =========================================================================
    // Resolution Stories
    // =========================================================================

    /// Story: Literal and secret-backed fields resolve side by side
    #[tokio::test]
    async fn story_mixed_literal_and_secret_fields() {
        let mut reader = MockSecretReader::new();
        reader
            .expect_read()
            .withf(|ns, name| ns == "backend" && name == "creds")
            .times(1)
            .returning(|_, _| Ok(Some(data(&[("password", "s3cret")]))));

        let resolver = resolver_with(reader);
        let spec = http_pipeline(ValueType::from_secret("backend", "creds", "password"));
        let creds = resolver.resolve("logs/app", &spec).await.unwrap();

        assert_eq!(creds.value(ids::HTTP_HOST), Some("logs.example.com"));
        assert_eq!(creds.value(ids::HTTP_USER), Some("shipper"));
        assert_eq!(creds.value(ids::HTTP_PASSWORD), Some("s3cret"));
        assert!(creds.is_secret(ids::HTTP_PASSWORD));
        assert!(!creds.is_secret(ids::HTTP_HOST));
        assert_eq!(
            creds.get(ids::HTTP_PASSWORD).unwrap().fingerprint,
            Some(fingerprint(b"s3cret"))
        );
    }

    /// Story: The pipeline is created before its secret
    ///
    /// Resolution fails with a recoverable error and succeeds once the secret
    /// shows up, without any spec change.
    #[tokio::test]
    async fn story_secret_created_after_pipeline() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut reader = MockSecretReader::new();
        reader.expect_read().returning(move |_, _| {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(None)
            } else {
                Ok(Some(data(&[("password", "late")])))
            }
        });

        let resolver = resolver_with(reader);
        let spec = http_pipeline(ValueType::from_secret("backend", "creds", "password"));

        let err = resolver.resolve("logs/app", &spec).await.unwrap_err();
        assert!(matches!(err, Error::SecretNotFound(ref r) if r == "backend/creds#password"));
        assert!(err.is_retryable());

        let creds = resolver.resolve("logs/app", &spec).await.unwrap();
        assert_eq!(creds.value(ids::HTTP_PASSWORD), Some("late"));
    }

    #[tokio::test]
    async fn test_missing_key_is_secret_not_found() {
        let mut reader = MockSecretReader::new();
        reader
            .expect_read()
            .returning(|_, _| Ok(Some(data(&[("user", "x")]))));
        let resolver = resolver_with(reader);
        let spec = http_pipeline(ValueType::from_secret("backend", "creds", "password"));

        let err = resolver.resolve("logs/app", &spec).await.unwrap_err();
        assert!(matches!(err, Error::SecretNotFound(_)));
    }

    #[tokio::test]
    async fn test_transient_read_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut reader = MockSecretReader::new();
        reader.expect_read().returning(move |_, _| {
            if c.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::timeout("get secret"))
            } else {
                Ok(Some(data(&[("password", "ok")])))
            }
        });
        let resolver = resolver_with(reader);
        let spec = http_pipeline(ValueType::from_secret("backend", "creds", "password"));

        let creds = resolver.resolve("logs/app", &spec).await.unwrap();
        assert_eq!(creds.value(ids::HTTP_PASSWORD), Some("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    // =========================================================================
    // Drift Stories
    // =========================================================================

    /// Story: Rotating a password is noticed without a spec change
    ///
    /// The watch event changes the observed fingerprint, the pipeline is
    /// reported as a dependent, and the next cached resolution re-reads.
    #[tokio::test]
    async fn story_rotated_secret_is_detected_as_drift() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut reader = MockSecretReader::new();
        reader.expect_read().returning(move |_, _| {
            let value = if c.fetch_add(1, Ordering::SeqCst) == 0 {
                "v1"
            } else {
                "v2"
            };
            Ok(Some(data(&[("password", value)])))
        });

        let resolver = resolver_with(reader);
        let spec = http_pipeline(ValueType::from_secret("backend", "creds", "password"));

        resolver.resolve_cached("logs/app", &spec).await.unwrap();
        assert!(!resolver.has_drifted("logs/app"));

        // Cached: no second read
        resolver.resolve_cached("logs/app", &spec).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let dependents = resolver.observe_secret(&secret("backend", "creds", &[("password", "v2")]));
        assert_eq!(dependents, vec!["logs/app".to_string()]);
        assert!(resolver.has_drifted("logs/app"));

        let creds = resolver.resolve_cached("logs/app", &spec).await.unwrap();
        assert_eq!(creds.value(ids::HTTP_PASSWORD), Some("v2"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!resolver.has_drifted("logs/app"));
    }

    #[tokio::test]
    async fn test_unrelated_secret_changes_are_ignored() {
        let mut reader = MockSecretReader::new();
        reader
            .expect_read()
            .returning(|_, _| Ok(Some(data(&[("password", "v1"), ("other", "a")]))));
        let resolver = resolver_with(reader);
        let spec = http_pipeline(ValueType::from_secret("backend", "creds", "password"));
        resolver.resolve("logs/app", &spec).await.unwrap();

        // Another key of the same secret changes
        resolver.observe_secret(&secret("backend", "creds", &[("password", "v1"), ("other", "b")]));
        assert!(!resolver.has_drifted("logs/app"));

        // A different secret changes
        let dependents = resolver.observe_secret(&secret("backend", "unrelated", &[("x", "y")]));
        assert!(dependents.is_empty());
        assert!(!resolver.has_drifted("logs/app"));
    }

    /// Story: Deleting a referenced secret is noticed without a spec change
    ///
    /// The delete event carries the secret's last content, so the fingerprint
    /// looks unchanged. The event still forces a re-read, and the cached
    /// credential is never served again.
    #[tokio::test]
    async fn story_deleted_secret_is_not_served_from_cache() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut reader = MockSecretReader::new();
        reader.expect_read().returning(move |_, _| {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Some(data(&[("password", "s3cret")])))
            } else {
                Ok(None)
            }
        });

        let resolver = resolver_with(reader);
        let spec = http_pipeline(ValueType::from_secret("backend", "creds", "password"));
        let creds = resolver.resolve_cached("logs/app", &spec).await.unwrap();
        assert_eq!(creds.value(ids::HTTP_PASSWORD), Some("s3cret"));

        let dependents =
            resolver.observe_secret(&secret("backend", "creds", &[("password", "s3cret")]));
        assert_eq!(dependents, vec!["logs/app".to_string()]);

        let err = resolver.resolve_cached("logs/app", &spec).await.unwrap_err();
        assert!(matches!(err, Error::SecretNotFound(ref r) if r == "backend/creds#password"));
        assert!(resolver.has_drifted("logs/app"));

        // Still missing on the next round, not the old value
        let err = resolver.resolve_cached("logs/app", &spec).await.unwrap_err();
        assert!(matches!(err, Error::SecretNotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // The pipeline stays a dependent so re-creating the secret wakes it
        assert_eq!(resolver.dependents("backend/creds"), vec!["logs/app".to_string()]);
    }

    #[tokio::test]
    async fn test_secret_being_deleted_counts_as_drift() {
        let mut reader = MockSecretReader::new();
        reader
            .expect_read()
            .returning(|_, _| Ok(Some(data(&[("password", "v1")]))));
        let resolver = resolver_with(reader);
        let spec = http_pipeline(ValueType::from_secret("backend", "creds", "password"));
        resolver.resolve("logs/app", &spec).await.unwrap();

        let mut deleting = secret("backend", "creds", &[("password", "v1")]);
        deleting.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        resolver.observe_secret(&deleting);
        assert!(resolver.has_drifted("logs/app"));
    }

    #[tokio::test]
    async fn test_removed_key_counts_as_drift() {
        let mut reader = MockSecretReader::new();
        reader
            .expect_read()
            .returning(|_, _| Ok(Some(data(&[("password", "v1"), ("other", "a")]))));
        let resolver = resolver_with(reader);
        let spec = http_pipeline(ValueType::from_secret("backend", "creds", "password"));
        resolver.resolve("logs/app", &spec).await.unwrap();

        resolver.observe_secret(&secret("backend", "creds", &[("other", "a")]));
        assert!(resolver.has_drifted("logs/app"));
    }

    #[tokio::test]
    async fn test_spec_change_bypasses_cache_and_forget_clears_state() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut reader = MockSecretReader::new();
        reader.expect_read().returning(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(Some(data(&[("password", "v1"), ("token", "t")])))
        });
        let resolver = resolver_with(reader);

        let first = http_pipeline(ValueType::from_secret("backend", "creds", "password"));
        resolver.resolve_cached("logs/app", &first).await.unwrap();
        let second = http_pipeline(ValueType::from_secret("backend", "creds", "token"));
        let creds = resolver.resolve_cached("logs/app", &second).await.unwrap();
        assert_eq!(creds.value(ids::HTTP_PASSWORD), Some("t"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        resolver.forget("logs/app");
        assert!(resolver.dependents("backend/creds").is_empty());
        assert!(!resolver.has_drifted("logs/app"));
    }

    #[tokio::test]
    async fn test_pipeline_without_secrets_never_reads() {
        let reader = MockSecretReader::new();
        let resolver = resolver_with(reader);
        let spec = http_pipeline(ValueType::literal("inline"));
        let creds = resolver.resolve("logs/app", &spec).await.unwrap();
        assert_eq!(creds.value(ids::HTTP_PASSWORD), Some("inline"));
        assert!(resolver.dependents("backend/creds").is_empty());
    }

    #[test]
    fn test_pipeline_key_includes_signal() {
        assert_eq!(pipeline_key(SignalType::Traces, "jaeger"), "traces/jaeger");
    }
}
