//! Bucket classification and the versioned naming scheme.

/// Which caching strategy a bucket serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketClass {
  /// Precached critical assets for the installed version.
  Static,
  /// Assets and documents cached as they are fetched.
  Dynamic,
  /// API GET responses for offline fallback.
  Api,
}

impl BucketClass {
  pub const ALL: [BucketClass; 3] = [BucketClass::Static, BucketClass::Dynamic, BucketClass::Api];

  pub fn as_str(&self) -> &'static str {
    match self {
      BucketClass::Static => "static",
      BucketClass::Dynamic => "dynamic",
      BucketClass::Api => "api",
    }
  }
}

/// Bucket name for a classification at a version:
/// `{namespace}-{classification}-{version}`.
pub fn bucket_name(namespace: &str, class: BucketClass, version_tag: &str) -> String {
  format!("{}-{}-{}", namespace, class.as_str(), version_tag)
}

/// The three bucket names belonging to one version.
pub fn version_bucket_names(namespace: &str, version_tag: &str) -> Vec<String> {
  BucketClass::ALL
    .iter()
    .map(|class| bucket_name(namespace, *class, version_tag))
    .collect()
}
