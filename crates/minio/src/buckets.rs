//! Idempotent creation of the default buckets.

use std::str::FromStr;

use proven_minio_admin::{AdminClient, BucketPolicy};
use tracing::info;

use crate::error::{ConfigViolation, Result};

/// A bucket to create at setup time, with an optional anonymous access policy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BucketSpec {
    name: String,
    policy: Option<BucketPolicy>,
}

impl BucketSpec {
    /// Creates a new bucket declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, policy: Option<BucketPolicy>) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }

    /// Bucket name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Policy to apply after creation, if any.
    #[must_use]
    pub const fn policy(&self) -> Option<BucketPolicy> {
        self.policy
    }
}

impl FromStr for BucketSpec {
    type Err = ConfigViolation;

    fn from_str(entry: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigViolation::InvalidBucket {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };

        let (name, policy) = match entry.split_once(':') {
            Some((name, policy)) => (
                name,
                Some(
                    policy
                        .parse::<BucketPolicy>()
                        .map_err(|_| invalid("policy must be one of none, download, upload, public"))?,
                ),
            ),
            None => (entry, None),
        };

        if !(3..=63).contains(&name.len()) {
            return Err(invalid("name must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        {
            return Err(invalid(
                "name may only contain lowercase letters, digits, '-' and '.'",
            ));
        }

        if !name.starts_with(|c: char| c.is_ascii_alphanumeric())
            || !name.ends_with(|c: char| c.is_ascii_alphanumeric())
        {
            return Err(invalid("name must start and end with a letter or digit"));
        }

        Ok(Self::new(name, policy))
    }
}

/// Parses `name[:policy]` entries separated by `,` or `;`.
///
/// # Errors
///
/// Returns the first malformed entry.
pub fn parse_bucket_list(raw: &str) -> std::result::Result<Vec<BucketSpec>, ConfigViolation> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse::<BucketSpec>)
        .collect()
}

/// Creates declared buckets that do not exist yet.
pub struct BucketProvisioner<'a, A>
where
    A: AdminClient,
{
    admin: &'a A,
    region: Option<&'a str>,
}

impl<'a, A> BucketProvisioner<'a, A>
where
    A: AdminClient,
{
    /// Creates a provisioner that creates buckets in `region`, if given.
    #[must_use]
    pub const fn new(admin: &'a A, region: Option<&'a str>) -> Self {
        Self { admin, region }
    }

    /// Creates each missing bucket and applies its policy. Existing buckets are left
    /// untouched, policy included.
    ///
    /// # Errors
    ///
    /// Returns an error if any admin command fails.
    pub async fn provision(&self, buckets: &[BucketSpec]) -> Result<()> {
        for bucket in buckets {
            if self.admin.bucket_exists(bucket.name()).await? {
                info!("bucket {} already exists, skipping", bucket.name());
                continue;
            }

            info!("creating bucket {}", bucket.name());
            self.admin.make_bucket(bucket.name(), self.region).await?;

            if let Some(policy) = bucket.policy() {
                info!("setting {} policy on bucket {}", policy, bucket.name());
                self.admin
                    .set_anonymous_policy(bucket.name(), policy)
                    .await?;
            }
        }

        Ok(())
    }
}
