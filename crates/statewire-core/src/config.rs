#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! [`RuntimeConfig`] selects the policies the runtime applies where the
//! propagation model leaves a choice open:
//!
//! - [`OwnerRemovalPolicy`]: what removing an owner that is not recorded on a
//!   handle (or removing from a destroyed handle) does.
//! - [`ReadAttribution`]: which name a tracked read of an object field
//!   reports to read-tracking subscribers.
//!
//! Configuration can be built in code or read from `STATEWIRE_*` environment
//! variables:
//!
//! | Variable                       | Values                          |
//! |--------------------------------|---------------------------------|
//! | `STATEWIRE_OWNER_REMOVAL`      | `lenient` (default), `strict`   |
//! | `STATEWIRE_READ_ATTRIBUTION`   | `property` (default), `field`   |
//! | `STATEWIRE_WARN_UNKNOWN`       | flag, default on                |

/// Behavior of `remove_owner` for owners that are not recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnerRemovalPolicy {
    /// Removing an absent owner is a no-op that returns `false`.
    #[default]
    Lenient,
    /// Removing an absent owner is reported as an error.
    Strict,
}

impl OwnerRemovalPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lenient" => Some(Self::Lenient),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

/// Name reported to read-tracking subscribers for object field reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadAttribution {
    /// Report the info of the property holding the object.
    #[default]
    OwningProperty,
    /// Report the name of the field that was read.
    Field,
}

impl ReadAttribution {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "property" | "owning" | "owning-property" => Some(Self::OwningProperty),
            "field" => Some(Self::Field),
            _ => None,
        }
    }
}

/// Runtime-wide policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Policy for removing owners that are not recorded.
    pub owner_removal: OwnerRemovalPolicy,
    /// Name attribution for tracked object field reads.
    pub read_attribution: ReadAttribution,
    /// Log a warning when fan-out meets an id with no live subscriber.
    pub warn_on_unknown_subscriber: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            owner_removal: OwnerRemovalPolicy::Lenient,
            read_attribution: ReadAttribution::OwningProperty,
            warn_on_unknown_subscriber: true,
        }
    }
}

impl RuntimeConfig {
    /// Default policies with strict owner removal.
    #[must_use]
    pub fn strict() -> Self {
        Self::default().with_owner_removal(OwnerRemovalPolicy::Strict)
    }

    /// Set the owner removal policy.
    #[must_use]
    pub fn with_owner_removal(mut self, policy: OwnerRemovalPolicy) -> Self {
        self.owner_removal = policy;
        self
    }

    /// Set the read attribution for object field reads.
    #[must_use]
    pub fn with_read_attribution(mut self, attribution: ReadAttribution) -> Self {
        self.read_attribution = attribution;
        self
    }

    /// Enable or disable warnings for unknown subscriber ids.
    #[must_use]
    pub fn with_unknown_subscriber_warnings(mut self, enabled: bool) -> Self {
        self.warn_on_unknown_subscriber = enabled;
        self
    }

    /// Read configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Read configuration through a custom environment lookup.
    ///
    /// Unrecognized values leave the corresponding default in place.
    #[must_use]
    pub fn from_env_with<F>(get_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(policy) =
            get_env("STATEWIRE_OWNER_REMOVAL").and_then(|v| OwnerRemovalPolicy::parse(&v))
        {
            config.owner_removal = policy;
        }
        if let Some(attribution) =
            get_env("STATEWIRE_READ_ATTRIBUTION").and_then(|v| ReadAttribution::parse(&v))
        {
            config.read_attribution = attribution;
        }
        if let Some(value) = get_env("STATEWIRE_WARN_UNKNOWN") {
            config.warn_on_unknown_subscriber = env_flag(&value);
        }
        config
    }
}

#[inline]
fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
