//! Identifier types for metered devices, providers and usage aggregates
//!
//! Every identifier is validated when it is constructed or deserialized, so
//! the rest of the system never handles an empty or malformed id. Device and
//! provider ids may not contain the `_` separator, which keeps the mapping
//! from an [`AggregationKey`] to its [`UsageId`] injective.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::IdError;

/// Separator between device and provider in a derived usage id.
pub const USAGE_ID_SEPARATOR: char = '_';

/// Characters that would break a usage id used as a URL path segment.
const RESERVED: &[char] = &['/', '?', '#', '%'];

fn validate(kind: &'static str, value: &str, extra: &[char]) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if let Some(found) = value
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || RESERVED.contains(c) || extra.contains(c))
    {
        return Err(IdError::ForbiddenChar {
            kind,
            value: value.to_string(),
            found,
        });
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal, $extra:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap an identifier.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                validate($kind, &value, $extra)?;
                Ok(Self(value))
            }

            /// Get the identifier string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = IdError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Logical device identifier (the SIM's IMSI in a cellular deployment)
    DeviceId,
    "device id",
    &[USAGE_ID_SEPARATOR]
);

string_id!(
    /// Provider credited with the usage
    ProviderId,
    "provider id",
    &[USAGE_ID_SEPARATOR]
);

string_id!(
    /// Unique identifier of a usage aggregate in the ledger
    UsageId,
    "usage id",
    &[]
);

string_id!(
    /// Network source address carried in field 0 of an inbound frame
    SourceAddress,
    "source address",
    &[]
);

/// Identity of one aggregate on the aggregation path: `(device, provider)`.
///
/// Used as the lookup key against the ledger and, through [`usage_id`],
/// as the lock identity of the read-merge-write cycle.
///
/// [`usage_id`]: AggregationKey::usage_id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationKey {
    pub device_id: DeviceId,
    pub provider_id: ProviderId,
}

impl AggregationKey {
    pub fn new(device_id: DeviceId, provider_id: ProviderId) -> Self {
        Self {
            device_id,
            provider_id,
        }
    }

    /// Ledger identifier of this key's aggregate: `<device>_<provider>`.
    pub fn usage_id(&self) -> UsageId {
        // Both halves are validated and free of the separator and reserved
        // characters, so the joined string is always a valid usage id.
        UsageId(format!(
            "{}{}{}",
            self.device_id, USAGE_ID_SEPARATOR, self.provider_id
        ))
    }
}

impl UsageId {
    /// The key this id would be derived from, if it has the
    /// `<device>_<provider>` shape.
    pub fn derived_key(&self) -> Option<AggregationKey> {
        let (device, provider) = self.0.split_once(USAGE_ID_SEPARATOR)?;
        let device_id = DeviceId::new(device).ok()?;
        let provider_id = ProviderId::new(provider).ok()?;
        Some(AggregationKey::new(device_id, provider_id))
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.device_id, self.provider_id)
    }
}
