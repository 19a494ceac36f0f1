//! Subscription pattern matching
//!
//! Patterns come in three shapes:
//!
//! - `"*"` matches every device.
//! - A bare token matches when the device's search target or friendly name
//!   contains it (case-insensitive), or when it names the device's USN.
//! - `"Field;:;needle"` matches when the named field is non-empty and
//!   contains `needle` (case-insensitive). Unknown field names never match.

use super::record::{usn_group, DeviceRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between field name and needle in a field pattern
pub const FIELD_SEPARATOR: &str = ";:;";

/// Wildcard pattern
pub const ANY_DEVICE: &str = "*";

/// Device fields a field pattern may inspect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchField {
    VendorData,
    ModelName,
    /// The device's type / name attribute
    DeviceType,
    FriendlyName,
    Manufacturer,
}

impl MatchField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchField::VendorData => "VendorData",
            MatchField::ModelName => "ModelName",
            MatchField::DeviceType => "DeviceType",
            MatchField::FriendlyName => "FriendlyName",
            MatchField::Manufacturer => "Manufacturer",
        }
    }

    fn value<'a>(&self, record: &'a DeviceRecord) -> &'a str {
        match self {
            MatchField::VendorData => &record.vendor_data,
            MatchField::ModelName => &record.model_name,
            MatchField::DeviceType => &record.device_type,
            MatchField::FriendlyName => &record.friendly_name,
            MatchField::Manufacturer => &record.manufacturer,
        }
    }
}

impl FromStr for MatchField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vendordata" => Ok(MatchField::VendorData),
            "modelname" => Ok(MatchField::ModelName),
            "devicetype" => Ok(MatchField::DeviceType),
            "friendlyname" => Ok(MatchField::FriendlyName),
            "manufacturer" => Ok(MatchField::Manufacturer),
            other => Err(format!("unknown match field: {other}")),
        }
    }
}

/// Parsed subscription pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionPattern {
    /// `"*"`
    AnyDevice,
    /// Bare token matched against ST, friendly name and USN
    Token(String),
    /// `"Field;:;needle"` with a known field
    Field { field: MatchField, needle: String },
    /// Field pattern naming an unknown field, or an empty pattern
    Unsupported(String),
}

impl SubscriptionPattern {
    /// Parse a pattern string; never fails, unusable input becomes [`SubscriptionPattern::Unsupported`]
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return SubscriptionPattern::Unsupported(String::new());
        }
        if pattern == ANY_DEVICE {
            return SubscriptionPattern::AnyDevice;
        }

        match pattern.split_once(FIELD_SEPARATOR) {
            Some((field, needle)) => match field.parse::<MatchField>() {
                Ok(field) => SubscriptionPattern::Field {
                    field,
                    needle: needle.to_lowercase(),
                },
                Err(_) => SubscriptionPattern::Unsupported(pattern.to_string()),
            },
            None => SubscriptionPattern::Token(pattern.to_lowercase()),
        }
    }

    /// Whether `record` satisfies this pattern
    pub fn matches(&self, record: &DeviceRecord) -> bool {
        match self {
            SubscriptionPattern::AnyDevice => true,
            SubscriptionPattern::Token(token) => {
                contains_ci(&record.st, token)
                    || contains_ci(&record.friendly_name, token)
                    || record.usn.eq_ignore_ascii_case(token)
                    || record.identity_group() == usn_group(token)
            }
            SubscriptionPattern::Field { field, needle } => {
                let value = field.value(record);
                !value.is_empty() && contains_ci(value, needle)
            }
            SubscriptionPattern::Unsupported(_) => false,
        }
    }
}

impl fmt::Display for SubscriptionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionPattern::AnyDevice => f.write_str(ANY_DEVICE),
            SubscriptionPattern::Token(token) => f.write_str(token),
            SubscriptionPattern::Field { field, needle } => {
                write!(f, "{}{}{}", field.as_str(), FIELD_SEPARATOR, needle)
            }
            SubscriptionPattern::Unsupported(raw) => f.write_str(raw),
        }
    }
}

/// Whether `record` satisfies the pattern string `pattern`
pub fn matches(record: &DeviceRecord, pattern: &str) -> bool {
    SubscriptionPattern::parse(pattern).matches(record)
}

// `needle` is already lower-case
fn contains_ci(haystack: &str, needle: &str) -> bool {
    !haystack.is_empty() && haystack.to_lowercase().contains(needle)
}
