//! Opener records: who last started or extended an instance.
//!
//! Stored under `opener:<id>` as `email:name`, expiring with the instance's online window.

use std::fmt;

use crate::constants::OPENER_KEY_PREFIX;

/// User recorded as having opened an instance's current online window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opener {
    pub email: String,
    pub name: String,
}

impl Opener {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }

    /// Serialized store value (`email:name`).
    pub fn to_record(&self) -> String {
        format!("{}:{}", self.email, self.name)
    }

    /// Parses a store value. The name may itself contain `:`; the email may not.
    pub fn parse(record: &str) -> Option<Self> {
        let (email, name) = record.split_once(':')?;
        if email.is_empty() {
            return None;
        }
        Some(Self::new(email, name))
    }
}

impl fmt::Display for Opener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Store key of the opener record for `instance_id`.
pub fn opener_key(instance_id: &str) -> String {
    format!("{OPENER_KEY_PREFIX}{instance_id}")
}
