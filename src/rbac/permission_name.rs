//! Permission name grammar.
//!
//! Names are lowercase dotted identifiers: `resource.action` or
//! `resource.action.scope`. Generating a name from its parts is idempotent.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static PERMISSION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9_]*\.[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)?$").unwrap(/* known good */)
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionNameError {
    #[error("'{0}' is not of the form resource.action[.scope]")]
    Malformed(String),
}

/// Qualifier distinguishing "records I own" from "any record".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionScope {
    Own,
    Any,
    /// No qualifier; the permission is stored with an empty scope.
    Unscoped,
}

impl PermissionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionScope::Own => "own",
            PermissionScope::Any => "any",
            PermissionScope::Unscoped => "",
        }
    }
}

impl FromStr for PermissionScope {
    type Err = PermissionNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "own" => Ok(PermissionScope::Own),
            "any" => Ok(PermissionScope::Any),
            "" => Ok(PermissionScope::Unscoped),
            other => Err(PermissionNameError::Malformed(other.to_string())),
        }
    }
}

/// Builds `"{resource}.{action}"`, adding `.{scope}` when the scope is non-empty.
pub fn generate_permission_name(resource: &str, action: &str, scope: &str) -> String {
    let resource = resource.trim().to_lowercase();
    let action = action.trim().to_lowercase();
    let scope = scope.trim().to_lowercase();
    if scope.is_empty() {
        format!("{resource}.{action}")
    } else {
        format!("{resource}.{action}.{scope}")
    }
}

pub fn validate_permission_name(name: &str) -> Result<(), PermissionNameError> {
    if PERMISSION_NAME.is_match(name) {
        Ok(())
    } else {
        Err(PermissionNameError::Malformed(name.to_string()))
    }
}

/// A parsed permission name, as accepted by
/// [`requires_permission`](super::requires_permission).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionName {
    pub resource: String,
    pub action: String,
    pub scope: PermissionScope,
}

impl PermissionName {
    /// Parses a dotted name. A third segment other than `own` or `any` is
    /// rejected.
    pub fn parse(name: &str) -> Result<Self, PermissionNameError> {
        validate_permission_name(name)?;
        let mut parts = name.split('.');
        let (Some(resource), Some(action)) = (parts.next(), parts.next()) else {
            return Err(PermissionNameError::Malformed(name.to_string()));
        };
        let scope = match parts.next() {
            Some(scope) => scope
                .parse()
                .map_err(|_| PermissionNameError::Malformed(name.to_string()))?,
            None => PermissionScope::Unscoped,
        };
        Ok(Self {
            resource: resource.to_string(),
            action: action.to_string(),
            scope,
        })
    }
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&generate_permission_name(
            &self.resource,
            &self.action,
            self.scope.as_str(),
        ))
    }
}
