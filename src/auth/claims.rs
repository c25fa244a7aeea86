//! Roles, claims and the session credential.
//!
//! Claims are issued by the backend and are authoritative there; the client
//! never assigns itself a role. Missing optional fields default to `None`,
//! missing `roles` defaults to the empty set (effective role `member`) and
//! unknown role names are ignored rather than failing the whole session.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::BTreeSet, fmt, str::FromStr};

use crate::validators::{mask_kennitala, normalize_kennitala, normalize_phone};

/// Ordered role hierarchy: `Member < Admin < Superuser`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
    Superuser,
}

impl Role {
    /// Ordinal rank used for "at least this privileged" checks.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Member => 0,
            Self::Admin => 1,
            Self::Superuser => 2,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
            Self::Superuser => "superuser",
        }
    }

    /// Roles array stored by the backend for a target role. Everyone keeps
    /// the `member` base role.
    #[must_use]
    pub fn grant_set(self) -> Vec<Role> {
        match self {
            Self::Member => vec![Self::Member],
            other => vec![Self::Member, other],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "member" => Ok(Self::Member),
            "admin" => Ok(Self::Admin),
            "superuser" => Ok(Self::Superuser),
            other => Err(format!(
                "unknown role '{other}', expected member, admin or superuser"
            )),
        }
    }
}

/// Attributes of the authenticated subject.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub subject_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_member: bool,
    #[serde(default, deserialize_with = "deserialize_roles")]
    pub roles: BTreeSet<Role>,
}

impl Claims {
    #[must_use]
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Storage form for the national id and phone number. Blank values become
    /// `None`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.national_id = self
            .national_id
            .as_deref()
            .map(normalize_kennitala)
            .filter(|kt| !kt.is_empty());
        self.phone = self.phone.as_deref().and_then(normalize_phone);
        self
    }

    /// National id in log-safe form.
    #[must_use]
    pub fn masked_national_id(&self) -> Option<String> {
        self.national_id.as_deref().map(mask_kennitala)
    }
}

fn deserialize_roles<'de, D>(deserializer: D) -> Result<BTreeSet<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<String>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .iter()
        .filter_map(|role| role.parse().ok())
        .collect())
}

/// Opaque bearer credential plus the claims it carries.
///
/// Only the session guard replaces it, and always as a whole value.
#[derive(Clone)]
pub struct SessionCredential {
    token: SecretString,
    claims: Claims,
    expires_at: DateTime<Utc>,
}

impl SessionCredential {
    #[must_use]
    pub fn new(token: SecretString, claims: Claims, expires_at: DateTime<Utc>) -> Self {
        Self {
            token,
            claims,
            expires_at,
        }
    }

    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    #[must_use]
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.claims.subject_id
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// New credential with the same bearer token and refreshed claims.
    #[must_use]
    pub fn with_claims(&self, claims: Claims) -> Self {
        Self {
            token: self.token.clone(),
            claims,
            expires_at: self.expires_at,
        }
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("token", &"[REDACTED]")
            .field("subject_id", &self.claims.subject_id)
            .field("roles", &self.claims.roles)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Session material returned by the backend after a code exchange or a
/// reactivation.
#[derive(Clone, Deserialize)]
pub struct SessionGrant {
    token: String,
    /// Lifetime in seconds.
    expires_in: i64,
    claims: Claims,
}

impl SessionGrant {
    #[must_use]
    pub fn new(token: impl Into<String>, expires_in: i64, claims: Claims) -> Self {
        Self {
            token: token.into(),
            expires_in,
            claims,
        }
    }

    #[must_use]
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    #[must_use]
    pub fn with_normalized_claims(mut self) -> Self {
        self.claims = self.claims.normalized();
        self
    }

    #[must_use]
    pub fn into_credential(self, now: DateTime<Utc>) -> SessionCredential {
        SessionCredential {
            token: SecretString::from(self.token),
            claims: self.claims,
            expires_at: now + Duration::seconds(self.expires_in.max(0)),
        }
    }
}

impl fmt::Debug for SessionGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGrant")
            .field("token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("subject_id", &self.claims.subject_id)
            .finish()
    }
}

/// Expose the bearer for transport layers only.
pub(crate) fn bearer(credential: &SessionCredential) -> &str {
    credential.token.expose_secret()
}
