use super::{Identity, ATTR_IS_ADMIN};
use std::fmt;

/// Literal the provider stores in the role flag for administrators.
const ADMIN_MARKER: &str = "true";

/// Access tier derived from identity attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Standard,
}

impl Role {
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => write!(f, "administrator"),
            Self::Standard => write!(f, "standard user"),
        }
    }
}

/// Derive the role of an identity. Total: no identity, no flag, or any value
/// other than the literal `"true"` is `Standard`.
#[must_use]
pub fn derive_role(identity: Option<&Identity>) -> Role {
    match identity.and_then(|identity| identity.attribute(ATTR_IS_ADMIN)) {
        Some(ADMIN_MARKER) => Role::Admin,
        _ => Role::Standard,
    }
}
