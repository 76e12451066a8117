//! User, role and capability models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::error::{ShopError, ShopResult};

/// Shop account
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub password_hash: String,
    pub balance: Decimal,
    pub role: Role,
    /// Chat account currently bound to this user, at most one
    pub external_account_id: Option<i64>,
    pub phone: Option<String>,
    pub last_known_location: Option<Location>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: u64, username: String, password_hash: String, role: Role) -> Self {
        Self {
            id,
            username,
            password_hash,
            balance: Decimal::ZERO,
            role,
            external_account_id: None,
            phone: None,
            last_known_location: None,
            created_at: Utc::now(),
        }
    }

    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.id,
            role: self.role,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Location {
    pub ip: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Account role
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
    Reseller,
    Support,
    User,
}

/// Operation-level permission
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Purchase,
    SubmitTopup,
    ReviewTopups,
    ManageStock,
    ManagePromos,
    ManageUsers,
    AdjustBalance,
    ViewReports,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Reseller => "reseller",
            Role::Support => "support",
            Role::User => "user",
        }
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        use Capability::*;
        match self {
            Role::Admin => &[
                Purchase,
                SubmitTopup,
                ReviewTopups,
                ManageStock,
                ManagePromos,
                ManageUsers,
                AdjustBalance,
                ViewReports,
            ],
            Role::Staff => &[Purchase, SubmitTopup, ReviewTopups, ManageStock, ViewReports],
            Role::Support => &[Purchase, SubmitTopup, ReviewTopups, ViewReports],
            Role::Reseller | Role::User => &[Purchase, SubmitTopup],
        }
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ShopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "staff" => Ok(Role::Staff),
            "reseller" => Ok(Role::Reseller),
            "support" => Ok(Role::Support),
            "user" => Ok(Role::User),
            other => Err(ShopError::validation(format!("Unknown role '{}'", other))),
        }
    }
}

/// Who is performing an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: u64,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: u64, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn require(&self, capability: Capability) -> ShopResult<()> {
        if self.role.allows(capability) {
            Ok(())
        } else {
            Err(ShopError::Forbidden(format!(
                "Role '{}' may not perform {:?}",
                self.role, capability
            )))
        }
    }
}

/// Direction of an admin balance adjustment
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BalanceDirection {
    Add,
    Remove,
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Public view of a user, without the password hash
#[derive(Debug, Serialize, Clone)]
pub struct UserProfile {
    pub id: u64,
    pub username: String,
    pub balance: Decimal,
    pub role: Role,
    pub external_account_id: Option<i64>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            balance: user.balance,
            role: user.role,
            external_account_id: user.external_account_id,
            phone: user.phone.clone(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 32))]
    pub username: String,
    #[validate(length(min = 4, max = 128))]
    pub password: String,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustBalanceRequest {
    pub amount: Decimal,
    pub direction: BalanceDirection,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_has_every_capability() {
        assert!(Role::Admin.allows(Capability::ManageUsers));
        assert!(Role::Admin.allows(Capability::AdjustBalance));
        assert_eq!(Role::Admin.capabilities().len(), 8);
    }

    #[test]
    fn test_staff_and_support_grants() {
        assert!(Role::Staff.allows(Capability::ManageStock));
        assert!(!Role::Staff.allows(Capability::ManagePromos));
        assert!(Role::Support.allows(Capability::ReviewTopups));
        assert!(!Role::Support.allows(Capability::ManageStock));
    }

    #[test]
    fn test_actor_require() {
        let user = Actor::new(7, Role::User);
        assert!(user.require(Capability::Purchase).is_ok());
        assert!(matches!(
            user.require(Capability::ReviewTopups),
            Err(ShopError::Forbidden(_))
        ));
        let reseller = Actor::new(8, Role::Reseller);
        assert!(reseller.require(Capability::SubmitTopup).is_ok());
    }

    #[test]
    fn test_role_parse_and_serde() {
        assert_eq!("Reseller".parse::<Role>().unwrap(), Role::Reseller);
        assert!("owner".parse::<Role>().is_err());
        assert_eq!(serde_json::to_string(&Role::Support).unwrap(), "\"support\"");
    }
}
