//! User directory: accounts, roles and chat-account binding

use std::sync::Arc;

use crate::auth::password::{hash_password, verify_password, DEFAULT_COST};
use crate::error::{ShopError, ShopResult};
use crate::store::LedgerStore;
use crate::users::{Location, Role, User};

/// Account management over the `users` collection
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<LedgerStore>,
    hash_cost: u32,
}

fn validate_username(username: &str) -> ShopResult<()> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(ShopError::validation(
            "Username must be between 3 and 32 characters",
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ShopError::validation(
            "Username may only contain letters, digits and underscores",
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> ShopResult<()> {
    let len = password.chars().count();
    if !(4..=128).contains(&len) {
        return Err(ShopError::validation(
            "Password must be between 4 and 128 characters",
        ));
    }
    Ok(())
}

impl UserDirectory {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self {
            store,
            hash_cost: DEFAULT_COST,
        }
    }

    /// Override the bcrypt cost (tests use the minimum)
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    /// Create a new account with a zero balance
    pub async fn create_user(&self, username: &str, password: &str, role: Role) -> ShopResult<User> {
        let username = username.trim();
        validate_username(username)?;
        validate_password(password)?;

        // Hash before entering the collection lock
        let password_hash = hash_password(password, self.hash_cost)?;
        let username = username.to_string();

        let user = self
            .store
            .users
            .update(move |users| {
                if users
                    .iter()
                    .any(|u| u.username.eq_ignore_ascii_case(&username))
                {
                    return Err(ShopError::Conflict(format!(
                        "Username '{}' is already taken",
                        username
                    )));
                }
                let id = users.iter().map(|u| u.id).max().unwrap_or(0) + 1;
                let user = User::new(id, username, password_hash, role);
                users.push(user.clone());
                Ok(user)
            })
            .await?;

        tracing::info!(user_id = user.id, username = %user.username, role = %role, "User created");
        Ok(user)
    }

    pub async fn get(&self, user_id: u64) -> ShopResult<User> {
        self.store
            .users
            .view(|users| users.iter().find(|u| u.id == user_id).cloned())
            .await?
            .ok_or_else(|| ShopError::not_found(format!("User #{}", user_id)))
    }

    pub async fn find_by_username(&self, username: &str) -> ShopResult<Option<User>> {
        let username = username.trim();
        self.store
            .users
            .view(|users| {
                users
                    .iter()
                    .find(|u| u.username.eq_ignore_ascii_case(username))
                    .cloned()
            })
            .await
    }

    pub async fn find_by_external(&self, external_id: i64) -> ShopResult<Option<User>> {
        self.store
            .users
            .view(|users| {
                users
                    .iter()
                    .find(|u| u.external_account_id == Some(external_id))
                    .cloned()
            })
            .await
    }

    pub async fn list(&self) -> ShopResult<Vec<User>> {
        self.store.users.read().await
    }

    /// Check a username/password pair
    pub async fn authenticate(&self, username: &str, password: &str) -> ShopResult<User> {
        let user = self
            .find_by_username(username)
            .await?
            .filter(|u| verify_password(password, &u.password_hash));

        user.ok_or_else(|| ShopError::validation("Invalid username or password"))
    }

    /// Log a chat account into a shop account.
    ///
    /// A user bound to a different chat account is refused. If the chat
    /// account was bound to some other user, that binding is released.
    pub async fn bind_external_account(
        &self,
        external_id: i64,
        username: &str,
        password: &str,
    ) -> ShopResult<User> {
        let user = self.authenticate(username, password).await?;
        let user_id = user.id;

        let bound = self
            .store
            .users
            .update(move |users| {
                let target = users
                    .iter()
                    .find(|u| u.id == user_id)
                    .ok_or_else(|| ShopError::not_found(format!("User #{}", user_id)))?;

                if let Some(existing) = target.external_account_id {
                    if existing != external_id {
                        return Err(ShopError::Conflict(
                            "Account is already linked to another chat account".to_string(),
                        ));
                    }
                }

                for other in users.iter_mut().filter(|u| u.id != user_id) {
                    if other.external_account_id == Some(external_id) {
                        other.external_account_id = None;
                    }
                }

                let target = users
                    .iter_mut()
                    .find(|u| u.id == user_id)
                    .ok_or_else(|| ShopError::not_found(format!("User #{}", user_id)))?;
                target.external_account_id = Some(external_id);
                Ok(target.clone())
            })
            .await?;

        tracing::info!(user_id, external_id, "Chat account bound");
        Ok(bound)
    }

    /// Returns whether a binding existed
    pub async fn unbind_external_account(&self, external_id: i64) -> ShopResult<bool> {
        self.store
            .users
            .update(move |users| {
                let mut released = false;
                for user in users.iter_mut() {
                    if user.external_account_id == Some(external_id) {
                        user.external_account_id = None;
                        released = true;
                    }
                }
                Ok(released)
            })
            .await
    }

    pub async fn set_role(&self, user_id: u64, role: Role) -> ShopResult<User> {
        self.modify(user_id, |user| {
            user.role = role;
            Ok(())
        })
        .await
    }

    pub async fn update_profile(
        &self,
        user_id: u64,
        phone: Option<String>,
        location: Option<Location>,
    ) -> ShopResult<User> {
        self.modify(user_id, move |user| {
            if phone.is_some() {
                user.phone = phone;
            }
            if location.is_some() {
                user.last_known_location = location;
            }
            Ok(())
        })
        .await
    }

    /// Remove an account. Admin action only.
    ///
    /// Callers hold the user's balance lock so a purchase in flight finishes
    /// first.
    pub async fn delete_user(&self, user_id: u64) -> ShopResult<User> {
        let removed = self
            .store
            .users
            .update(move |users| {
                let index = users
                    .iter()
                    .position(|u| u.id == user_id)
                    .ok_or_else(|| ShopError::not_found(format!("User #{}", user_id)))?;
                Ok(users.remove(index))
            })
            .await?;
        tracing::warn!(user_id, username = %removed.username, "User deleted");
        Ok(removed)
    }

    async fn modify(
        &self,
        user_id: u64,
        f: impl FnOnce(&mut User) -> ShopResult<()>,
    ) -> ShopResult<User> {
        self.store
            .users
            .update(move |users| {
                let user = users
                    .iter_mut()
                    .find(|u| u.id == user_id)
                    .ok_or_else(|| ShopError::not_found(format!("User #{}", user_id)))?;
                f(user)?;
                Ok(user.clone())
            })
            .await
    }
}
