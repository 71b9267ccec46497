//! Known user accounts.
//!
//! Account management proper lives outside the engine; this directory only
//! holds what session operations need to resolve users, and enforces unique
//! usernames at creation time.

use crate::persistence::{Mirror, MirrorOp, UserDocument};
use log::info;
use shared::{GameError, GameResult, UserId, UserView};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Accounts {
    by_id: HashMap<UserId, UserDocument>,
    by_name: HashMap<String, UserId>,
    next_id: UserId,
}

#[derive(Debug)]
pub struct UserDirectory {
    accounts: RwLock<Accounts>,
    mirror: Mirror,
}

impl UserDirectory {
    pub fn new(mirror: Mirror) -> Self {
        Self {
            accounts: RwLock::new(Accounts {
                next_id: 1,
                ..Accounts::default()
            }),
            mirror,
        }
    }

    /// Registers a new account. A taken username yields `Conflict` and
    /// leaves the existing account untouched.
    pub async fn create(
        &self,
        username: &str,
        credential: &str,
        email: Option<&str>,
    ) -> GameResult<UserView> {
        let username = username.trim();
        if username.is_empty() {
            return Err(GameError::Validation("username must not be empty".into()));
        }

        let mut accounts = self.accounts.write().await;
        if accounts.by_name.contains_key(username) {
            return Err(GameError::Conflict(username.to_string()));
        }

        let id = accounts.next_id;
        accounts.next_id += 1;

        let doc = UserDocument {
            id,
            username: username.to_string(),
            credential: credential.to_string(),
            email: email.map(str::to_string),
        };
        accounts.by_name.insert(doc.username.clone(), id);
        accounts.by_id.insert(id, doc.clone());
        info!("User {} registered as {:?}", id, doc.username);

        let view = view(&doc);
        self.mirror.send(MirrorOp::UpsertUser(doc));
        Ok(view)
    }

    pub async fn find(&self, id: UserId) -> GameResult<UserView> {
        let accounts = self.accounts.read().await;
        accounts
            .by_id
            .get(&id)
            .map(view)
            .ok_or(GameError::UserNotFound(id))
    }

    pub async fn find_by_username(&self, username: &str) -> GameResult<UserView> {
        let accounts = self.accounts.read().await;
        accounts
            .by_name
            .get(username)
            .and_then(|id| accounts.by_id.get(id))
            .map(view)
            .ok_or_else(|| GameError::UsernameNotFound(username.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.by_id.len()
    }
}

fn view(doc: &UserDocument) -> UserView {
    UserView {
        id: doc.id,
        username: doc.username.clone(),
        email: doc.email.clone(),
    }
}
