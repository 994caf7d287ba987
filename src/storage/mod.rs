pub mod account_entity;
pub mod sqlite;

use account_entity::Model as Account;
use anyhow::Result;
use async_trait::async_trait;
use sea_orm::DatabaseConnection;

pub type Db = DatabaseConnection;

/// Boundary of the user service's persistence. The schema behind it is an
/// implementation detail of the store.
#[async_trait]
pub trait AccountStorage: Send + Sync {
    /// Persist a new account and allocate its uid. Returns the stored row.
    async fn save(&self, account: Account) -> Result<Account>;

    /// Look up an account by its login name.
    async fn find_by_account(&self, account: &str) -> Result<Option<Account>>;
}

pub use sqlite::SqliteAccountStorage;
