use super::account_entity::{self, Model as Account};
use super::{AccountStorage, Db};
use anyhow::Result;
use async_trait::async_trait;
use sea_orm::*;
use tracing::info;

// uids start well above zero so they read like account numbers
const UID_OFFSET: i64 = 100000;

#[derive(Clone)]
pub struct SqliteAccountStorage {
    db: Db,
}

impl SqliteAccountStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("Initializing SQLite account storage at {}", database_url);

        let db = Database::connect(
            ConnectOptions::new(database_url.to_owned())
                .sqlx_logging(false)
                .to_owned(),
        )
        .await?;

        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uid TEXT NOT NULL DEFAULT '',
                account TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                login_platform INTEGER NOT NULL DEFAULT 0,
                create_time TEXT NOT NULL
            )
            "#
            .to_owned(),
        ))
        .await?;

        Ok(Self { db })
    }
}

#[async_trait]
impl AccountStorage for SqliteAccountStorage {
    async fn save(&self, account: Account) -> Result<Account> {
        let active = account_entity::ActiveModel {
            id: NotSet,
            uid: Set(String::new()),
            account: Set(account.account.clone()),
            password: Set(account.password.clone()),
            login_platform: Set(account.login_platform),
            create_time: Set(account.create_time.clone()),
        };
        let inserted = account_entity::Entity::insert(active).exec(&self.db).await?;

        // the uid is derived from the row id, so it is only known post-insert
        let id = inserted.last_insert_id;
        let uid = (UID_OFFSET + id).to_string();
        let update = account_entity::ActiveModel {
            id: Set(id),
            uid: Set(uid.clone()),
            ..Default::default()
        };
        account_entity::Entity::update(update).exec(&self.db).await?;

        Ok(Account { id, uid, ..account })
    }

    async fn find_by_account(&self, name: &str) -> Result<Option<Account>> {
        let found = account_entity::Entity::find()
            .filter(account_entity::Column::Account.eq(name))
            .one(&self.db)
            .await?;
        Ok(found)
    }
}
