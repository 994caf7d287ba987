use crate::grpc::pb::user_service_server::UserService;
use crate::grpc::pb::{RegisterParams, RegisterResponse};
use crate::storage::account_entity::Model as Account;
use crate::storage::AccountStorage;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{error, info};

/// Account operations of the user service.
pub struct AccountService {
    storage: Arc<dyn AccountStorage>,
}

impl AccountService {
    pub fn new(storage: Arc<dyn AccountStorage>) -> Self {
        Self { storage }
    }
}

#[tonic::async_trait]
impl UserService for AccountService {
    async fn register(
        &self,
        request: Request<RegisterParams>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();
        if req.account.is_empty() {
            return Err(Status::invalid_argument("account is required"));
        }

        let existing = self
            .storage
            .find_by_account(&req.account)
            .await
            .map_err(|e| {
                error!("Account lookup failed: {}", e);
                Status::internal("account lookup failed")
            })?;
        if existing.is_some() {
            return Err(Status::already_exists("account already registered"));
        }

        let account = Account {
            id: 0,
            uid: String::new(),
            account: req.account,
            password: req.password,
            login_platform: req.login_platform,
            create_time: chrono::Utc::now().to_rfc3339(),
        };
        let saved = self.storage.save(account).await.map_err(|e| {
            error!("Saving account failed: {}", e);
            Status::internal("saving account failed")
        })?;

        info!("Registered account {} as uid {}", saved.account, saved.uid);
        Ok(Response::new(RegisterResponse { uid: saved.uid }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteAccountStorage;

    async fn service() -> AccountService {
        let storage = SqliteAccountStorage::new("sqlite::memory:").await.unwrap();
        AccountService::new(Arc::new(storage))
    }

    fn params(account: &str) -> RegisterParams {
        RegisterParams {
            account: account.to_string(),
            password: "secret".to_string(),
            login_platform: 1,
        }
    }

    #[tokio::test]
    async fn register_returns_uid() {
        let service = service().await;
        let resp = service
            .register(Request::new(params("alice")))
            .await
            .unwrap();
        assert!(!resp.into_inner().uid.is_empty());
    }

    #[tokio::test]
    async fn register_rejects_empty_account() {
        let service = service().await;
        let status = service
            .register(Request::new(params("")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let service = service().await;
        service
            .register(Request::new(params("bob")))
            .await
            .unwrap();
        let status = service
            .register(Request::new(params("bob")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::AlreadyExists);
    }
}
