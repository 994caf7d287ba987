#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use game_rs::config::Config;
use game_rs::grpc::handlers::AccountService;
use game_rs::grpc::pb::user_service_server::UserServiceServer;
use game_rs::grpc::server::GrpcServer;
use game_rs::storage::SqliteAccountStorage;
use game_rs::utils::{logger, shutdown_signal};
use game_rs::{connector, web};
use local_ip_address::local_ip;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "game-rs", about = "Game microservice backend")]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// HTTP gateway in front of the RPC services
    Gateway,
    /// User account gRPC service
    User,
    /// Game connector
    Connector,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let conf = Config::load(&cli.config)?;
    let _guard = logger::init(conf.log_dir.clone(), &conf.app_name)?;

    info!("Starting {}...", conf.app_name);
    match cli.command {
        Command::Gateway => web::serve(conf).await,
        Command::User => run_user(conf).await,
        Command::Connector => connector::run(conf).await,
    }
}

async fn run_user(conf: Config) -> Result<()> {
    let storage = Arc::new(SqliteAccountStorage::new(&conf.database_url).await?);
    let service = AccountService::new(storage);

    let listen: SocketAddr = conf.grpc_addr.parse()?;
    let mut etcd = conf.etcd.clone();
    if etcd.register.addr.is_empty() {
        // advertise the LAN address when none is configured
        etcd.register.addr = format!("{}:{}", local_ip()?, listen.port());
    }

    GrpcServer::new(etcd)
        .serve(listen, UserServiceServer::new(service), shutdown_signal())
        .await
}
