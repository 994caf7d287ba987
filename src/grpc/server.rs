use crate::config::EtcdConf;
use crate::discovery::Registrar;
use anyhow::Result;
use http::{Request, Response};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tonic::body::BoxBody;
use tonic::codegen::Service;
use tonic::server::NamedService;
use tonic::transport::Server;
use tracing::info;

/// Wraps a tonic server with the discovery lifecycle: the service is
/// registered in etcd before it starts accepting traffic and withdrawn once
/// the server has drained.
pub struct GrpcServer {
    etcd: EtcdConf,
}

impl GrpcServer {
    pub fn new(etcd: EtcdConf) -> Self {
        Self { etcd }
    }

    /// Serve `service` on `listen` until `shutdown` resolves. The advertised
    /// address comes from the etcd register config, not from `listen`, so a
    /// process behind NAT can publish its reachable address.
    pub async fn serve<S, F>(&self, listen: SocketAddr, service: S, shutdown: F) -> Result<()>
    where
        S: Service<Request<BoxBody>, Response = Response<BoxBody>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
        F: Future<Output = ()>,
    {
        let record = self.etcd.register.to_record();
        let registrar = Registrar::start(&self.etcd, record).await?;

        info!("gRPC server listening on {}", listen);
        let served = Server::builder()
            .add_service(service)
            .serve_with_shutdown(listen, shutdown)
            .await;

        registrar.stop().await;
        served?;
        Ok(())
    }
}
