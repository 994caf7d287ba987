pub mod handlers;
pub mod server;

pub mod pb {
    tonic::include_proto!("user");
}
