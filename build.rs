fn main() {
    // compile user service proto files
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/user.proto"], &["proto"])
        .unwrap_or_else(|e| panic!("Failed to compile protos: {}", e));

    // notify Cargo to rerun if source files change
    println!("cargo:rerun-if-changed=proto/user.proto");
    println!("cargo:rerun-if-changed=build.rs");
}
