use protoc_bin_vendored::protoc_bin_path;
use std::{env, error::Error};

fn main() -> Result<(), Box<dyn Error>> {
    let protoc_path = protoc_bin_path()?;

    unsafe {
        env::set_var("PROTOC", &protoc_path);
    }

    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(&["proto/etcd/v3/rpc.proto"], &["proto"])?;
    Ok(())
}
