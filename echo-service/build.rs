//! Compiles the echo protos and captures their `FileDescriptorSet`.
//!
//! The service definition is split across two files on purpose: `echo.proto`
//! imports `echo_types.proto`, so the captured set contains a real dependency
//! edge for the library's descriptor-graph tests to walk. Only the server side
//! is generated; the tests drive the service through dynamic clients.

use prost::Message;
use std::env;
use std::error::Error;
use std::path::PathBuf;

static PROTOS: &[&str] = &["proto/echo_types.proto", "proto/echo.proto"];

fn main() -> Result<(), Box<dyn Error>> {
    let descriptor_path = PathBuf::from(env::var("OUT_DIR")?).join("echo_descriptor_set.bin");

    let file_descriptor_set = protox::compile(PROTOS, &["proto"])?;
    std::fs::write(&descriptor_path, file_descriptor_set.encode_to_vec())?;

    tonic_prost_build::configure()
        .build_client(false)
        .compile_fds(file_descriptor_set)?;

    Ok(())
}
