fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(feature = "grpc")]
    {
        let out_dir = std::env::var("OUT_DIR")?;
        tonic_build::configure()
            .build_server(true)
            .build_client(true)
            .file_descriptor_set_path(format!("{}/esbbridge_descriptor.bin", out_dir))
            .compile_protos(&["proto/esbbridge/v1/esbbridge.proto"], &["proto"])?;
    }
    Ok(())
}
