use anyhow::Result;
use std::path::Path;

use crate::config::expand_path;
use crate::tls::MtlsBundle;

/// Generate a CA plus CA-signed server and client certificates
pub fn generate_certificates(
    out_dir: &str,
    ca_name: &str,
    server_names: &[String],
    client_name: &str,
) -> Result<()> {
    let bundle = MtlsBundle::generate(ca_name, server_names, client_name)?;
    let dir = expand_path(out_dir);
    let written = bundle.write_to(Path::new(&dir))?;

    for path in written {
        println!("Generated: {}", path.display());
    }
    println!("\nServer: --ca ca.pem --cert server.pem --key server-key.pem");
    println!("Client: --ca ca.pem --cert client.pem --key client-key.pem");

    Ok(())
}
