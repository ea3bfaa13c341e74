//! Generates an Ed25519 identity and derives its overlay address.
//!
//! Usage:
//!   mycoria-keygen --prefix fd00 --output ./keys/
//!
//! Writes the raw 32-byte signing key to `<name>_secret.key` and prints
//! the derived overlay address and verifying key for use in router
//! configuration.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use ed25519_dalek::SigningKey;
use mycoria_core::address::{PublicAddress, SigningKeyType, PREFIX_BYTES};
use rand::rngs::OsRng;

#[derive(Parser)]
#[command(name = "mycoria-keygen", version, about = "Mycoria Ed25519 identity generator")]
struct Args {
    /// Overlay prefix as hex, e.g. "fd00" (must be PREFIX_BYTES bytes).
    #[arg(short, long, default_value = "fd00")]
    prefix: String,

    /// File name stem for the generated key.
    #[arg(short, long, default_value = "mycoria")]
    name: String,

    /// Output directory for the key file.
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
}

fn parse_prefix(hex_str: &str) -> [u8; PREFIX_BYTES] {
    let bytes = hex::decode(hex_str).expect("prefix must be valid hex");
    if bytes.len() != PREFIX_BYTES {
        eprintln!("prefix must be exactly {} bytes ({} hex chars)", PREFIX_BYTES, PREFIX_BYTES * 2);
        std::process::exit(1);
    }
    let mut prefix = [0u8; PREFIX_BYTES];
    prefix.copy_from_slice(&bytes);
    prefix
}

fn main() {
    let args = Args::parse();
    let prefix = parse_prefix(&args.prefix);

    println!("================================================================");
    println!("  Mycoria Ed25519 Identity Generator");
    println!("================================================================");
    println!();

    let signing_key = SigningKey::generate(&mut OsRng);
    let address = PublicAddress::derive(SigningKeyType::Ed25519, signing_key.verifying_key(), prefix);

    fs::create_dir_all(&args.output).expect("failed to create output directory");

    let secret_path = args.output.join(format!("{}_secret.key", args.name));
    fs::write(&secret_path, signing_key.to_bytes()).expect("failed to write secret key");
    println!("Secret key saved to: {}", secret_path.display());
    println!("  (32 bytes, raw Ed25519 seed)");
    println!();

    println!("Overlay address: {}", address.ip);
    println!("Verifying key:   {}", hex::encode(address.public_key_bytes()));
    println!();

    use ed25519_dalek::{Signer, Verifier};
    let self_check_msg = b"mycoria-keygen self-check";
    let self_check_sig = signing_key.sign(self_check_msg);
    let verify_ok = signing_key.verifying_key().verify(self_check_msg, &self_check_sig).is_ok();
    println!("Signature self-check: {}", if verify_ok { "PASSED" } else { "FAILED" });
    if !verify_ok {
        std::process::exit(1);
    }
    println!();

    println!("Configure the router with:");
    println!("  Identity::new(signing_key, prefix)");
    println!("  overlay_prefix = {}", args.prefix);
}
