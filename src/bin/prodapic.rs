//! Prodapic command-line tool
//!
//! Composites product photos over generated backgrounds using the prodapic library.

#[cfg(feature = "cli")]
use prodapic::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
