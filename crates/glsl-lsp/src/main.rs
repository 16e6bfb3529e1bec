//! GLSL Language Server.
//!
//! Usage:
//!   glsl-lsp               # Start LSP server (stdio)
//!   glsl-lsp --embedded    # Track documents without running the validator
//!   glsl-lsp --version     # Print version
//!   glsl-lsp --help        # Print help

use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("glsl-lsp {}", glsl_lsp::VERSION);
        return ExitCode::SUCCESS;
    }

    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("GLSL Language Server");
        println!();
        println!("Usage: glsl-lsp [OPTIONS]");
        println!();
        println!("Options:");
        println!("      --embedded  Never read files or run glslangValidator");
        println!("  -h, --help      Print help");
        println!("  -V, --version   Print version");
        println!();
        println!("The server communicates via stdio using the Language Server Protocol.");
        println!();
        println!("Environment variables:");
        println!("  RUST_LOG        Set log level (e.g., RUST_LOG=glsl_lsp=debug)");
        return ExitCode::SUCCESS;
    }

    let embedded = args.iter().any(|a| a == "--embedded");

    // Logs go to stderr; stdout carries the protocol.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("glsl_lsp=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match glsl_lsp::start_stdio(embedded) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
