// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! SCEP Enrollment Command-Line Tool
//!
//! Enrolls a CSR with a SCEP server and inspects the server's CA
//! certificates and capabilities.
//!
//! # Usage
//!
//! ```text
//! scep-enroll [OPTIONS] --server <URL> <COMMAND>
//!
//! Commands:
//!   sign      Enroll a CSR and write the issued certificate
//!   ca-certs  Fetch the CA certificates
//!   ca-caps   Show the server capabilities
//!
//! Options:
//!   -s, --server <URL>    SCEP server URL
//!   -c, --config <PATH>   Controller configuration file (enrollment settings)
//!       --insecure        Accept any TLS server certificate
//!   -v, --verbose         Enable verbose output
//!   -h, --help            Print help
//!   -V, --version         Print version
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Enroll with the challenge from an environment variable
//! SCEP_CHALLENGE=secret scep-enroll --server http://ca.example.com/scep \
//!     sign --csr request.csr --out cert.pem --challenge-env SCEP_CHALLENGE
//!
//! # Save the CA chain
//! scep-enroll --server http://ca.example.com/scep ca-certs --out ca.pem
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use scep_issuer::config::ControllerConfig;
use scep_issuer::logging::{self, LogLevel};
use scep_issuer::types::certificate_to_pem;
use scep_issuer::{ScepClient, ScepClientConfig, ScepTransport, TrustAnchors, csr};
use tokio_util::sync::CancellationToken;

/// SCEP Enrollment Command-Line Tool
#[derive(Parser)]
#[command(name = "scep-enroll")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Certificate enrollment using SCEP (RFC 8894)", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// SCEP server URL
    #[arg(short, long, global = true, value_name = "URL")]
    server: Option<String>,

    /// Controller configuration file providing enrollment settings
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Accept any TLS server certificate (testing only)
    #[arg(long, global = true)]
    insecure: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a CSR and write the issued certificate
    Sign {
        /// PEM or DER encoded CSR
        #[arg(long, value_name = "PATH")]
        csr: PathBuf,

        /// Where to write the certificate (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        out: Option<PathBuf>,

        /// Private key of the CSR, used to re-sign it after challenge injection
        #[arg(long, value_name = "PATH")]
        key: Option<PathBuf>,

        /// Environment variable holding the challenge password
        #[arg(long, value_name = "VAR", conflicts_with = "challenge_file")]
        challenge_env: Option<String>,

        /// File holding the challenge password
        #[arg(long, value_name = "PATH")]
        challenge_file: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(long, value_name = "SECS")]
        deadline: Option<u64>,
    },

    /// Fetch the CA certificates
    CaCerts {
        /// Where to write the PEM bundle (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        out: Option<PathBuf>,
    },

    /// Show the server capabilities
    CaCaps,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let controller_config = match &cli.config {
        Some(path) => match ControllerConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => ControllerConfig::default(),
    };

    let mut log_config = controller_config.logging.clone();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    logging::init(&log_config);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run_command(cli, controller_config));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_command(
    cli: Cli,
    controller_config: ControllerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = cli
        .server
        .as_deref()
        .ok_or("No server URL provided. Use --server.")?;

    match &cli.command {
        Commands::Sign {
            csr,
            out,
            key,
            challenge_env,
            challenge_file,
            deadline,
        } => {
            let challenge = read_challenge(challenge_env.as_deref(), challenge_file.as_deref())?;
            let mut config = client_config(&cli, &controller_config, server, &challenge)?;
            if let Some(secs) = deadline {
                config.enrollment_deadline = Some(Duration::from_secs(*secs));
            }
            cmd_sign(config, csr, out.as_deref(), key.as_deref()).await
        }
        Commands::CaCerts { out } => {
            let config = client_config(&cli, &controller_config, server, "")?;
            cmd_ca_certs(config, out.as_deref()).await
        }
        Commands::CaCaps => {
            let config = client_config(&cli, &controller_config, server, "")?;
            cmd_ca_caps(config).await
        }
    }
}

fn client_config(
    cli: &Cli,
    controller_config: &ControllerConfig,
    server: &str,
    challenge: &str,
) -> Result<ScepClientConfig, Box<dyn std::error::Error>> {
    let mut config = controller_config.client_config(server, challenge)?;
    if cli.insecure {
        config.trust_anchors = TrustAnchors::InsecureAcceptAny;
    }
    Ok(config)
}

fn read_challenge(
    env: Option<&str>,
    file: Option<&Path>,
) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(var) = env {
        return std::env::var(var)
            .map_err(|_| format!("environment variable {} is not set", var).into());
    }
    if let Some(path) = file {
        let content = std::fs::read_to_string(path)?;
        return Ok(content.trim_end_matches(['\r', '\n']).to_string());
    }
    Ok(String::new())
}

async fn cmd_sign(
    config: ScepClientConfig,
    csr_path: &Path,
    out: Option<&Path>,
    key_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let csr_pem = std::fs::read(csr_path)?;
    let key = match key_path {
        Some(path) => Some(csr::parse_private_key_pem(&std::fs::read(path)?)?),
        None => None,
    };

    let client = ScepClient::new(config).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let certificate = match &key {
        Some(key) => client.sign_with_private_key(&csr_pem, key, &cancel).await?,
        None => client.sign_with_cancel(&csr_pem, &cancel).await?,
    };

    write_output(out, &certificate)
}

async fn cmd_ca_certs(
    config: ScepClientConfig,
    out: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = ScepClient::new(config).await?;
    let cas = client.get_ca_certs().await?;

    let mut bundle = String::new();
    for cert in &cas {
        eprintln!("  {}", cert.tbs_certificate.subject);
        bundle.push_str(&certificate_to_pem(cert)?);
    }
    eprintln!("Retrieved {} CA certificate(s)", cas.len());

    write_output(out, &bundle)
}

async fn cmd_ca_caps(config: ScepClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = ScepClient::new(config).await?;
    let caps = client.transport().get_ca_caps().await?;

    if caps.is_empty() {
        println!("(no capabilities advertised)");
    }
    for cap in caps.iter() {
        println!("{}", cap);
    }
    Ok(())
}

fn write_output(out: Option<&Path>, content: &str) -> Result<(), Box<dyn std::error::Error>> {
    match out {
        Some(path) => {
            std::fs::write(path, content)?;
            eprintln!("Wrote {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}
