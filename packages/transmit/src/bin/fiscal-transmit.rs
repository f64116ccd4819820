//! Operator CLI for the fiscal transmitter

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use fiscal_transmit::{
    FiscalService, Region, StatusQuery, TaxEnvironment, TaxpayerIdentity, TransmissionRequest,
    TransmitConfig, Transmitter,
};
use secrecy::SecretString;

#[derive(Parser, Debug)]
#[command(name = "fiscal-transmit", version)]
#[command(about = "Sign and transmit fiscal documents to SEFAZ web services")]
struct Cli {
    /// JSON configuration file (defaults to the production preset)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the homologation preset when no configuration file is given
    #[arg(long, global = true)]
    homologation: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the custom trust store if needed and list the active anchors
    TrustStore {
        /// Rebuild the merged trust from the persisted store
        #[arg(long)]
        refresh: bool,
    },

    /// Print the endpoint configured for a service
    Route {
        /// Service name, e.g. STATUS
        service: String,
        /// State abbreviation or IBGE code
        region: String,
        /// PROD or HOM
        #[arg(long, default_value = "PROD")]
        environment: String,
        /// Document model
        #[arg(long, default_value = "NFE")]
        model: String,
    },

    /// Sign an XML document with a taxpayer's certificate
    Sign {
        #[command(flatten)]
        taxpayer: TaxpayerArgs,
        /// Unsigned document
        input: PathBuf,
        /// Where to write the signed document (stdout when omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Transmit a document and print the raw response
    Send {
        #[command(flatten)]
        taxpayer: TaxpayerArgs,
        /// Service name, e.g. STATUS
        service: String,
        /// Request document; a status query is generated for STATUS when omitted
        input: Option<PathBuf>,
        /// PROD or HOM
        #[arg(long, default_value = "PROD")]
        environment: String,
        /// Target state when it differs from the taxpayer's
        #[arg(long)]
        region: Option<String>,
    },
}

#[derive(Args, Debug)]
struct TaxpayerArgs {
    /// Taxpayer CNPJ or CPF
    #[arg(long)]
    fiscal_id: String,
    /// PKCS#12 key bundle
    #[arg(long)]
    bundle: PathBuf,
    /// Taxpayer's home state
    #[arg(long)]
    home_region: String,
    /// Key bundle passphrase
    #[arg(long, env = "FISCAL_BUNDLE_PASSPHRASE", hide_env_values = true)]
    passphrase: String,
}

impl TaxpayerArgs {
    fn identity(self) -> TaxpayerIdentity {
        TaxpayerIdentity::new(
            self.fiscal_id,
            self.bundle,
            SecretString::from(self.passphrase),
            self.home_region,
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TransmitConfig::from_json_file(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None if cli.homologation => TransmitConfig::homologation(),
        None => TransmitConfig::production(),
    };
    let transmitter = Transmitter::from_config(config).await?;

    match cli.command {
        Commands::TrustStore { refresh } => {
            let merged = if refresh {
                transmitter.refresh_trust().await?
            } else {
                transmitter.ensure_trust_store().await?
            };
            for anchor in merged.custom().anchors() {
                println!("{}\t{}\t{}", anchor.alias, anchor.not_after, anchor.subject);
            }
            println!(
                "{} custom anchors, {} platform anchors, {} hosts harvested",
                merged.custom().len(),
                merged.platform_count(),
                merged.custom().harvested_hosts().count()
            );
        }
        Commands::Route {
            service,
            region,
            environment,
            model,
        } => {
            let address = transmitter
                .router()
                .resolve(&model, &service, &region, &environment)?;
            println!("{address}");
        }
        Commands::Sign {
            taxpayer,
            input,
            output,
        } => {
            let xml = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            let signed = transmitter.sign(&taxpayer.identity(), &xml).await?;
            match output {
                Some(path) => tokio::fs::write(&path, signed.as_str())
                    .await
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{}", signed.as_str()),
            }
        }
        Commands::Send {
            taxpayer,
            service,
            input,
            environment,
            region,
        } => {
            let identity = taxpayer.identity();
            let region = region.unwrap_or_else(|| identity.region().to_string());
            let payload = match input {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?,
                None if FiscalService::lookup(&service)? == FiscalService::Status => StatusQuery {
                    environment: environment.parse::<TaxEnvironment>()?,
                    region: Region::lookup(&region)?,
                }
                .to_xml(),
                None => bail!("service {service} needs an input document"),
            };

            let request =
                TransmissionRequest::new(identity, service, environment, payload).with_region(region);
            let response = transmitter.transmit(&request).await?;
            eprintln!("HTTP {}", response.status);
            println!("{}", response.body);
        }
    }

    Ok(())
}
