use anyhow::Context;
use clap::{Parser, Subcommand};
use fhir::reference::{
    build_relative_reference, parse_canonical_url, parse_reference, resolve_reference,
};
use fhir::{Choice, Transcoded};
use medreq_core::{ConfigOverrides, ServerConfig, TranscodingService};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "medreq")]
#[command(about = "FHIR R4 MedicationRequest transcoder")]
struct Cli {
    /// YAML configuration file (optional)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a MedicationRequest and print a summary with its diagnostics
    Deserialize {
        /// Path to a MedicationRequest JSON file
        file: PathBuf,
    },
    /// Assemble then serialise a MedicationRequest, printing the JSON
    RoundTrip {
        /// Path to a MedicationRequest JSON file
        file: PathBuf,
    },
    /// Print the OperationOutcome for a MedicationRequest's diagnostics
    Outcome {
        /// Path to a MedicationRequest JSON file
        file: PathBuf,
    },
    /// Split a reference such as Patient/123 or an absolute reference URL
    ParseReference {
        /// Reference text
        text: String,
    },
    /// Parse a canonical URL against the configured server
    ParseCanonical {
        /// Canonical URL
        url: String,
    },
    /// Build a relative reference
    RelativeReference {
        /// Resource type, e.g. Patient
        resource_type: String,
        /// Resource id
        id: String,
        /// Display name (optional)
        #[arg(long)]
        display: Option<String>,
    },
}

/// Entry point for the `medreq` transcoding CLI.
///
/// Configuration is resolved once here: `.env` is loaded, then the optional `--config`
/// YAML file, then the `MEDREQ_*` environment overrides.
///
/// # Environment Variables
/// - `MEDREQ_FHIR_BASE_URL`: FHIR API base URL
/// - `MEDREQ_OAUTH_ADDRESS`: OAuth server address; its host marks local resources
/// - `MEDREQ_CHOICE_POLICY`: `first-match` (default) or `reject`
/// - `RUST_LOG`: log filter (default `medreq=info`)
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("medreq=info".parse()?)
                .add_directive("medreq_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = ServerConfig::resolve(cli.config.as_deref(), ConfigOverrides::from_env())
        .context("failed to resolve configuration")?;
    let service = TranscodingService::new(Arc::new(config));

    match cli.command {
        Commands::Deserialize { file } => {
            let transcoded = ingest_file(&service, &file)?;
            print_summary(&transcoded);
        }
        Commands::RoundTrip { file } => {
            let transcoded = ingest_file(&service, &file)?;
            println!("{}", transcoded.resource.to_json_string()?);
        }
        Commands::Outcome { file } => {
            let transcoded = ingest_file(&service, &file)?;
            let outcome = service.outcome(&transcoded.diagnostics);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::ParseReference { text } => {
            let parsed = parse_reference(&text);
            let resolved = resolve_reference(&text, service.config());
            println!("type:  {}", parsed.resource_type.as_deref().unwrap_or("-"));
            println!("id:    {}", parsed.id.as_deref().unwrap_or("-"));
            println!("local: {}", resolved.is_local);
            if resolved.resource_type != parsed.resource_type || resolved.id != parsed.id {
                println!(
                    "resolved: {}/{}",
                    resolved.resource_type.as_deref().unwrap_or("-"),
                    resolved.id.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::ParseCanonical { url } => {
            let parsed = parse_canonical_url(&url, service.config());
            println!("valid: {}", parsed.is_valid);
            println!("local: {}", parsed.is_local);
            println!("type:  {}", parsed.resource_type.as_deref().unwrap_or("-"));
            println!("id:    {}", parsed.id.as_deref().unwrap_or("-"));
        }
        Commands::RelativeReference {
            resource_type,
            id,
            display,
        } => {
            let reference = build_relative_reference(&resource_type, &id, display.as_deref());
            println!("{}", serde_json::to_string_pretty(&reference)?);
        }
    }

    Ok(())
}

fn ingest_file(service: &TranscodingService, path: &Path) -> anyhow::Result<Transcoded> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    service
        .ingest_str(&text)
        .with_context(|| format!("failed to assemble {}", path.display()))
}

fn print_summary(transcoded: &Transcoded) {
    let resource = &transcoded.resource;
    println!("id:         {}", resource.id().unwrap_or("-"));
    println!("status:     {}", resource.status().unwrap_or("-"));
    println!("intent:     {}", resource.intent().unwrap_or("-"));
    println!(
        "medication: {}",
        resource.medication.as_ref().map(Choice::key).unwrap_or("-")
    );
    println!(
        "subject:    {}",
        resource
            .subject
            .as_ref()
            .and_then(|subject| subject.reference.as_ref())
            .map(|reference| reference.to_string())
            .unwrap_or_else(|| "-".into())
    );
    println!("dosages:    {}", resource.dosage_instruction.len());
    println!("identifiers: {}", resource.identifier.len());

    if transcoded.diagnostics.is_empty() {
        println!("diagnostics: none");
    } else {
        println!("diagnostics:");
        for diagnostic in &transcoded.diagnostics {
            println!("  - {diagnostic}");
        }
    }
}
