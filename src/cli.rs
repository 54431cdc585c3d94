//! # CLI
//!
//! ```bash
//! # Load, meta-validate and compile a contract
//! brrtcontract validate --spec api/openapi.yaml
//!
//! # Same, with loader/router options from a YAML file
//! brrtcontract validate --spec https://example.com/openapi.json --config brrtc.yaml
//!
//! # List every operation with its matcher, security and parameter strategies
//! brrtcontract routes --spec api/openapi.yaml
//! ```
//!
//! `BRRTC_AUTH_HEADER_*` / `BRRTC_AUTH_QUERY_*` variables are applied on top
//! of the config file.

use crate::config::{ContractConfig, RouterFactoryOptions};
use crate::error::ContractError;
use crate::router::RouterFactory;
use crate::spec::{build_contract, Contract, ContractLoader, SecurityRequirement};
use crate::validator::print_issues;
use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "brrtcontract")]
#[command(about = "OpenAPI 3.0 contract loader and request validation compiler", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load, validate and compile a contract
    Validate {
        /// Root document: file path, file:// or http(s):// URL, or tar: archive member
        #[arg(short, long)]
        spec: String,

        /// YAML file with `loader:` and `router:` sections
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the routes a contract compiles to
    Routes {
        #[arg(short, long)]
        spec: String,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

pub async fn run_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Validate { spec, config } => {
            let contract = compile(&spec, config.as_deref()).await?;
            println!("{}", summary(&spec, &contract));
            Ok(())
        }
        Commands::Routes { spec, config } => {
            let contract = compile(&spec, config.as_deref()).await?;
            print!("{}", render_routes(&contract)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<ContractConfig> {
    let mut config = match path {
        Some(path) => ContractConfig::from_yaml_file(path)?,
        None => ContractConfig::default(),
    };
    config.loader.overlay(std::env::vars());
    Ok(config)
}

async fn compile(spec: &str, config: Option<&std::path::Path>) -> anyhow::Result<Contract> {
    let config = load_config(config)?;
    let loaded = ContractLoader::new(config.loader)?.load(spec).await;
    let loaded = match loaded {
        Ok(loaded) => loaded,
        Err(ContractError::ContractInvalid { violations }) => {
            print_issues(&violations);
            return Err(ContractError::ContractInvalid { violations }.into());
        }
        Err(err) => return Err(err.into()),
    };
    Ok(build_contract(&loaded)?)
}

fn summary(spec: &str, contract: &Contract) -> String {
    let parameters: usize = contract.operations().iter().map(|op| op.parameters.len()).sum();
    let bodies = contract.operations().iter().filter(|op| !op.consumes.is_empty()).count();
    format!(
        "✅ {spec}: {} operation(s), {parameters} parameter processor(s), {bodies} request bod{}",
        contract.len(),
        if bodies == 1 { "y" } else { "ies" }
    )
}

fn security_label(requirements: &[SecurityRequirement]) -> String {
    if requirements.is_empty() {
        return "none".to_string();
    }
    requirements
        .iter()
        .map(|requirement| {
            requirement
                .schemes
                .iter()
                .map(|(scheme, scopes)| {
                    if scopes.is_empty() {
                        scheme.clone()
                    } else {
                        format!("{scheme}[{}]", scopes.join(","))
                    }
                })
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Routes in match order. Every operation is listed, implemented or not.
pub fn render_routes(contract: &Contract) -> crate::Result<String> {
    let options = RouterFactoryOptions {
        require_security_handlers: false,
        mount_not_implemented_handler: true,
        operation_model_key: None,
    };
    let router = RouterFactory::<()>::new(contract.clone())
        .with_options(options)
        .create_router()?;

    let mut out = String::new();
    for route in router.routes() {
        let Some(operation) = contract.operation(&route.operation_id) else {
            continue;
        };
        let _ = writeln!(out, "{:<7} {}  ({})", route.method.as_str(), operation.path_template, route.operation_id);
        let _ = writeln!(out, "        regex:    {}", route.matcher.regex());
        if !route.tags.is_empty() {
            let _ = writeln!(out, "        tags:     {}", route.tags.join(", "));
        }
        let _ = writeln!(out, "        security: {}", security_label(&operation.security));
        for processor in operation.pipeline.parameters() {
            let _ = writeln!(
                out,
                "        {} {}{}: style={} explode={} strategy={}",
                processor.location,
                processor.name,
                if processor.required { "*" } else { "" },
                processor.style,
                processor.explode,
                processor.strategy,
            );
        }
        for media_type in operation.pipeline.media_types() {
            let _ = writeln!(out, "        body:     {media_type}");
        }
    }
    Ok(out)
}
