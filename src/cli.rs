//! CLI definitions and command routing.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::configs::ConfigRegistry;
use crate::endpoint::DynamicHttpEndpoint;
use crate::environment::{ConfigureFlags, EnvVars, EnvironmentFactory, Fingerprint};
use crate::layout::Layout;
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "tsqa")]
#[command(about = "Build, configure and run isolated proxy environments for integration tests")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build or reuse cached proxy installs (fingerprint, create)
    Env {
        #[command(subcommand)]
        cmd: EnvCmd,
    },

    /// Read and edit config files of an environment (list, get, set)
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },

    /// Run a dynamic HTTP endpoint in the foreground
    Endpoint {
        /// Port to bind on 127.0.0.1 (0 picks a free port)
        #[arg(long, default_value_t = 0)]
        port: u16,
    },
}

#[derive(Args, Clone)]
pub struct BuildParams {
    /// Configure flag, `name` or `name=value` (repeatable)
    #[arg(long = "configure", value_name = "FLAG")]
    pub configure: Vec<String>,
    /// Build environment variable `KEY=VALUE` (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,
}

impl BuildParams {
    fn parse(&self) -> Result<(ConfigureFlags, EnvVars)> {
        let flags = self
            .configure
            .iter()
            .fold(ConfigureFlags::new(), |f, a| f.parse_arg(a));
        let mut env = EnvVars::new();
        for pair in &self.env {
            env = env
                .parse_pair(pair)
                .with_context(|| format!("expected KEY=VALUE, got {pair:?}"))?;
        }
        Ok((flags, env))
    }
}

#[derive(Subcommand)]
pub enum EnvCmd {
    /// Print the cache fingerprint for a set of build parameters
    Fingerprint(BuildParams),
    /// Build (or reuse) and copy an environment; prints its prefix
    Create(BuildParams),
}

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// List config files in the environment's sysconfdir
    List { prefix: PathBuf },
    /// Print a value (for records.config the section is the directive, e.g. CONFIG)
    Get {
        prefix: PathBuf,
        file: String,
        section: String,
        key: String,
    },
    /// Set a value and write the file back
    Set {
        prefix: PathBuf,
        file: String,
        section: String,
        key: String,
        value: String,
    },
}

/// Run CLI and dispatch to handlers.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::logging::init();

    match cli.command {
        Commands::Env { cmd } => cmd_env(cmd),
        Commands::Config { cmd } => cmd_config(cmd),
        Commands::Endpoint { port } => cmd_endpoint(port),
    }
}

fn cmd_env(cmd: EnvCmd) -> Result<()> {
    match cmd {
        EnvCmd::Fingerprint(params) => {
            let (flags, env) = params.parse()?;
            println!("{}", Fingerprint::compute(&flags, &env));
            Ok(())
        }
        EnvCmd::Create(params) => {
            let (flags, env) = params.parse()?;
            let settings = Settings::load()?;
            let factory = EnvironmentFactory::from_settings(&settings);
            let environment = factory.get_environment(&flags, &env)?;
            println!("{}", environment.layout.prefix.display());
            Ok(())
        }
    }
}

fn scan(prefix: &std::path::Path) -> Result<ConfigRegistry> {
    let layout = Layout::new(prefix);
    Ok(ConfigRegistry::scan(&layout.sysconfdir)?)
}

fn cmd_config(cmd: ConfigCmd) -> Result<()> {
    match cmd {
        ConfigCmd::List { prefix } => {
            let registry = scan(&prefix)?;
            for name in registry.names() {
                let kind = match registry.get(name) {
                    Some(cfg) if cfg.is_records() => "records",
                    _ => "generic",
                };
                println!("{name}\t{kind}");
            }
            Ok(())
        }
        ConfigCmd::Get {
            prefix,
            file,
            section,
            key,
        } => {
            let registry = scan(&prefix)?;
            let cfg = registry
                .get(&file)
                .with_context(|| format!("no config file {file:?}"))?;
            println!("{}", cfg.get(&section, &key)?);
            Ok(())
        }
        ConfigCmd::Set {
            prefix,
            file,
            section,
            key,
            value,
        } => {
            let mut registry = scan(&prefix)?;
            let cfg = registry
                .get_mut(&file)
                .with_context(|| format!("no config file {file:?}"))?;
            cfg.set_str(&section, &key, &value)?;
            cfg.write()?;
            println!("Set [{section}] {key} in {file}");
            Ok(())
        }
    }
}

fn cmd_endpoint(port: u16) -> Result<()> {
    let mut endpoint = DynamicHttpEndpoint::new(port);
    endpoint.start()?;
    let addr = endpoint.wait_ready(std::time::Duration::from_secs(10))?;
    println!("Endpoint listening on http://{addr}");
    endpoint.join();
    Ok(())
}
