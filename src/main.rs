use clap::{Parser, Subcommand};
use pppcp::auth::secrets::{scan_file, NONWILD_CLIENT, NONWILD_SERVER};
use pppcp::auth::AllowedAddrs;
use pppcp::config;
use pppcp::telemetry::init_logging;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pppcp")]
#[command(about = "PPP control plane: negotiation, authentication and phase sequencing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a configuration file
    CheckConfig {
        /// Path to the configuration file
        #[arg(short, long, default_value = "pppcp.toml")]
        config: PathBuf,

        /// Print the configuration with all defaults filled in
        #[arg(long)]
        effective: bool,
    },
    /// Find the secrets entry used for a client/server pair
    LookupSecret {
        /// Secrets file to scan
        #[arg(short, long)]
        file: PathBuf,

        /// Client name, any client when omitted
        #[arg(long)]
        client: Option<String>,

        /// Server name, any server when omitted
        #[arg(long)]
        server: Option<String>,

        /// Unit number for `+` address offsets
        #[arg(long, default_value_t = 0)]
        unit: u32,
    },
}

fn main() {
    init_logging(None);

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::CheckConfig { config, effective } => cmd_check_config(&config, effective),
        Commands::LookupSecret {
            file,
            client,
            server,
            unit,
        } => cmd_lookup_secret(&file, client.as_deref(), server.as_deref(), unit),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_check_config(path: &PathBuf, effective: bool) -> Result<(), String> {
    println!("Loading {}...", path.display());
    let config = config::load(path).map_err(|e| e.to_string())?;

    let result = config::validate(&config);
    result.print_diagnostics();
    if result.has_errors() {
        return Err(format!(
            "{} error(s) in {}",
            result.errors.len(),
            path.display()
        ));
    }

    // Address strings are only fully checked by building the settings
    config.session_settings().map_err(|e| e.to_string())?;

    if effective {
        let text = config::effective(&config).map_err(|e| e.to_string())?;
        print!("{}", text);
    } else {
        println!("Configuration OK ({} warning(s))", result.warnings.len());
    }
    Ok(())
}

fn cmd_lookup_secret(
    file: &PathBuf,
    client: Option<&str>,
    server: Option<&str>,
    unit: u32,
) -> Result<(), String> {
    let entry = scan_file(file, client, server).map_err(|e| e.to_string())?;
    let Some(entry) = entry else {
        println!("No matching entry");
        return Ok(());
    };

    let specificity = match entry.specificity & (NONWILD_CLIENT | NONWILD_SERVER) {
        0 => "wildcard client and server",
        NONWILD_CLIENT => "exact client, wildcard server",
        NONWILD_SERVER => "wildcard client, exact server",
        _ => "exact client and server",
    };
    println!("client:      {}", entry.client);
    println!("server:      {}", entry.server);
    println!("match:       {}", specificity);
    if entry.is_login() {
        println!("secret:      checked against the system login database");
    }

    if entry.addrs.is_empty() {
        println!("addresses:   (none listed)");
    } else {
        println!("addresses:   {}", entry.addrs.join(" "));
        match AllowedAddrs::parse(&entry.addrs, unit).and_then(|allowed| allowed.suggested()) {
            Some(suggested) => println!("suggested:   {}", suggested),
            None => println!("suggested:   (none)"),
        }
    }
    if !entry.options.is_empty() {
        println!("options:     {}", entry.options.join(" "));
    }
    Ok(())
}
