//! starcomm - Run Starlink applications and print their output parameters
//!
//! Commands:
//! - run <command> <name> [args]: Run an application and decode its parameters
//! - env: Show the environment a session hands to applications
//! - show <file>: Decode an existing parameter container
//! - config: Show or create the configuration file

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use starcomm_core::{Config, Invocation, Output, Session};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "starcomm")]
#[command(about = "Run Starlink applications and read back their output parameters")]
#[command(version)]
#[command(after_help = "\
EXAMPLES:
    starcomm run '$KAPPA_DIR/stats' stats ndf=m31 order=true
    starcomm run --json '$KAPPA_DIR/stats' stats ndf=m31
    starcomm run '$KAPPA_DIR/cmult' cmult m31 -1 m31neg
    starcomm run '$CONVERT_DIR/ndf2fits' ndf2fits in=m31 out=m31.fits
    starcomm run --stdout '$KAPPA_DIR/fitslist' fitslist m31
    starcomm env --json
    starcomm show stats.sdf

ARGUMENTS:
    Tokens containing '=' are passed as name=value keywords; anything else
    is passed positionally, including values such as -1. Positionals
    always precede keywords. Options for run go before the command, since
    everything after the parameter file name is handed to the application.

INSTALLATION:
    The Starlink root comes from --starlink-dir, the config file's
    install_root, or STARLINK_DIR, in that order.

LOGGING:
    Set RUST_LOG (e.g. RUST_LOG=starcomm_core=debug) or pass -v.
    Application stderr is logged at info, stdout at debug.")]
struct Cli {
    /// Configuration file (default: <config dir>/starcomm/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Starlink installation root
    #[arg(long, global = true)]
    starlink_dir: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Starlink application and print its output parameters
    Run {
        /// Command to run; $NAME placeholders are resolved (e.g. '$KAPPA_DIR/stats')
        command: String,

        /// Parameter file name the application writes (e.g. stats)
        name: String,

        /// Positional values and name=value keywords
        #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
        args: Vec<String>,

        /// Print the application's stdout as well
        #[arg(long)]
        stdout: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Kill the application after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show the environment given to applications
    Env {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode a parameter container (.sdf) and print it
    Show {
        /// Container file
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the configuration
    Config {
        /// Write the configuration file with defaults if it does not exist
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = match cli.config.clone() {
        Some(path) => Some(path),
        None => Config::default_path(),
    };
    let mut config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = cli.starlink_dir {
        config.install_root = Some(dir);
    }
    debug!(path = ?config_path, ?config, "configuration loaded");

    match cli.command {
        Commands::Run {
            command,
            name,
            args,
            stdout,
            json,
            timeout,
        } => {
            if timeout.is_some() {
                config.timeout_secs = timeout;
            }
            cmd_run(config, &command, &name, &args, stdout, json)
        }
        Commands::Env { json } => cmd_env(config, json),
        Commands::Show { file, json } => cmd_show(config, &file, json),
        Commands::Config { init } => cmd_config(&config, config_path.as_deref(), init),
    }
}

/// Build an invocation from command-line tokens
fn build_invocation(command: &str, name: &str, tokens: &[String], stdout: bool) -> Result<Invocation> {
    let mut invocation = Invocation::new(command, name).return_stdout(stdout);
    for token in tokens {
        match token.split_once('=') {
            Some((key, _)) if key.is_empty() => bail!("Missing parameter name in '{}'", token),
            Some((key, value)) => invocation = invocation.param(key, value),
            None => invocation = invocation.arg(token.as_str()),
        }
    }
    Ok(invocation)
}

/// Run an application and print what it produced
fn cmd_run(config: Config, command: &str, name: &str, tokens: &[String], stdout: bool, json: bool) -> Result<()> {
    let invocation = build_invocation(command, name, tokens, stdout)?;
    let session = Session::new(config)?;

    let output = session.invoke_and_decode(&invocation)?;
    print_output(&output, json)?;

    session.close()?;
    Ok(())
}

fn print_output(output: &Output, json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({
            "record": output.record,
            "stdout": output.stdout,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if output.is_empty() {
        println!("No output parameters");
        return Ok(());
    }

    if let Some(stdout) = &output.stdout {
        print!("{}", stdout);
    }
    if let Some(record) = &output.record {
        if record.is_empty() {
            println!("{}: no output parameters", record.name());
        } else {
            println!("{}", record);
        }
    }
    Ok(())
}

/// Print the session environment
fn cmd_env(config: Config, json: bool) -> Result<()> {
    let session = Session::new(config)?;
    let env = session.environment();

    if json {
        println!("{}", serde_json::to_string_pretty(env.vars())?);
    } else {
        for (key, value) in env.iter() {
            println!("{}={}", key, value);
        }
    }

    session.close()?;
    Ok(())
}

/// Decode an existing container file
fn cmd_show(config: Config, file: &Path, json: bool) -> Result<()> {
    let session = Session::new(config)?;

    let record = session
        .decode_file(file)?
        .with_context(|| format!("Container not found: {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("{}", record);
    }

    session.close()?;
    Ok(())
}

/// Show (or create) the configuration file
fn cmd_config(config: &Config, path: Option<&Path>, init: bool) -> Result<()> {
    let Some(path) = path else {
        bail!("No configuration directory on this platform; use --config");
    };

    if init {
        if path.exists() {
            println!("info: Config already exists: {}", path.display());
        } else {
            config.save(path)?;
            println!("success: Wrote {}", path.display());
        }
    }

    println!("Path: {}", path.display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use starcomm_core::ParamValue;

    fn tokens(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tokens_split_into_args_and_keywords() {
        let inv = build_invocation(
            "$KAPPA_DIR/stats",
            "stats",
            &tokens(&["m31", "ORDER=true", "title=a=b"]),
            false,
        )
        .unwrap();

        assert_eq!(inv.render_arguments(), vec!["m31", "order=true", "title=a=b"]);
        assert_eq!(
            inv.keywords()[0],
            ("order".to_string(), ParamValue::Text("true".to_string()))
        );
        assert!(!inv.wants_stdout());
    }

    #[test]
    fn test_stdout_flag_and_keyword() {
        let inv = build_invocation("x", "x", &[], true).unwrap();
        assert!(inv.wants_stdout());

        let inv = build_invocation("x", "x", &tokens(&["returnstdout=yes"]), false).unwrap();
        assert!(inv.wants_stdout());
        assert!(inv.render_arguments().is_empty());
    }

    #[test]
    fn test_empty_keyword_name_rejected() {
        assert!(build_invocation("x", "x", &tokens(&["=5"]), false).is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "starcomm", "run", "--json", "$KAPPA_DIR/stats", "stats", "ndf=m31",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { name, args, json, .. } => {
                assert_eq!(name, "stats");
                assert_eq!(args, vec!["ndf=m31"]);
                assert!(json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_accepts_negative_positionals() {
        let cli = Cli::try_parse_from([
            "starcomm", "run", "$KAPPA_DIR/cmult", "cmult", "in", "-1", "-0.5", "out",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { args, .. } => {
                let inv = build_invocation("$KAPPA_DIR/cmult", "cmult", &args, false).unwrap();
                assert_eq!(inv.render_arguments(), vec!["in", "-1", "-0.5", "out"]);
            }
            _ => panic!("expected run"),
        }
    }
}
