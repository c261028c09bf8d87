//! Chat Template CLI
//!
//! Usage:
//!   chat-template [OPTIONS] <COMMAND>
//!
//! Commands:
//!   render  Render a JSON conversation with a template
//!   match   Find the catalog entry closest to a template
//!   vars    Print the variables a template references
//!   list    List catalog entries
//!
//! Options:
//!   -c, --config <FILE>  Configuration file (TOML format)
//!   -v, --verbose        Log debug output to stderr
//!   -h, --help           Print help

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chat_template::{Catalog, Config, Error, Template, Values};

#[derive(Parser)]
#[command(name = "chat-template")]
#[command(about = "Render chat conversations into model prompts")]
struct Cli {
    /// Configuration file (TOML format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a JSON conversation (`{"messages": [...], "tools": [...]}`)
    Render {
        /// Template file
        #[arg(short, long, conflicts_with = "named")]
        template: Option<PathBuf>,

        /// Name of a built-in catalog template
        #[arg(short, long)]
        named: Option<String>,

        /// Conversation file (reads from stdin if not provided)
        input: Option<PathBuf>,
    },

    /// Find the catalog entry closest to a template
    Match {
        /// Template file (reads from stdin if not provided)
        file: Option<PathBuf>,
    },

    /// Print the variables a template references
    Vars {
        /// Template file (reads from stdin if not provided)
        file: Option<PathBuf>,
    },

    /// List catalog entries
    List,
}

fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    init_logging(&config, cli.verbose);

    match cli.command {
        Command::Render {
            template,
            named,
            input,
        } => render(&config, template.as_deref(), named.as_deref(), input.as_deref()),
        Command::Match { file } => match_template(&config, file.as_deref()),
        Command::Vars { file } => print_vars(file.as_deref()),
        Command::List => list(),
    }
}

fn init_logging(config: &Config, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("chat_template=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn render(config: &Config, template: Option<&Path>, named: Option<&str>, input: Option<&Path>) {
    let (source, filename) = match (template, named) {
        (Some(path), _) => (read_source(Some(path)), path.display().to_string()),
        (None, Some(name)) => {
            let entry = match catalog().get(name) {
                Some(entry) => entry,
                None => {
                    eprintln!("Error: no catalog template named '{}'", name);
                    std::process::exit(1);
                }
            };
            (entry.source(), format!("{}.gotmpl", name))
        }
        (None, None) => (config.fallback_template.clone(), "<fallback>".to_string()),
    };

    let tmpl = match Template::parse(&source) {
        Ok(t) => t,
        Err(e) => fail(&e, &source, &filename),
    };

    let conversation = read_source(input);
    let values: Values = match serde_json::from_str(&conversation) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error parsing conversation: {}", e);
            std::process::exit(1);
        }
    };

    let mut stdout = io::stdout().lock();
    if let Err(e) = tmpl.execute(&mut stdout, &values) {
        let _ = stdout.flush();
        fail(&e, &source, &filename);
    }
    let _ = stdout.flush();
}

fn match_template(config: &Config, file: Option<&Path>) {
    let source = read_source(file);
    let catalog = catalog();

    match catalog.closest(&source) {
        Some((entry, distance)) if distance < config.match_threshold => {
            println!("{}\t{}", entry.name, distance);
        }
        Some((entry, distance)) => {
            eprintln!(
                "No matching template found (closest: {} at distance {})",
                entry.name, distance
            );
            std::process::exit(1);
        }
        None => {
            eprintln!("No matching template found");
            std::process::exit(1);
        }
    }
}

fn print_vars(file: Option<&Path>) {
    let source = read_source(file);
    match Template::parse(&source) {
        Ok(tmpl) => {
            for var in tmpl.vars() {
                println!("{}", var);
            }
        }
        Err(e) => {
            let filename = file.map_or_else(|| "<stdin>".to_string(), |p| p.display().to_string());
            fail(&e, &source, &filename);
        }
    }
}

fn list() {
    for entry in catalog().entries() {
        println!("{}", entry.name);
    }
}

fn catalog() -> &'static Catalog {
    match Catalog::builtin() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading template catalog: {}", e);
            std::process::exit(1);
        }
    }
}

/// Read a file, or all of stdin when no path is given
fn read_source(path: Option<&Path>) -> String {
    match path {
        Some(path) => match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("Error reading file '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => {
            let mut buffer = String::new();
            match io::stdin().read_to_string(&mut buffer) {
                Ok(_) => buffer,
                Err(e) => {
                    eprintln!("Error reading from stdin: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

fn fail(err: &Error, source: &str, filename: &str) -> ! {
    match err {
        Error::Syntax(errors) => {
            for e in errors {
                eprintln!("{}", e.format(source, filename));
            }
        }
        Error::Execution(e) => eprintln!("Error: {}", e),
    }
    std::process::exit(1);
}
