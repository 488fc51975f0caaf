use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use microgate::condition::{Conditions, Environment, EnvironmentEvaluator};
use microgate::config::loader::{load_config, ConfigError};
use microgate::routing::{normalize_path, CompiledPattern, MiddlePart, UNBOUNDED};

#[derive(Parser)]
#[command(name = "mask-cli")]
#[command(about = "Inspect gateway URL masks and configuration files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the compiled form of a mask
    Compile { mask: String },
    /// Match a path against a mask and print the captures
    Match {
        mask: String,
        path: String,
        /// Request variable for condition slots, as NAME=VALUE
        #[arg(short, long = "var")]
        vars: Vec<String>,
        /// Fold case for masks without a case modifier
        #[arg(short, long)]
        insensitive: bool,
    },
    /// Validate a configuration file and report every error
    Check { config: PathBuf },
}

fn describe(part: &MiddlePart) -> String {
    let bound = |n: usize| if n == UNBOUNDED { "inf".to_string() } else { n.to_string() };
    match part {
        MiddlePart::Literal(text) => format!("literal {:?}", text),
        MiddlePart::Wildcard { min, max, slash_aware } => format!(
            "wildcard [{}, {}]{}",
            min,
            bound(*max),
            if *slash_aware { " within segment" } else { "" }
        ),
        MiddlePart::Regex(re) => format!("regex {:?}", re.as_str()),
        MiddlePart::Named(name) if name.is_empty() => "capture (anonymous)".to_string(),
        MiddlePart::Named(name) => format!("capture {:?}", name),
        MiddlePart::Condition(expr) => format!("condition {:?}", expr),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile { mask } => {
            let pattern = CompiledPattern::compile(&mask);
            println!("source:    {}", pattern.source());
            println!("negative:  {}", pattern.is_negative());
            println!("case:      {:?}", pattern.case_sensitivity());
            println!("prefix:    {:?}", pattern.fixed_prefix());
            println!("suffix:    {:?}", pattern.fixed_suffix());
            for (i, part) in pattern.middle().iter().enumerate() {
                println!("part {}:    {}", i, describe(part));
            }
        }
        Commands::Match {
            mask,
            path,
            vars,
            insensitive,
        } => {
            let mut env = Environment::new();
            for var in vars {
                let (name, value) = var
                    .split_once('=')
                    .ok_or_else(|| format!("variable '{}' is not NAME=VALUE", var))?;
                env.insert(name.to_string(), value.to_string());
            }
            let pattern = CompiledPattern::compile(&mask);
            let path = normalize_path(&path);
            let conditions = Conditions::new(&EnvironmentEvaluator, &env);
            match pattern.matches(&path, insensitive, conditions) {
                Some(trace) => {
                    println!("match: {}", path);
                    let captures: BTreeMap<String, String> = trace.captures(&path).into_iter().collect();
                    for (key, value) in captures {
                        println!("  {} = {:?}", key, value);
                    }
                }
                None => {
                    println!("no match: {}", path);
                    std::process::exit(1);
                }
            }
        }
        Commands::Check { config } => match load_config(&config) {
            Ok(parsed) => {
                println!(
                    "{}: ok ({} host servers)",
                    config.display(),
                    parsed.host_servers.len()
                );
            }
            Err(ConfigError::Validation(errors)) => {
                eprintln!("{}: {} error(s)", config.display(), errors.len());
                for error in errors {
                    eprintln!("  {}", error);
                }
                std::process::exit(1);
            }
            Err(e) => return Err(e.into()),
        },
    }
    Ok(())
}
