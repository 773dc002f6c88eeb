//! Operator CLI for the spam classifier.

use std::path::PathBuf;

use spamshield::config::{self, Settings};
use spamshield::registry::RegistryEntry;
use spamshield::{ClassifyError, Label, SpamShield, logging};

fn main() {
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let Some(options) = parse_args(std::env::args().skip(1).collect())? else {
        return Ok(());
    };
    let settings = match &options.config {
        Some(path) => config::load_from(path),
        None => config::load_or_default(),
    }
    .map_err(|err| err.to_string())?;
    let shield = SpamShield::open(&settings).map_err(|err| err.to_string())?;

    match options.command {
        Command::Train => {
            let accuracy = shield
                .retrain(true)
                .map_err(|err| format!("Training failed: {err}"))?
                .unwrap_or_default();
            println!("Model trained. Test accuracy: {}%", whole_percent(accuracy));
        }
        Command::Add { label, text } => {
            let ticket = shield
                .add_example(label, &text)
                .map_err(|err| format!("Failed to add example: {err}"))?;
            println!("Added {label} example. Retraining...");
            let accuracy = ticket
                .wait()
                .map_err(|err| format!("Retrain failed: {err}"))?
                .unwrap_or_default();
            println!("Model updated. Test accuracy: {}%", whole_percent(accuracy));
        }
        Command::Classify { text } => {
            let probability = shield.spam_probability(&text).map_err(|err| match err {
                ClassifyError::NoModel { .. } => {
                    format!("{err}. Run `spamshield train` first.")
                }
                other => other.to_string(),
            })?;
            let verdict = if spamshield::ml::mlp::is_spam_probability(probability) {
                Label::Spam
            } else {
                Label::Ham
            };
            println!("{verdict} (p_spam = {probability:.4})");
        }
        Command::Status => print_status(&shield, &settings)?,
    }
    Ok(())
}

fn print_status(shield: &SpamShield, settings: &Settings) -> Result<(), String> {
    let status = shield.status().map_err(|err| err.to_string())?;
    println!("dataset:   {}", status.dataset_path.display());
    println!("models:    {}", status.model_dir.display());
    println!("retrain on start: {}", settings.retrain_on_start);
    match status.current {
        Some(entry) => print_entry(&entry),
        None => println!("model:     none published"),
    }
    Ok(())
}

fn print_entry(entry: &RegistryEntry) {
    let trained_at = time::OffsetDateTime::from_unix_timestamp(entry.trained_at)
        .ok()
        .and_then(|at| at.format(&time::format_description::well_known::Rfc3339).ok())
        .unwrap_or_else(|| entry.trained_at.to_string());
    println!("model:     {}", entry.id);
    println!("trained:   {trained_at} on {} examples", entry.examples);
    println!("terms:     {}", entry.vocabulary.len());
    println!(
        "held-out:  accuracy={:.3}  loss={:.4}  spam precision={:.3}  spam recall={:.3}  support={}",
        entry.metrics.accuracy,
        entry.metrics.loss,
        entry.metrics.spam_precision,
        entry.metrics.spam_recall,
        entry.metrics.support
    );
}

fn whole_percent(accuracy: f32) -> u32 {
    (accuracy * 100.0).round() as u32
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Train,
    Add { label: Label, text: String },
    Classify { text: String },
    Status,
}

#[derive(Debug, Clone, PartialEq)]
struct CliOptions {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_args(args: Vec<String>) -> Result<Option<CliOptions>, String> {
    let mut config: Option<PathBuf> = None;
    let mut rest: Vec<String> = Vec::new();

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => {
                println!("{}", help_text());
                return Ok(None);
            }
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                config = Some(PathBuf::from(value));
            }
            _ => {
                rest.extend_from_slice(&args[idx..]);
                break;
            }
        }
        idx += 1;
    }

    let Some((name, operands)) = rest.split_first() else {
        return Err(help_text());
    };
    let command = match name.as_str() {
        "train" => {
            no_operands(name, operands)?;
            Command::Train
        }
        "status" => {
            no_operands(name, operands)?;
            Command::Status
        }
        "add" => {
            let Some((label, words)) = operands.split_first() else {
                return Err("add requires a label (ham or spam) and message text".to_string());
            };
            let label = label.parse::<Label>()?;
            Command::Add {
                label,
                text: message_text(name, words)?,
            }
        }
        "classify" => Command::Classify {
            text: message_text(name, operands)?,
        },
        unknown => return Err(format!("Unknown command: {unknown}\n\n{}", help_text())),
    };
    Ok(Some(CliOptions { config, command }))
}

fn no_operands(name: &str, operands: &[String]) -> Result<(), String> {
    if operands.is_empty() {
        Ok(())
    } else {
        Err(format!("{name} takes no arguments"))
    }
}

fn message_text(name: &str, words: &[String]) -> Result<String, String> {
    let text = words.join(" ");
    if text.trim().is_empty() {
        return Err(format!("{name} requires message text"));
    }
    Ok(text)
}

fn help_text() -> String {
    [
        "spamshield",
        "",
        "Trains and queries the spam classifier.",
        "",
        "Usage:",
        "  spamshield [--config <path>] <command>",
        "",
        "Commands:",
        "  train                     Retrain from the dataset and print test accuracy.",
        "  add <ham|spam> <text...>  Append a labeled example, retrain, print test accuracy.",
        "  classify <text...>        Print the verdict and spam probability.",
        "  status                    Show paths and the published model.",
        "",
        "Options:",
        "  --config <path>   Settings file (default: config.toml in the app directory).",
        "",
        "Environment:",
        "  SPAMSHIELD_HOME          Override the app directory.",
        "  SPAMSHIELD_DATASET_PATH  Override the dataset file.",
        "  RUST_LOG                 Log filter (default: info).",
    ]
    .join("\n")
}
