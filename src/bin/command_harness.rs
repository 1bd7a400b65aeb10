use std::fs::{self, File};

use anyhow::{bail, Context, Result};
use kestrel_commands::cli::HarnessArgs;
use kestrel_commands::config::RunnerConfig;
use kestrel_commands::harness::{load_fixture, run_fixture, HarnessOutput};
use kestrel_commands::logging;

fn main() {
    if let Err(err) = run_cli() {
        eprintln!("[command-harness] error: {err:?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = HarnessArgs::parse_from_env()?;
    if args.help {
        println!("{}", HarnessArgs::usage());
        return Ok(());
    }
    let Some(fixture_path) = &args.fixture else {
        bail!("--fixture <path> is required\n{}", HarnessArgs::usage());
    };

    let mut config = match &args.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };
    let overrides = args.config_overrides();
    if !overrides.is_empty() {
        config.apply_overrides(&overrides);
    }
    logging::init_from_config(&config.logging);
    if !overrides.is_empty() {
        log::info!("[harness] CLI overrides applied: {}", overrides.applied_fields().join(", "));
    }

    let fixture = load_fixture(fixture_path)?;
    let output = run_fixture(&fixture, &config)?;

    if let Some(path) = &args.write_output {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating output directory '{}'", parent.display()))?;
            }
        }
        let file =
            File::create(path).with_context(|| format!("writing harness output to '{}'", path.display()))?;
        serde_json::to_writer_pretty(file, &output).with_context(|| "serializing harness output")?;
        println!("[command-harness] wrote {}", path.display());
    }

    if let Some(path) = &args.golden {
        let file = File::open(path).with_context(|| format!("opening golden file '{}'", path.display()))?;
        let expected: HarnessOutput = serde_json::from_reader(file).with_context(|| "parsing golden JSON")?;
        if expected != output {
            bail!(
                "golden mismatch for {} (use --write-output to refresh):\nexpected: {}\nactual:   {}",
                fixture_path.display(),
                serde_json::to_string(&expected).unwrap_or_default(),
                serde_json::to_string(&output).unwrap_or_default(),
            );
        }
        println!("[command-harness] matched golden {}", path.display());
    } else if args.write_output.is_none() {
        serde_json::to_writer_pretty(std::io::stdout(), &output)?;
        println!();
    }

    Ok(())
}
