use sparsedict::utils::patches::{load_grayscale, remove_dc, sample_patches};
use sparsedict::utils::visualize::{display_grid, save_grid_png};
use sparsedict::utils::{load_patches, save_state, MetricsLogger, TrainingState};
use sparsedict::{Dictionary, DictionaryInit, PatchBatch, TrainConfig, TrainStatus, Trainer};
use std::env;
use std::error::Error;
use std::path::PathBuf;

const USAGE: &str = "usage: sparse_coding (--images a.png,b.png | --patches state.bin) [--config run.toml] \
[--patch-size 8] [--num-patches 10000] [--keep-dc] [--atoms 64] [--init gaussian|patches] [--seed 0] \
[--out state.bin] [--grid atoms.png] [--grid-rows R] [--metrics metrics.jsonl]";

/// Command line options. Everything except the patch source has a default.
#[derive(Debug)]
struct CliArgs {
    config: Option<PathBuf>,
    images: Vec<PathBuf>,
    patches: Option<PathBuf>,
    patch_size: usize,
    num_patches: usize,
    keep_dc: bool,
    atoms: usize,
    init: DictionaryInit,
    seed: Option<u64>,
    out: PathBuf,
    grid: Option<PathBuf>,
    grid_rows: Option<usize>,
    metrics: Option<PathBuf>,
}

fn value<I: Iterator<Item = String>>(args: &mut I, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("{flag} expects a value"))
}

fn number<T: std::str::FromStr, I: Iterator<Item = String>>(args: &mut I, flag: &str) -> Result<T, String> {
    let raw = value(args, flag)?;
    raw.parse().map_err(|_| format!("{flag}: '{raw}' is not a valid number"))
}

fn parse_cli<I>(mut args: I) -> Result<CliArgs, String>
where
    I: Iterator<Item = String>,
{
    let mut cli = CliArgs {
        config: None,
        images: Vec::new(),
        patches: None,
        patch_size: 8,
        num_patches: 10_000,
        keep_dc: false,
        atoms: 64,
        init: DictionaryInit::default(),
        seed: None,
        out: PathBuf::from("sparse_coding.bin"),
        grid: Some(PathBuf::from("atoms.png")),
        grid_rows: None,
        metrics: None,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => cli.config = Some(value(&mut args, &arg)?.into()),
            "--images" => {
                cli.images = value(&mut args, &arg)?
                    .split(',')
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            }
            "--patches" => cli.patches = Some(value(&mut args, &arg)?.into()),
            "--patch-size" => cli.patch_size = number(&mut args, &arg)?,
            "--num-patches" => cli.num_patches = number(&mut args, &arg)?,
            "--keep-dc" => cli.keep_dc = true,
            "--atoms" => cli.atoms = number(&mut args, &arg)?,
            "--init" => {
                cli.init = value(&mut args, &arg)?
                    .parse::<DictionaryInit>()
                    .map_err(|e| e.to_string())?
            }
            "--seed" => cli.seed = Some(number(&mut args, &arg)?),
            "--out" => cli.out = value(&mut args, &arg)?.into(),
            "--grid" => cli.grid = Some(value(&mut args, &arg)?.into()),
            "--no-grid" => cli.grid = None,
            "--grid-rows" => cli.grid_rows = Some(number(&mut args, &arg)?),
            "--metrics" => cli.metrics = Some(value(&mut args, &arg)?.into()),
            "-h" | "--help" => return Err(USAGE.to_string()),
            other => return Err(format!("unknown argument '{other}'\n{USAGE}")),
        }
    }

    if cli.images.is_empty() == cli.patches.is_none() {
        return Err(format!("exactly one of --images or --patches is required\n{USAGE}"));
    }
    Ok(cli)
}

fn load_batch(cli: &CliArgs, seed: u64) -> Result<PatchBatch, Box<dyn Error>> {
    if let Some(path) = &cli.patches {
        log::info!("loading patches from {}", path.display());
        return Ok(load_patches(path)?);
    }
    let images = cli
        .images
        .iter()
        .map(load_grayscale)
        .collect::<Result<Vec<_>, _>>()?;
    let batch = sample_patches(&images, cli.patch_size, cli.num_patches, seed)?;
    log::info!(
        "sampled {} patches of {}x{} from {} images",
        batch.num_patches(),
        cli.patch_size,
        cli.patch_size,
        images.len()
    );
    if cli.keep_dc {
        Ok(batch)
    } else {
        Ok(remove_dc(&batch)?)
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = match parse_cli(env::args().skip(1)) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    let mut config = match &cli.config {
        Some(path) => TrainConfig::from_path(path)?,
        None => TrainConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }

    let batch = load_batch(&cli, config.seed)?;
    let initial = Dictionary::initialize(cli.init, &batch, cli.atoms, config.seed)?;

    let mut trainer = Trainer::new(config);
    if let Some(path) = &cli.metrics {
        trainer = trainer.with_callback(MetricsLogger::new(path)?);
    }
    let outcome = trainer.run(&batch, initial)?;

    println!(
        "{} after {} iterations, objective {:.6}, sparsity {:.4}, {} atoms re-seeded",
        outcome.status,
        outcome.iterations(),
        outcome.final_objective().unwrap_or(f64::NAN),
        outcome.codes.sparsity(),
        outcome.total_reseeds,
    );
    if outcome.status == TrainStatus::MaxIterReached {
        log::warn!("iteration ceiling reached before convergence");
    }

    if let Some(path) = &cli.grid {
        let grid = display_grid(outcome.dictionary.atoms().view(), cli.grid_rows)?;
        save_grid_png(&grid, path)?;
    }

    let state = TrainingState {
        dictionary: Some(outcome.dictionary),
        codes: Some(outcome.codes),
        patches: Some(batch),
    };
    save_state(&cli.out, &state)?;
    println!("saved state to {}", cli.out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn parses_flags() {
        let cli = parse_cli(args(&["--images", "a.png,b.png", "--atoms", "100", "--init", "patches", "--no-grid"])).unwrap();
        assert_eq!(cli.images, vec![PathBuf::from("a.png"), PathBuf::from("b.png")]);
        assert_eq!(cli.atoms, 100);
        assert_eq!(cli.init, DictionaryInit::Patches);
        assert!(cli.grid.is_none());
        assert_eq!(cli.patch_size, 8);
    }

    #[test]
    fn requires_exactly_one_source() {
        assert!(parse_cli(args(&[])).is_err());
        assert!(parse_cli(args(&["--images", "a.png", "--patches", "p.bin"])).is_err());
        assert!(parse_cli(args(&["--patches", "p.bin"])).is_ok());
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = parse_cli(args(&["--patches", "p.bin", "--atoms", "many"])).unwrap_err();
        assert!(err.contains("--atoms"));
    }
}
