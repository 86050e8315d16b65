#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use podnn::config::Hyperparameters;
use podnn::dataset::{ReducedDataset, SnapshotDataset};
use podnn::io::{read_matrix, write_matrix};
use podnn::model::PodnnModel;
use podnn::progress::{PipelineStage, ProgressObserver};

#[derive(Parser)]
#[command(
    name = "podnn",
    about = "Reduced-order surrogate models: POD bases with uncertainty-aware neural regression",
    long_about = "Fits a Proper Orthogonal Decomposition basis to high-fidelity snapshots, trains a \
                  neural regressor from parameters to reduced coefficients with an uncertainty \
                  estimate, and predicts physical fields for new parameters."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the basis and train the surrogate
    #[command(about = "Train a POD-NN model (outputs: model directory)")]
    Train {
        /// Path to the hyperparameter record (.toml)
        hyperparams: PathBuf,

        /// Snapshot CSV: one column per sample, one row per degree of freedom
        #[arg(long, required_unless_present = "from_dataset")]
        snapshots: Option<PathBuf>,

        /// Parameter CSV: one row per snapshot column
        #[arg(long, required_unless_present = "from_dataset")]
        params: Option<PathBuf>,

        /// Train on a dataset cache (basis and split) instead of raw CSVs
        #[arg(long, conflicts_with_all = ["snapshots", "params"])]
        from_dataset: Option<PathBuf>,

        /// Output model directory
        #[arg(long)]
        out: PathBuf,

        /// Also write the reduced dataset cache to this file
        #[arg(long)]
        save_dataset: Option<PathBuf>,

        /// Also write the training report (.toml) to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Predict fields for given parameters
    #[command(about = "Apply a trained model (outputs: predicted field CSV)")]
    Predict {
        /// Trained model directory
        #[arg(long)]
        model: PathBuf,

        /// Parameter CSV, one row per prediction
        #[arg(long)]
        params: PathBuf,

        /// Output CSV for the predicted mean field, one column per row of params
        #[arg(long)]
        output: PathBuf,

        /// Output CSV for the predicted spread field
        #[arg(long)]
        sigma: Option<PathBuf>,
    },

    /// Report mean/std errors of a trained model on a cached dataset
    #[command(about = "Evaluate a trained model on the validation and test splits of a dataset cache")]
    Evaluate {
        /// Trained model directory
        #[arg(long)]
        model: PathBuf,

        /// Dataset cache written by `train --save-dataset`
        #[arg(long)]
        dataset: PathBuf,
    },

    /// Sample random parameters from the [hifi] box and aggregate predictions
    #[command(about = "Out-of-sample prediction statistics (outputs: PREFIX_{inputs,mean,std,sigma}.csv)")]
    Hifi {
        /// Trained model directory
        #[arg(long)]
        model: PathBuf,

        /// Prefix of the output CSV files
        #[arg(long)]
        output_prefix: String,

        /// Number of parameter samples (defaults to hifi.n_s_tst)
        #[arg(long)]
        n: Option<usize>,
    },
}

/// Draws one bar per pipeline stage on stderr.
struct BarProgress {
    bar: Option<ProgressBar>,
}

impl BarProgress {
    fn new() -> Self {
        Self { bar: None }
    }
}

impl ProgressObserver for BarProgress {
    fn on_stage_start(&mut self, stage: PipelineStage, total: usize) {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(10)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total as u64), draw_target);
        let style = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.set_message(stage.to_string());
        self.bar = Some(bar);
    }

    fn on_stage_advance(&mut self, _stage: PipelineStage, processed: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(processed as u64);
        }
    }

    fn on_loss(&mut self, epoch: usize, loss: f64) {
        if let Some(bar) = &self.bar {
            if epoch % 10 == 0 {
                bar.set_message(format!("loss {loss:.4e}"));
            }
        }
    }

    fn on_stage_finish(&mut self, stage: PipelineStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!("{stage} done"));
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Train {
            hyperparams,
            snapshots,
            params,
            from_dataset,
            out,
            save_dataset,
            report,
        } => {
            let source: Result<TrainingSource, Box<dyn std::error::Error>> =
                match (from_dataset, snapshots, params) {
                    (Some(cache), _, _) => Ok(TrainingSource::Cache(cache)),
                    (None, Some(snapshots), Some(params)) => {
                        Ok(TrainingSource::Raw { snapshots, params })
                    }
                    _ => Err("either --from-dataset or both --snapshots and --params are required".into()),
                };
            source.and_then(|source| {
                train_command(
                    &hyperparams,
                    &source,
                    &out,
                    save_dataset.as_deref(),
                    report.as_deref(),
                )
            })
        }
        Commands::Predict {
            model,
            params,
            output,
            sigma,
        } => predict_command(&model, &params, &output, sigma.as_deref()),
        Commands::Evaluate { model, dataset } => evaluate_command(&model, &dataset),
        Commands::Hifi {
            model,
            output_prefix,
            n,
        } => hifi_command(&model, &output_prefix, n),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Where `train` takes its snapshots from.
enum TrainingSource {
    Raw { snapshots: PathBuf, params: PathBuf },
    Cache(PathBuf),
}

fn train_command(
    hyperparams_path: &Path,
    source: &TrainingSource,
    out_dir: &Path,
    dataset_cache: Option<&Path>,
    report_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let hp = Hyperparameters::load(hyperparams_path)?;
    let layout = hp.layout()?;
    let mut model = PodnnModel::new(hp)?;
    let mut progress = BarProgress::new();

    let reduced = match source {
        TrainingSource::Raw { snapshots, params } => {
            let snapshots = read_matrix(snapshots)?;
            let params = read_matrix(params)?;
            println!(
                "Loaded {} snapshots of dimension {} and {} parameter rows with {} columns",
                snapshots.ncols(),
                snapshots.nrows(),
                params.nrows(),
                params.ncols()
            );
            let dataset = SnapshotDataset::new(layout, params, snapshots)?;
            model.convert_dataset(&dataset, &mut progress)?
        }
        TrainingSource::Cache(path) => {
            let reduced = model.convert_dataset_cached(path)?;
            println!("Loaded dataset cache {}", path.display());
            reduced
        }
    };
    if let Some(path) = dataset_cache {
        model.save_dataset_cache(&reduced, path)?;
        println!("Dataset cache written to {}", path.display());
    }

    let report = model.train(&reduced, &mut progress)?;
    println!("Final training loss: {:.6e}", report.final_loss);
    print_errors(&model, &reduced)?;
    if let Some(basis) = model.basis() {
        println!(
            "POD truncation error: {:.4e} with {} modes",
            basis.truncation_error(),
            basis.n_modes()
        );
    }

    model.save(out_dir)?;
    println!("Model saved to {}", out_dir.display());
    if let Some(path) = report_path {
        std::fs::write(path, report.to_toml()?)?;
        println!("Training report written to {}", path.display());
    }
    Ok(())
}

/// Prints the mean/std errors of the validation and test splits.
fn print_errors(model: &PodnnModel, data: &ReducedDataset) -> Result<(), Box<dyn std::error::Error>> {
    let splits = [
        ("validation", data.x_val.view(), data.u_val.view()),
        ("test", data.x_test.view(), data.u_test.view()),
    ];
    for (name, x, u) in splits {
        if x.nrows() == 0 {
            continue;
        }
        let e = model.evaluate(x, u)?;
        println!(
            "Relative {name} error: mean {:.4e}, std {:.4e} (overall {:.4e}, MSE {:.4e})",
            e.err_mean, e.err_std, e.relative_error, e.mse
        );
    }
    Ok(())
}

fn evaluate_command(model_dir: &Path, dataset_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let model = PodnnModel::load(model_dir)?;
    let cache = model.load_dataset_cache(dataset_path)?;
    print_errors(&model, &cache.data)
}

fn predict_command(
    model_dir: &Path,
    params_path: &Path,
    output_path: &Path,
    sigma_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let model = PodnnModel::load(model_dir)?;
    let params = read_matrix(params_path)?;
    let (mean, sigma) = model.predict_var(params.view())?;
    write_matrix(output_path, mean.view())?;
    println!(
        "Predicted {} fields, written to {}",
        mean.ncols(),
        output_path.display()
    );
    if let Some(path) = sigma_path {
        write_matrix(path, sigma.view())?;
        println!("Spread written to {}", path.display());
    }
    Ok(())
}

fn hifi_command(
    model_dir: &Path,
    output_prefix: &str,
    n: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let model = PodnnModel::load(model_dir)?;
    let mut progress = BarProgress::new();
    let hifi = model.predict_hifi(n, &mut progress)?;

    write_matrix(
        Path::new(&format!("{output_prefix}_inputs.csv")),
        hifi.inputs.view(),
    )?;
    for (name, field) in [("mean", &hifi.mean), ("std", &hifi.std), ("sigma", &hifi.sigma)] {
        let flat = model.layout().flatten(field.view(), true)?;
        let path = format!("{output_prefix}_{name}.csv");
        write_matrix(Path::new(&path), flat.view())?;
        println!("Wrote {path}");
    }
    Ok(())
}
