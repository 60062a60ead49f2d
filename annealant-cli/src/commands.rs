//! CLI subcommand handlers.

use annealant_core::training::CheckpointDescriptor;
use annealant_core::{
    AdaptiveController, AnnealantConfig, FileCheckpointStore, JsonlReporter, RunContext,
    RunSummary,
};
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::synthetic::{LogisticModel, MomentumSgd, SyntheticEngine};
use crate::{CheckpointAction, Commands, ConfigAction, TrainArgs};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Train(args) => handle_train(args, workspace).await,
        Commands::Config { action } => handle_config(action, workspace),
        Commands::Checkpoints { action } => handle_checkpoints(action, workspace),
    }
}

impl TrainArgs {
    fn apply(self, config: &mut AnnealantConfig) {
        let training = &mut config.training;
        if let Some(lr) = self.lr {
            training.initial_learning_rate = lr;
        }
        if let Some(decay) = self.decay {
            training.decay_factor = decay;
        }
        if let Some(min) = self.min_epochs {
            training.min_epochs_before_decay = min;
        }
        if let Some(max) = self.max_epochs {
            training.max_epochs = max;
        }
        if let Some(margin) = self.margin {
            training.acceptance_margin = margin;
        }
        if let Some(batch_size) = self.batch_size {
            training.batch_size = batch_size;
        }
        if let Some(print_every) = self.print_every {
            training.print_every = print_every;
        }
        if let Some(dir) = self.checkpoint_dir {
            config.output.checkpoint_dir = dir;
        }
        if let Some(seed) = self.seed {
            config.engine.seed = seed;
        }
    }
}

fn load(workspace: &Path) -> anyhow::Result<AnnealantConfig> {
    annealant_core::load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

/// Cancel the run on the first interrupt. Returns `true` when a second
/// interrupt arrives before the signal stream closes.
async fn watch_interrupts(cancel: CancellationToken, mut signals: mpsc::Receiver<()>) -> bool {
    if signals.recv().await.is_none() {
        return false;
    }
    warn!("interrupt received, stopping after the current batch (press Ctrl-C again to quit now)");
    cancel.cancel();
    signals.recv().await.is_some()
}

async fn handle_train(args: TrainArgs, workspace: &Path) -> anyhow::Result<()> {
    // Flags are applied before validation so they can repair a file value.
    let mut config = annealant_core::read_config(Some(workspace))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    args.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let run_id = RunContext::<LogisticModel, MomentumSgd>::generate_run_id();
    let checkpoint_dir = workspace.join(&config.output.checkpoint_dir);
    let store = FileCheckpointStore::new(&checkpoint_dir, &run_id);
    let reporter = JsonlReporter::new(
        store.run_dir(),
        &workspace.join(&config.output.record_file),
    );
    let run_dir = store.run_dir().to_path_buf();

    let cancel = CancellationToken::new();
    let ctx: RunContext<LogisticModel, MomentumSgd> =
        RunContext::new(run_id, Box::new(store), Box::new(reporter))
            .with_cancellation(cancel.clone());

    let (tx, rx) = mpsc::channel(2);
    let forwarder = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });
    let watcher = tokio::spawn(async move {
        if watch_interrupts(cancel, rx).await {
            error!("second interrupt received, exiting without a final checkpoint");
            std::process::exit(130);
        }
    });

    let engine = SyntheticEngine::build(
        &config.engine,
        config.training.batch_size,
        config.training.initial_learning_rate,
    );
    let controller = AdaptiveController::new(
        config.training.clone(),
        engine.initial,
        engine.executor,
        engine.evaluator,
        engine.batches,
        ctx,
    )?;
    info!(run_dir = %run_dir.display(), "checkpoints and history will be written here");

    let result = controller.run().await;
    forwarder.abort();
    watcher.abort();

    let outcome = result?;
    print_summary(&outcome.summary, &run_dir);
    Ok(())
}

fn print_summary(summary: &RunSummary, run_dir: &Path) {
    println!("Run {} finished: {}", summary.run_id, summary.state);
    println!("  Epochs run:          {}", summary.epochs_run);
    println!(
        "  Accepted / rejected: {} / {}",
        summary.accepted_epochs, summary.rejected_epochs
    );
    match (summary.best_metric, summary.best_epoch) {
        (Some(metric), Some(epoch)) => {
            println!("  Best metric:         {metric:.4} (epoch {epoch})")
        }
        _ => println!("  Best metric:         none"),
    }
    if let (Some(metric), Some(epoch)) = (summary.retained_metric, summary.retained_epoch) {
        if summary.best_epoch != Some(epoch) {
            println!("  Retained metric:     {metric:.4} (epoch {epoch})");
        }
    }
    println!("  Final learning rate: {}", summary.final_learning_rate);
    println!("  Elapsed:             {:.2} min", summary.total_minutes);
    if let Some(best) = &summary.best_checkpoint {
        println!("  Best checkpoint:     {}", best.display());
    }
    println!("  Run directory:       {}", run_dir.display());
    if summary.degraded() {
        println!(
            "  WARNING: {} storage failure(s); on-disk artifacts may be incomplete",
            summary.storage_failures
        );
    }
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    let config = load(workspace)?;
    match action {
        ConfigAction::Show => {
            let toml_str = config
                .to_toml_string()
                .map_err(|e| anyhow::anyhow!("Failed to render config: {}", e))?;
            println!("{}", toml_str);
        }
        ConfigAction::Validate => println!("Configuration is valid."),
    }
    Ok(())
}

fn handle_checkpoints(action: CheckpointAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        CheckpointAction::List { run_dir } => {
            let store = FileCheckpointStore::open(workspace.join(run_dir))?;
            let descriptors = store.descriptors()?;
            if descriptors.is_empty() {
                println!("No checkpoints recorded.");
            }
            for d in &descriptors {
                println!("{}", describe(d));
            }
        }
        CheckpointAction::Best { run_dir } => {
            let store = FileCheckpointStore::open(workspace.join(run_dir))?;
            match store.best()? {
                Some(d) => println!("{}", describe(&d)),
                None => println!("No retained checkpoint in this run."),
            }
        }
        CheckpointAction::Compare {
            run_dir,
            id_a,
            id_b,
        } => {
            let store = FileCheckpointStore::open(workspace.join(run_dir))?;
            println!("{}", store.compare(&id_a, &id_b)?);
        }
    }
    Ok(())
}

fn describe(d: &CheckpointDescriptor) -> String {
    format!(
        "{}  epoch {:>3}  lr {:<10}  metric {:>8.4}  {:<8}  {}",
        d.id,
        d.epoch,
        d.learning_rate,
        d.metric,
        d.verdict.to_string(),
        d.file_name()
    )
}
