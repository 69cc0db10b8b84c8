use std::path::{Path, PathBuf};
use std::process::ExitCode;

use adaptive_practice::config::EngineConfig;
use adaptive_practice::logging::{init_tracing, LogSettings};
use adaptive_practice::mastery::training::{check_data_quality, load_reviews, train_per_user};
use adaptive_practice::TrainingError;

const USAGE: &str = "usage: train-bkt [REVIEWS_JSON] [OUTPUT_DIR]";

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing(&LogSettings::from_env());

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }
    let input = args
        .first()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("reviews.json"));
    let output_dir = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    match run(&input, &output_dir) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, input = %input.display(), "training failed");
            ExitCode::FAILURE
        }
    }
}

fn run(input: &Path, output_dir: &Path) -> Result<(), TrainingError> {
    let config = EngineConfig::from_env();
    let reviews = load_reviews(input)?;

    let report = check_data_quality(&reviews);
    tracing::info!(
        total_reviews = report.total_reviews,
        users = report.unique_users,
        skills = report.unique_skills,
        min_per_skill = report.min_per_skill,
        max_per_skill = report.max_per_skill,
        mean_per_skill = report.mean_per_skill,
        accuracy = report.accuracy,
        "data quality"
    );
    for warning in &report.warnings {
        tracing::warn!("{warning}");
    }
    report.require_trainable()?;

    let output = train_per_user(&reviews, &config.tracer);

    std::fs::create_dir_all(output_dir)?;
    let mastery_path = output_dir.join("mastery_scores.json");
    let params_path = output_dir.join("bkt_params.json");
    std::fs::write(&mastery_path, serde_json::to_vec_pretty(&output.mastery)?)?;
    std::fs::write(&params_path, serde_json::to_vec_pretty(&output.params)?)?;

    tracing::info!(
        trained_users = output.params.len(),
        skipped_users = output.skipped_users.len(),
        mastery = %mastery_path.display(),
        params = %params_path.display(),
        "training complete"
    );
    Ok(())
}
