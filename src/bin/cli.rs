//! Greyhound CLI - Score, tier and evaluate greyhound races

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

use greyhound::backtesting::{evaluate, EvaluationResult};
use greyhound::data::{load_race_cards, load_race_results};
use greyhound::predictor::{ConditionAdjusted, TrackCondition};
use greyhound::{
    BetCall, Capability, EngineConfig, HeuristicSource, ProbabilitySource, RaceAssessment,
    TableSource, Tier, TieringEngine,
};

#[derive(Parser)]
#[command(name = "greyhound")]
#[command(author, version, about = "Greyhound race scoring and tiering CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to engine configuration JSON (built-in defaults if omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Args)]
struct SourceArgs {
    /// Global model predictions, as NAME=PATH (repeatable)
    #[arg(long = "predictions", value_name = "NAME=PATH")]
    predictions: Vec<String>,

    /// Track-specific model predictions, as NAME=PATH (repeatable)
    #[arg(long = "track-predictions", value_name = "NAME=PATH")]
    track_predictions: Vec<String>,

    /// Track condition for the heuristic source, as TRACK=fast|good|slow|heavy
    #[arg(long = "condition", value_name = "TRACK=CONDITION")]
    conditions: Vec<String>,

    /// Rule-based scoring only; report the ensemble as absent
    #[arg(long)]
    no_ensemble: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Score and tier every race in a file of entry rows
    Score {
        /// JSON array of entry rows
        #[arg(short, long)]
        races: PathBuf,

        /// Print assessments as JSON instead of tables
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        sources: SourceArgs,
    },

    /// Validate a configuration document
    CheckConfig,

    /// Print the built-in default configuration as JSON
    Defaults,

    /// Compare tier calls with actual results
    Evaluate {
        /// JSON array of entry rows
        #[arg(short, long)]
        races: PathBuf,

        /// JSON array of race results
        #[arg(long)]
        results: PathBuf,

        #[command(flatten)]
        sources: SourceArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    match cli.command {
        Commands::Score {
            races,
            json,
            sources,
        } => {
            let config = load_config(cli.config.as_deref())?;
            score_races(config, &races, &sources, json)?;
        }
        Commands::CheckConfig => {
            let config = load_config(cli.config.as_deref())?;
            println!(
                "{} config {} ({} tracks, {} tier rules)",
                "Valid".green().bold(),
                config.version,
                config.tracks.len(),
                config.tiers.rules.len()
            );
        }
        Commands::Defaults => {
            println!("{}", EngineConfig::default().to_json_pretty()?);
        }
        Commands::Evaluate {
            races,
            results,
            sources,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_evaluation(config, &races, &results, &sources)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Arc<EngineConfig>> {
    let config = match path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Invalid config {:?}", path))?,
        None => EngineConfig::default(),
    };
    Ok(Arc::new(config))
}

fn split_pair(arg: &str) -> Result<(&str, &str)> {
    arg.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got {:?}", arg))
}

fn parse_condition(value: &str) -> Result<TrackCondition> {
    match value.to_ascii_lowercase().as_str() {
        "fast" => Ok(TrackCondition::Fast),
        "good" => Ok(TrackCondition::Good),
        "slow" => Ok(TrackCondition::Slow),
        "heavy" => Ok(TrackCondition::Heavy),
        other => Err(anyhow!("unknown track condition {:?}", other)),
    }
}

fn build_sources(args: &SourceArgs) -> Result<Vec<Arc<dyn ProbabilitySource>>> {
    let mut sources: Vec<Arc<dyn ProbabilitySource>> = Vec::new();

    if args.conditions.is_empty() {
        sources.push(Arc::new(HeuristicSource::new()));
    } else {
        let mut adjusted = ConditionAdjusted::new(HeuristicSource::named("heuristic_base"), "heuristic");
        for arg in &args.conditions {
            let (track, condition) = split_pair(arg)?;
            adjusted = adjusted.with_condition(track, parse_condition(condition)?);
        }
        sources.push(Arc::new(adjusted));
    }

    for (args, capability) in [
        (&args.predictions, Capability::Global),
        (&args.track_predictions, Capability::TrackSpecific),
    ] {
        for arg in args {
            let (name, path) = split_pair(arg)?;
            let source = TableSource::from_json_file(name, capability, path)
                .with_context(|| format!("Failed to load predictions for {}", name))?;
            sources.push(Arc::new(source));
        }
    }

    Ok(sources)
}

fn build_engine(config: Arc<EngineConfig>, args: &SourceArgs) -> Result<TieringEngine> {
    if args.no_ensemble {
        return Ok(TieringEngine::new(config));
    }
    let sources = build_sources(args)?;
    Ok(TieringEngine::with_sources(config, &sources))
}

fn assess_file(engine: &TieringEngine, races_path: &Path) -> Result<Vec<RaceAssessment>> {
    let races = load_race_cards(races_path)
        .with_context(|| format!("Failed to load races from {:?}", races_path))?;

    let mut assessments = Vec::with_capacity(races.len());
    for (race, result) in races.iter().zip(engine.assess_all(&races)) {
        match result {
            Ok(assessment) => assessments.push(assessment),
            Err(e) => warn!(track = %race.track, race = race.race_number, "Skipped race: {}", e),
        }
    }
    Ok(assessments)
}

fn tier_label(tier: Tier) -> colored::ColoredString {
    match tier {
        Tier::Lock => tier.name().green().bold(),
        Tier::Tier1 => tier.name().green(),
        Tier::Tier2 => tier.name().cyan(),
        Tier::Tier3 => tier.name().yellow(),
        Tier::NoBet => tier.name().dimmed(),
    }
}

fn score_races(config: Arc<EngineConfig>, races_path: &Path, args: &SourceArgs, json: bool) -> Result<()> {
    let engine = build_engine(config, args)?;
    let assessments = assess_file(&engine, races_path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&assessments)?);
        return Ok(());
    }

    if assessments.is_empty() {
        println!("{}", "No races could be assessed.".red());
        return Ok(());
    }

    for assessment in &assessments {
        print_assessment(assessment);
    }
    Ok(())
}

fn print_assessment(assessment: &RaceAssessment) {
    println!();
    println!(
        "{} R{} {}m ({}) {}",
        assessment.track.yellow().bold(),
        assessment.race_number,
        assessment.distance_m,
        assessment.category,
        tier_label(assessment.tier())
    );

    if let Some(margin) = assessment.classification.margin_percent {
        println!("Margin: {:.1}%", margin);
    }

    println!(
        "{:>4} {:>4} {:<20} {:>8} {:>8} {:>6}",
        "Rank", "Box", "Name", "Score", "Conf", "Call"
    );
    println!("{}", "-".repeat(56));

    for entrant in &assessment.entrants {
        let confidence = entrant
            .ensemble_confidence
            .map(|c| format!("{:.1}%", c))
            .unwrap_or_else(|| "-".to_string());
        let call = match entrant.bet_call {
            BetCall::Win => entrant.bet_call.to_string().green().bold(),
            BetCall::Place => entrant.bet_call.to_string().cyan(),
            BetCall::Pass => entrant.bet_call.to_string().dimmed(),
        };
        let fallback = if entrant.timing_fallback { "*" } else { "" };
        println!(
            "{:>4} {:>4} {:<20} {:>8.2} {:>8} {:>6}",
            entrant.rank,
            entrant.box_no,
            format!("{}{}", entrant.name, fallback),
            entrant.rule_score,
            confidence,
            call
        );
    }

    match (assessment.recommended_box(), assessment.trigger_tier()) {
        (Some(box_no), Some(trigger)) => println!(
            "{} {} on box {}",
            "→".green(),
            trigger.green().bold(),
            box_no
        ),
        _ if !assessment.ensemble_present => {
            println!("{}", "Ensemble unavailable: rule-based tier only".dimmed())
        }
        _ => {
            let reasons: Vec<String> = assessment
                .hybrid
                .no_bet_reasons()
                .iter()
                .map(|r| format!("{:?}", r))
                .collect();
            println!("{} {}", "No hybrid bet:".dimmed(), reasons.join(", ").dimmed());
        }
    }
}

fn run_evaluation(
    config: Arc<EngineConfig>,
    races_path: &Path,
    results_path: &Path,
    args: &SourceArgs,
) -> Result<()> {
    println!("{}", "Running evaluation...".green());

    let engine = build_engine(config, args)?;
    let assessments = assess_file(&engine, races_path)?;
    let results = load_race_results(results_path)
        .with_context(|| format!("Failed to load results from {:?}", results_path))?;

    let evaluation = evaluate(&assessments, &results);
    print_evaluation(&evaluation);
    Ok(())
}

fn print_evaluation(evaluation: &EvaluationResult) {
    println!("\n{}", "=".repeat(60));
    println!("EVALUATION RESULTS");
    println!("{}", "=".repeat(60));
    println!("Total races: {}", evaluation.total_races);
    println!("Races without result: {}", evaluation.unmatched);
    println!(
        "Top pick hit rate: {:.1}% ({}/{})",
        evaluation.overall.hit_rate * 100.0,
        evaluation.overall.hits,
        evaluation.overall.races
    );

    println!("\n{}", "Hit Rate by Tier:".yellow().bold());
    println!("{:>8} {:>8} {:>8} {:>10} {:>10}", "Tier", "Races", "Hits", "Hit Rate", "Avg Score");
    println!("{}", "-".repeat(48));
    for (tier, metrics) in evaluation.by_tier.iter().rev() {
        println!(
            "{:>8} {:>8} {:>8} {:>9.1}% {:>10.2}",
            tier.name(),
            metrics.races,
            metrics.hits,
            metrics.hit_rate * 100.0,
            metrics.avg_score
        );
    }
    println!(
        "{:>8} {:>8} {:>8} {:>9.1}% {:>10.2}",
        "HYBRID",
        evaluation.hybrid.races,
        evaluation.hybrid.hits,
        evaluation.hybrid.hit_rate * 100.0,
        evaluation.hybrid.avg_score
    );

    if !evaluation.by_track.is_empty() {
        println!("\n{}", "Analysis by Track:".yellow().bold());
        println!("{:>20} {:>8} {:>8} {:>10}", "Track", "Races", "Hits", "Hit Rate");
        println!("{}", "-".repeat(50));
        for analysis in &evaluation.by_track {
            println!(
                "{:>20} {:>8} {:>8} {:>9.1}%",
                analysis.key,
                analysis.metrics.races,
                analysis.metrics.hits,
                analysis.metrics.hit_rate * 100.0
            );
        }
    }

    if !evaluation.by_category.is_empty() {
        println!("\n{}", "Analysis by Distance:".yellow().bold());
        for analysis in &evaluation.by_category {
            println!(
                "{:>20} {:>8} {:>8} {:>9.1}%",
                analysis.key,
                analysis.metrics.races,
                analysis.metrics.hits,
                analysis.metrics.hit_rate * 100.0
            );
        }
    }

    println!("{}", "=".repeat(60));
}
