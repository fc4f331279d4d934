// Main CLI entrypoint
// (c) 2024 Ross Younger

use std::{
    io::{BufRead, BufReader},
    path::Path,
    process::ExitCode,
};

use anstream::println;
use anyhow::{Context as _, Result};
use clap::Parser as _;
use owo_colors::OwoColorize as _;
use rand::{rngs::StdRng, SeedableRng as _};
use serde::Serialize;
use tabled::{settings::style::Style, Table, Tabled};
use tracing::{info, warn};

use super::{
    args::{CliArgs, Command, MeasurementArgs, ParameterArgs},
    store::PolicyStore,
    styles::{HEADING_S, INFO_S},
};
use crate::{
    config::{Configuration, Manager},
    optimizer::Optimizer,
    policy::{simulate::train_on_simulated, PolicyModel},
    tunnel::{Measurement, ParameterSet},
    util::setup_tracing,
};

/// Main CLI entrypoint
pub fn cli() -> Result<ExitCode> {
    let args = CliArgs::parse();
    if args.config_files {
        println!("{:?}", Manager::config_files());
        return Ok(ExitCode::SUCCESS);
    }

    let trace_level = if args.debug {
        "trace"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };
    setup_tracing(trace_level, args.log_file.as_deref()).inspect_err(|e| eprintln!("{e:?}"))?;

    let mut manager = Manager::new();
    if let Some(file) = &args.config {
        manager.merge_toml_file(file);
    }
    manager.merge_provider(args.overrides.clone());
    if args.show_config {
        println!("{}", manager.to_display_adapter::<Configuration>(true));
        return Ok(ExitCode::SUCCESS);
    }

    let Some(command) = args.command.clone() else {
        eprintln!("No command given. Try --help.");
        return Ok(ExitCode::FAILURE);
    };

    manager
        .configuration()
        .and_then(|config| run(&args, command, &config))
        .map(|()| ExitCode::SUCCESS)
        .or_else(|e| {
            tracing::error!("{e:#}");
            Ok(ExitCode::FAILURE)
        })
}

fn run(args: &CliArgs, command: Command, config: &Configuration) -> Result<()> {
    let model = config.analytical_model();
    match command {
        Command::Predict {
            measurement,
            parameters,
        } => {
            let (m, p) = inputs(measurement, parameters);
            m.validate()?;
            let prediction = model.evaluate(&p, &m);
            if let Some(e) = prediction.instability(model.raw_utilisation(p.mtu())) {
                warn!("{e}");
            }
            output(args.json, &prediction, || {
                println!("{}: {p}", "Configuration".style(HEADING_S));
                println!("{}", prediction.summary());
            })
        }
        Command::Recommend {
            measurement,
            parameters,
        } => {
            let (m, p) = inputs(measurement, parameters);
            m.validate()?;
            let rec = model.recommend(&m, &p);
            output(args.json, &rec, || {
                println!("{}: {}", "Recommended".style(HEADING_S), rec.parameters);
                println!("MTU direction: {}", rec.direction);
                println!("{}", rec.prediction.summary());
                println!(
                    "Predicted score {:.3} versus {:.3} now",
                    rec.prediction.score.style(INFO_S),
                    rec.baseline.score
                );
            })
        }
        Command::Report {
            measurement,
            parameters,
        } => {
            let (m, p) = inputs(measurement, parameters);
            m.validate()?;
            let report = model.report(&m, &p);
            output(args.json, &report, || println!("{report}"))
        }
        Command::Evaluate { measurement } => {
            let m = Measurement::from(measurement);
            m.validate()?;
            let store = PolicyStore::new(&config.model_file)?;
            let policy = PolicyModel::restore_or_new(store.load()?.as_deref(), config.policy());
            let values = policy.evaluate(&m.state());
            output(args.json, &values, || {
                let rows = values.pairs().map(|(action, value)| ActionRow {
                    action: action.to_string(),
                    value: format!("{value:.4}"),
                    chosen: if action == values.best() { "*" } else { "" }.into(),
                });
                println!("{}", Table::new(rows).with(Style::sharp()));
                println!("{}", policy.diagnostics());
            })
        }
        Command::Train { episodes } => {
            let store = PolicyStore::new(&config.model_file)?;
            let mut policy = PolicyModel::restore_or_new(store.load()?.as_deref(), config.policy());
            let mut rng = StdRng::seed_from_u64(config.seed);
            let summary = train_on_simulated(&mut policy, &model, episodes, &mut rng);
            store.save(&policy.serialize()?)?;
            info!("saved policy to {}", store.path().display());
            let diagnostics = policy.diagnostics();
            output(args.json, &(&summary, &diagnostics), || {
                println!(
                    "{}: {episodes} episodes, {} transitions accepted, {} rejected",
                    "Trained".style(HEADING_S),
                    summary.accepted,
                    summary.rejected
                );
                if let Some(r) = summary.trailing_mean(10) {
                    println!("Trailing mean reward {r:.3}");
                }
                println!("{diagnostics}");
            })
        }
        Command::Decide {
            input,
            no_explore,
            parameters,
        } => decide(args, config, input.as_deref(), no_explore, parameters),
    }
}

fn decide(
    args: &CliArgs,
    config: &Configuration,
    input: Option<&Path>,
    no_explore: bool,
    parameters: ParameterArgs,
) -> Result<()> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(std::io::stdin().lock()),
    };

    let store = PolicyStore::new(&config.model_file)?;
    let policy = PolicyModel::restore_or_new(store.load()?.as_deref(), config.policy());
    let mut optimizer = Optimizer::new(config.analytical_model(), policy)
        .exploring(!no_explore)
        .smoothing(config.smoothing_window);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut current = ParameterSet::from(parameters);

    for (n, line) in reader.lines().enumerate() {
        let line = line.context("reading measurements")?;
        if line.trim().is_empty() {
            continue;
        }
        let measurement: Measurement = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(e) => {
                warn!("line {}: {e}; skipped", n + 1);
                continue;
            }
        };
        let decision = optimizer.cycle(&measurement, &current, &mut rng);
        if args.json {
            println!("{}", serde_json::to_string(&decision)?);
        } else {
            println!("{decision}");
        }
        current = decision.parameters;
    }

    let policy = optimizer.into_policy();
    info!("{}", policy.diagnostics());
    store.save(&policy.serialize()?)?;
    Ok(())
}

fn inputs(measurement: MeasurementArgs, parameters: ParameterArgs) -> (Measurement, ParameterSet) {
    (measurement.into(), parameters.into())
}

/// Emits `value` as JSON, or runs the human-readable printer
fn output<T: Serialize + ?Sized, F: FnOnce()>(json: bool, value: &T, human: F) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human();
    }
    Ok(())
}

#[derive(Tabled)]
struct ActionRow {
    action: String,
    value: String,
    chosen: String,
}

#[cfg(test)]
mod test {
    use clap::Parser as _;

    use super::{decide, run};
    use crate::{
        cli::args::{CliArgs, Command},
        config::Configuration,
        error::OptimizerError,
    };

    #[test]
    fn predict_rejects_invalid_measurement() {
        let args =
            CliArgs::try_parse_from(["wgtune", "predict", "-t", "1.2", "-L", "NaN", "-p", "0.01"])
                .unwrap();
        let command = args.command.clone().unwrap();
        let err = run(&args, command, &Configuration::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OptimizerError>(),
            Some(OptimizerError::InvalidMeasurement {
                field: "latency_ms",
                ..
            })
        ));
    }

    #[test]
    fn decide_follows_the_configured_seed() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("measurements.jsonl");
        let line = "{\"throughput_mbps\":1.1,\"latency_ms\":85,\"loss_fraction\":0.06}\n";
        std::fs::write(&input, line.repeat(8)).unwrap();

        let decide_into = |name: &str| {
            let model_file = dir.path().join(name);
            let config = Configuration {
                model_file: model_file.to_string_lossy().into_owned(),
                seed: 42,
                ..Configuration::default()
            };
            let args = CliArgs::try_parse_from(["wgtune", "decide"]).unwrap();
            let Some(Command::Decide { parameters, .. }) = args.command.clone() else {
                panic!("wrong subcommand");
            };
            decide(&args, &config, Some(input.as_path()), false, parameters).unwrap();
            std::fs::read(model_file).unwrap()
        };
        assert_eq!(decide_into("a.json"), decide_into("b.json"));
    }
}
