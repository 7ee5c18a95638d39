extern crate log;
extern crate pretty_env_logger;

use std::path::PathBuf;
use std::process::exit;

use clap::{arg, command, value_parser, ArgAction, Command};
use serde_json::json;

use omr_grader::answer_key::{AnswerKeyStore, KeySetName};
use omr_grader::calibrate::calibrate_sheet;
use omr_grader::config::DetectorParams;
use omr_grader::interpret::{interpret_batch, BatchSummary, InterpretOptions};
use omr_grader::score::KeySelection;
use omr_grader::types::SheetShape;

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();
    let debug = matches.get_flag("debug");
    let images: Vec<PathBuf> = matches
        .get_many::<PathBuf>("images")
        .map(|paths| paths.cloned().collect())
        .unwrap_or_default();
    let shape = SheetShape::new(
        matches.get_one::<usize>("questions").copied().unwrap_or(100),
        matches.get_one::<usize>("choices").copied().unwrap_or(4),
    );

    let params = match matches.get_one::<PathBuf>("params") {
        Some(path) => match DetectorParams::from_json_file(path) {
            Ok(params) => params,
            Err(e) => {
                eprintln!("Error loading detector params: {}", e);
                exit(1);
            }
        },
        None => DetectorParams::default(),
    };

    let mut store = AnswerKeyStore::new();
    for path in matches.get_many::<PathBuf>("keys").into_iter().flatten() {
        if let Err(e) = store.load(path) {
            eprintln!("Error loading answer keys: {}", e);
            exit(1);
        }
    }

    let key_selection = match matches.get_one::<String>("set") {
        Some(name) => KeySelection::Named(KeySetName::from(name.clone())),
        None => KeySelection::Auto,
    };

    if let Some(output_path) = matches.get_one::<PathBuf>("calibrate_out") {
        let KeySelection::Named(name) = &key_selection else {
            eprintln!("Error: --calibrate-out requires --set");
            exit(1);
        };
        let key = match store.get(name) {
            Ok(key) => key,
            Err(e) => {
                eprintln!("Error: {}", e);
                exit(1);
            }
        };
        let Some(image) = images.first() else {
            eprintln!("Error: no image to calibrate on");
            exit(1);
        };

        let outcome = match calibrate_sheet(image, shape, &params, key) {
            Ok(outcome) => outcome,
            Err(e) => {
                eprintln!("Error calibrating on {}: {}", image.display(), e);
                exit(1);
            }
        };
        let written = outcome
            .params
            .to_json()
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(output_path, json).map_err(|e| e.to_string()));
        if let Err(e) = written {
            eprintln!("Error writing {}: {}", output_path.display(), e);
            exit(1);
        }
        eprintln!(
            "Calibrated on {}: objective {:.2} -> {:.2} after {} trials, wrote {}",
            image.display(),
            outcome.initial_objective,
            outcome.objective,
            outcome.trials,
            output_path.display()
        );
        return;
    }

    let options = InterpretOptions {
        debug,
        params,
        shape,
        key_selection,
    };

    let results = match interpret_batch(&images, &options, &store) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };
    for (path, result) in images.iter().zip(&results) {
        let line = match result {
            Ok(interpretation) => json!({ "path": path, "interpretation": interpretation }),
            Err(e) => json!({ "path": path, "error": e.to_string() }),
        };
        println!("{}", line);
    }

    let summary = BatchSummary::from_results(&results);
    match summary.mean_percentage {
        Some(mean) => eprintln!(
            "Processed {} sheets, {} failed, mean score {:.1}%",
            summary.processed, summary.failed, mean
        ),
        None => eprintln!(
            "Processed {} sheets, {} failed",
            summary.processed, summary.failed
        ),
    }

    if summary.failed > 0 {
        exit(1);
    }
}

#[allow(clippy::cognitive_complexity)]
fn cli() -> Command {
    command!()
        .arg(
            arg!(-k --keys <PATH> "Answer key store (.json), spreadsheet export (.csv) or workbook (.xlsx)")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Append),
        )
        .arg(arg!(-s --set <NAME> "Answer key set to grade against; auto-detected if omitted"))
        .arg(
            arg!(-q --questions <N> "Number of questions on the sheet")
                .value_parser(value_parser!(usize))
                .default_value("100"),
        )
        .arg(
            arg!(-c --choices <N> "Number of choices per question")
                .value_parser(value_parser!(usize))
                .default_value("4"),
        )
        .arg(
            arg!(-p --params <PATH> "Detector params JSON file")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(calibrate_out: --"calibrate-out" <PATH> "Tune params on the first image and write them here")
                .value_parser(value_parser!(PathBuf))
                .requires("set"),
        )
        .arg(arg!(-d --debug "Write debug images next to each input"))
        .arg(
            arg!(images: <IMAGE> ... "Answer sheet images")
                .value_parser(value_parser!(PathBuf))
                .required(true),
        )
}
