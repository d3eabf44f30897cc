mod config_reader;
mod io_common;
mod io_excel;
mod io_json;

use log::{debug, info, warn};

use snafu::{prelude::*, ErrorCompat, Snafu};
use survey_stats::options::OptionDict;
use survey_stats::storage::{Catalog, MemoryStore, StatStore};
use survey_stats::*;

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::stats::config_reader::*;

#[derive(Debug, Snafu)]
pub enum ReportError {
    #[snafu(display("Error opening file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("The excel file has no content"))]
    EmptyExcel {},
    #[snafu(display("Line {lineno}: unexpected cell content {content}"))]
    ExcelWrongCellType { lineno: u64, content: String },
    #[snafu(display("Column {name} is missing from the header"))]
    MissingColumn { name: String },
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing the JSON content"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Error writing file {path}"))]
    WritingJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("The aggregation pass failed"))]
    Pass { source: StatError },
    #[snafu(display("The report differs from the reference {path}"))]
    ReferenceMismatch { path: String },
    #[snafu(display("The configuration file has no parent directory"))]
    MissingParentDir {},

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type ReportResult<T> = Result<T, ReportError>;
pub type BReportResult<T> = Result<T, Box<ReportError>>;

fn read_answers(root_path: &Path, src: &AnswerSource) -> BReportResult<Vec<Answer>> {
    let p: PathBuf = root_path.join(&src.file_path);
    let p2 = p.as_path().display().to_string();
    info!("read_answers: attempting to read {:?}", p2);
    match src.provider.as_str() {
        "json" => io_json::read_json_answers(&p2),
        "xlsx" => io_excel::read_excel_answers(&p2, src),
        x => Err(Box::new(ReportError::Whatever {
            message: format!("Provider not implemented {:?}", x),
            source: None,
        })),
    }
}

fn read_store(path: &Option<String>) -> BReportResult<MemoryStore> {
    match path {
        Some(p) if Path::new(p).exists() => io_json::read_json_file(p),
        Some(p) => {
            info!("read_store: {:?} does not exist yet, starting from an empty store", p);
            Ok(MemoryStore::default())
        }
        None => Ok(MemoryStore::default()),
    }
}

/// Assembles the report of a survey from the stored rows.
pub fn build_report(config: &StatsConfig, store: &MemoryStore) -> JSValue {
    let survey = config.survey;
    let mut survey_stats = store.survey_stats(survey);
    survey_stats.sort_by_key(|s| s.country);
    let mut organization_stats = store.organization_stats(survey);
    organization_stats.sort_by_key(|s| (s.country, s.ordering, s.organization));
    let mut question_stats = store.question_stats(survey);
    question_stats.sort_by_key(|s| (s.country, s.ordering, s.representation));

    let survey_js: Vec<JSValue> = survey_stats
        .iter()
        .map(|s| json!({"country": s.country, "total": s.total, "last": s.last}))
        .collect();
    let organization_js: Vec<JSValue> = organization_stats
        .iter()
        .map(|s| json!({"country": s.country, "organization": s.organization, "total": s.total}))
        .collect();
    let question_js: Vec<JSValue> = question_stats
        .iter()
        .map(|s| {
            json!({
                "country": s.country,
                "representation": s.representation,
                "type": s.kind,
                "vars": s.vars,
            })
        })
        .collect();
    json!({
        "config": {
            "reportName": config.output_settings.report_name,
            "survey": survey,
        },
        "surveyStats": survey_js,
        "organizationStats": organization_js,
        "questionStats": question_js,
    })
}

fn write_json(path: &str, js: &JSValue) -> BReportResult<()> {
    let pretty = serde_json::to_string_pretty(js).context(ParsingJsonSnafu {})?;
    fs::write(path, pretty).context(WritingJsonSnafu { path })?;
    Ok(())
}

pub fn run_pass(
    config_path: String,
    store_path: Option<String>,
    out: Option<String>,
    check_report_path: Option<String>,
    policy: Option<String>,
    baseline: Option<String>,
) -> BReportResult<()> {
    let config_p = Path::new(config_path.as_str());
    let config: StatsConfig = io_json::read_json_file(&config_path)?;
    info!("run_pass: config: {:?}", config);
    let root_p = config_p.parent().context(MissingParentDirSnafu {})?;

    // Flags win over the configuration file.
    let rules = PassRules {
        policy: read_policy(policy.as_deref().or(config.rules.policy.as_deref()))?,
        baseline: read_baseline(baseline.as_deref().or(config.rules.baseline.as_deref()))?,
        dependencies: config.dependencies.clone(),
    };
    let store_p: Option<String> = store_path.or_else(|| {
        config
            .store_path
            .as_ref()
            .map(|p| root_p.join(p).display().to_string())
    });

    let catalog: Catalog =
        io_json::read_json_file(&root_p.join(&config.catalog_path).display().to_string())?;
    let mut store = read_store(&store_p)?;

    if config.answer_sources.is_empty() {
        warn!("run_pass: no answer source, only the stored rows will be refreshed");
    }
    let mut answers: Vec<Answer> = Vec::new();
    for src in config.answer_sources.iter() {
        let mut file_answers = read_answers(root_p, src)?;
        debug!("run_pass: {} answers in {:?}", file_answers.len(), src.file_path);
        answers.append(&mut file_answers);
    }

    let mut options = OptionDict::new(Box::new(catalog.option_source(&store)));
    let count = process_answers(
        &mut store,
        &catalog,
        config.survey,
        &answers,
        &rules,
        &mut options,
    )
    .context(PassSnafu {})?;
    info!("run_pass: {} answers processed", count);

    if let Some(p) = store_p {
        let js = serde_json::to_value(&store).context(ParsingJsonSnafu {})?;
        write_json(&p, &js)?;
        info!("run_pass: store written to {:?}", p);
    }

    let report = build_report(&config, &store);
    let pretty_report = serde_json::to_string_pretty(&report).context(ParsingJsonSnafu {})?;
    let out_p: Option<String> = out.or_else(|| {
        config
            .output_settings
            .output_path
            .as_ref()
            .map(|p| root_p.join(p).display().to_string())
    });
    match out_p.as_deref() {
        Some("stdout") => println!("{}", pretty_report),
        Some(p) => write_json(p, &report)?,
        None => {}
    }

    // The reference report, if provided for comparison
    if let Some(report_p) = check_report_path {
        let report_ref = read_reference(&report_p)?;
        if report_ref != report {
            warn!("run_pass: found differences with the reference report");
            let pretty_ref =
                serde_json::to_string_pretty(&report_ref).context(ParsingJsonSnafu {})?;
            print_diff(pretty_ref.as_str(), pretty_report.as_str(), "\n");
            return Err(Box::new(ReportError::ReferenceMismatch { path: report_p }));
        }
    }

    Ok(())
}

/// Prints an error and its chain of causes.
pub fn print_error(e: &ReportError) {
    eprintln!("An error occured: {}", e);
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        eprintln!("  caused by: {}", s);
        source = std::error::Error::source(s);
    }
    if let Some(bt) = ErrorCompat::backtrace(e) {
        eprintln!("trace: {}", bt);
    }
}

#[cfg(test)]
fn run_report_test(test_name: &str, config_lpath: &str, report_lpath: &str) {
    let test_dir = option_env!("SURVEYSTAT_TEST_DIR")
        .unwrap_or(concat!(env!("CARGO_MANIFEST_DIR"), "/tests"));
    info!("Running test {}", test_name);
    let res = run_pass(
        format!("{}/{}/{}", test_dir, test_name, config_lpath),
        None,
        None,
        Some(format!("{}/{}/{}", test_dir, test_name, report_lpath)),
        None,
        None,
    );
    if let Err(e) = res {
        warn!("Error occured {:?}", e);
        print_error(&e);
        panic!("test {} failed: {}", test_name, e);
    }
}

#[cfg(test)]
pub fn test_wrapper(test_name: &str) {
    run_report_test(
        test_name,
        format!("{}_config.json", test_name).as_str(),
        format!("{}_expected_report.json", test_name).as_str(),
    )
}
