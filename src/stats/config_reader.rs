use crate::stats::*;

use serde::{Deserialize, Serialize};
use survey_stats::dependencies::DependencyRule;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(rename = "reportName")]
    pub report_name: String,
    #[serde(rename = "outputPath")]
    pub output_path: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSource {
    pub provider: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "worksheetName")]
    pub worksheet_name: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    pub policy: Option<String>,
    pub baseline: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(rename = "outputSettings")]
    pub output_settings: OutputSettings,
    pub survey: SurveyId,
    #[serde(rename = "catalogPath")]
    pub catalog_path: String,
    #[serde(rename = "storePath")]
    pub store_path: Option<String>,
    #[serde(rename = "answerSources", default)]
    pub answer_sources: Vec<AnswerSource>,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub dependencies: Vec<DependencyRule>,
}

pub fn read_policy(policy: Option<&str>) -> ReportResult<AnswerPolicy> {
    match policy {
        None | Some("total") => Ok(AnswerPolicy::Total),
        Some("last") => Ok(AnswerPolicy::Last),
        Some(x) => whatever!("unknown answer policy: {}", x),
    }
}

pub fn read_baseline(baseline: Option<&str>) -> ReportResult<Baseline> {
    match baseline {
        None | Some("fromZero") => Ok(Baseline::FromZero),
        Some("accumulate") => Ok(Baseline::Accumulate),
        Some(x) => whatever!("unknown baseline: {}", x),
    }
}

pub fn read_reference(path: &str) -> BReportResult<JSValue> {
    let js: JSValue = io_json::read_json_file(path)?;
    let count = js["questionStats"].as_array().map(|l| l.len()).unwrap_or(0);
    debug!("read_reference: {} question stats", count);
    Ok(js)
}
