//! Turns the raw aggregate of a question stat into chart-ready vars.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;
use serde_json::Value as JSValue;

use crate::config::*;
use crate::options::OptionDict;
use crate::reducers::{AveragePercentData, MultiselectTopData, QuestionData, YesNoData};

// ******** Reference data *********

/// The reference catalog, as seen by the presentation builder.
pub trait ReferenceSource {
    fn regions(&self, country: CountryId) -> Vec<Region>;
    /// All the organizations, ordered for reports.
    fn organizations(&self) -> Vec<Organization>;
    /// The countries of a survey that are used in reports.
    fn reportable_countries(&self, survey: SurveyId) -> Vec<Country>;
}

/// Read-through cache over a reference source.
pub struct ReferenceCache<'a> {
    source: &'a dyn ReferenceSource,
    regions: BTreeMap<CountryId, Vec<Region>>,
    countries: BTreeMap<SurveyId, Vec<Country>>,
    organizations: Option<Vec<Organization>>,
}

impl<'a> ReferenceCache<'a> {
    pub fn new(source: &'a dyn ReferenceSource) -> ReferenceCache<'a> {
        ReferenceCache {
            source,
            regions: BTreeMap::new(),
            countries: BTreeMap::new(),
            organizations: None,
        }
    }

    pub fn clear(&mut self) {
        self.regions.clear();
        self.countries.clear();
        self.organizations = None;
    }

    pub fn regions(&mut self, country: CountryId) -> &[Region] {
        let source = self.source;
        self.regions
            .entry(country)
            .or_insert_with(|| source.regions(country))
    }

    pub fn reportable_countries(&mut self, survey: SurveyId) -> &[Country] {
        let source = self.source;
        self.countries
            .entry(survey)
            .or_insert_with(|| source.reportable_countries(survey))
    }

    pub fn organizations(&mut self) -> &[Organization] {
        let source = self.source;
        self.organizations
            .get_or_insert_with(|| source.organizations())
    }

    // (key, label) of the rows of the regional breakdown.
    fn breakdown(&mut self, survey: SurveyId, scope: CountryScope) -> Vec<(String, String)> {
        match scope {
            CountryScope::Global => self
                .reportable_countries(survey)
                .iter()
                .map(|c| (c.id.to_string(), c.name.clone()))
                .collect(),
            CountryScope::Specific(cid) => self
                .regions(cid)
                .iter()
                .map(|r| (r.id.to_string(), r.name.clone()))
                .collect(),
        }
    }

    fn organization_rows(&mut self) -> Vec<(String, String)> {
        self.organizations()
            .iter()
            .map(|o| (o.id.to_string(), o.name.clone()))
            .collect()
    }
}

// ******** Vars *********

const HEADER_GLOBAL: &str = "BY COUNTRY";
const HEADER_COUNTRY: &str = "BY REGION";
const OTHER_LABEL: &str = "Other";
const PIE_SLICES: usize = 4;
const PIE_TOP: usize = 3;
const TABLE_ROWS: usize = 10;

#[derive(Serialize)]
struct Unavailable {
    available: bool,
}

#[derive(Serialize, Debug)]
struct AveragePercentVars {
    available: bool,
    region_header: &'static str,
    bar_labels: Vec<String>,
    bar_series: Vec<i64>,
    bar_series_meta: Vec<u64>,
    org_labels: Vec<String>,
    org_series: Vec<i64>,
    org_series_meta: Vec<u64>,
    pie_labels: Vec<String>,
    pie_data: Vec<i64>,
}

#[derive(Serialize, Debug)]
struct YesNoVars {
    available: bool,
    region_header: &'static str,
    bar_labels: Vec<String>,
    /// (yes, no) per region.
    bar_series: Vec<(i64, i64)>,
    org_labels: Vec<String>,
    org_series: Vec<(i64, i64)>,
    pie_labels: Vec<String>,
    pie_data: Vec<u64>,
}

#[derive(Serialize, PartialEq, Debug, Clone)]
pub struct PieVars {
    pub labels: Vec<String>,
    pub data: Vec<u64>,
    pub hide_last_legend_item: bool,
}

/// One option of a top-K table: (count, label, percentage).
pub type TableRow = (u64, String, f64);

#[derive(Serialize, PartialEq, Debug, Clone)]
pub struct TopVars {
    pub pie: PieVars,
    pub table: Vec<TableRow>,
    /// The label of each table row, with the percentage of every organization.
    pub org_table: Vec<(String, Vec<f64>)>,
}

#[derive(Serialize, Debug)]
struct MultiselectTopVars {
    available: bool,
    region_header: &'static str,
    org_labels: Vec<String>,
    top1: TopVars,
    top3: TopVars,
}

fn encode<T: Serialize>(vars: &T) -> StatResult<JSValue> {
    serde_json::to_value(vars).map_err(|e| StatError::Encoding {
        reason: e.to_string(),
    })
}

fn round_mean(sum: f64, cnt: u64) -> i64 {
    (sum / cnt as f64).round_ties_even() as i64
}

/// Builds the vars of a question stat.
///
/// The result only depends on the data of the stat, the labels of its
/// representation and the reference data. An empty aggregate gives
/// `{"available": false}`.
pub fn build_vars(
    stat: &QuestionStat,
    representation: &Representation,
    refs: &mut ReferenceCache,
    options: &mut OptionDict,
) -> StatResult<JSValue> {
    if stat.data.is_empty() {
        return encode(&Unavailable { available: false });
    }
    let kind = RepresentationType::parse(representation.id, stat.kind.as_deref())?;
    let region_header = if stat.country.is_global() {
        HEADER_GLOBAL
    } else {
        HEADER_COUNTRY
    };
    let regions = refs.breakdown(stat.survey, stat.country);
    let orgs = refs.organization_rows();
    debug!(
        "build_vars: {:?} representation {} ({}): {} regions, {} organizations",
        stat.country,
        representation.id,
        kind.description(),
        regions.len(),
        orgs.len()
    );
    match (kind, &stat.data) {
        (RepresentationType::AveragePercent, QuestionData::AveragePercent(d)) => {
            encode(&average_percent_vars(d, representation, region_header, &regions, &orgs))
        }
        (RepresentationType::YesNo, QuestionData::YesNo(d)) => {
            encode(&yes_no_vars(d, representation, region_header, &regions, &orgs))
        }
        (RepresentationType::MultiselectTop, QuestionData::MultiselectTop(d)) => {
            encode(&multiselect_top_vars(d, region_header, &orgs, options))
        }
        (kind, _) => Err(StatError::TypeMismatch {
            question: representation.questions.first().cloned().unwrap_or_default(),
            expected: kind.name(),
            found: "stored data of another representation type".to_string(),
        }),
    }
}

fn mean_series(
    rows: &[(String, String)],
    cnt: &BTreeMap<String, u64>,
    sum: &BTreeMap<String, f64>,
) -> (Vec<String>, Vec<i64>, Vec<u64>) {
    let mut labels = Vec::new();
    let mut series = Vec::new();
    let mut meta = Vec::new();
    for (key, label) in rows {
        labels.push(label.clone());
        match (cnt.get(key), sum.get(key)) {
            (Some(&c), Some(&s)) if c > 0 => {
                series.push(round_mean(s, c));
                meta.push(c);
            }
            _ => {
                series.push(-1);
                meta.push(0);
            }
        }
    }
    (labels, series, meta)
}

fn average_percent_vars(
    d: &AveragePercentData,
    representation: &Representation,
    region_header: &'static str,
    regions: &[(String, String)],
    orgs: &[(String, String)],
) -> AveragePercentVars {
    let (bar_labels, bar_series, bar_series_meta) = mean_series(regions, &d.reg_cnt, &d.reg_sum);
    let (org_labels, org_series, org_series_meta) = mean_series(orgs, &d.org_cnt, &d.org_sum);
    let mean = round_mean(d.main_sum, d.main_cnt);
    AveragePercentVars {
        available: true,
        region_header,
        bar_labels,
        bar_series,
        bar_series_meta,
        org_labels,
        org_series,
        org_series_meta,
        pie_labels: vec![representation.label2.clone(), representation.label3.clone()],
        pie_data: vec![mean, 100 - mean],
    }
}

fn yes_no_series(
    rows: &[(String, String)],
    cnt: &BTreeMap<String, u64>,
    yes: &BTreeMap<String, u64>,
) -> (Vec<String>, Vec<(i64, i64)>) {
    let labels = rows.iter().map(|(_, l)| l.clone()).collect();
    let series = rows
        .iter()
        .map(|(key, _)| match cnt.get(key) {
            Some(&c) if c > 0 => {
                let y = yes.get(key).cloned().unwrap_or(0);
                (y as i64, c as i64 - y as i64)
            }
            _ => (-1, -1),
        })
        .collect();
    (labels, series)
}

fn yes_no_vars(
    d: &YesNoData,
    representation: &Representation,
    region_header: &'static str,
    regions: &[(String, String)],
    orgs: &[(String, String)],
) -> YesNoVars {
    let (bar_labels, bar_series) = yes_no_series(regions, &d.reg_cnt, &d.reg_yes);
    let (org_labels, org_series) = yes_no_series(orgs, &d.org_cnt, &d.org_yes);
    YesNoVars {
        available: true,
        region_header,
        bar_labels,
        bar_series,
        org_labels,
        org_series,
        pie_labels: vec![representation.label2.clone(), representation.label3.clone()],
        pie_data: vec![d.main_cnt - d.main_yes, d.main_yes],
    }
}

fn multiselect_top_vars(
    d: &MultiselectTopData,
    region_header: &'static str,
    orgs: &[(String, String)],
    options: &mut OptionDict,
) -> MultiselectTopVars {
    let empty = BTreeMap::new();
    let mut org_top1: Vec<&BTreeMap<String, u64>> = Vec::new();
    let mut org_top3: Vec<&BTreeMap<String, u64>> = Vec::new();
    for (key, _) in orgs {
        match d.org.get(key) {
            Some(counts) => {
                org_top1.push(&counts.top1);
                org_top3.push(&counts.top3);
            }
            None => {
                org_top1.push(&empty);
                org_top3.push(&empty);
            }
        }
    }
    let top1 = calculate_top(&d.top1, &org_top1, options);
    let top3 = calculate_top(&d.top3, &org_top3, options);
    MultiselectTopVars {
        available: true,
        region_header,
        org_labels: orgs.iter().map(|(_, l)| l.clone()).collect(),
        top1,
        top3,
    }
}

fn percent(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * count as f64 / total as f64
    }
}

/// Ranks the options of a frequency table.
///
/// Options are sorted by decreasing count, then by label. The pie keeps the
/// first three and folds the rest into "Other"; it always has four slices.
/// The tables keep the first ten rows. `org_tables` gives, per organization,
/// the same frequency table restricted to that organization.
pub fn calculate_top(
    table: &BTreeMap<String, u64>,
    org_tables: &[&BTreeMap<String, u64>],
    options: &mut OptionDict,
) -> TopVars {
    let total: u64 = table.values().sum();
    let org_totals: Vec<u64> = org_tables.iter().map(|t| t.values().sum()).collect();

    let mut entries: Vec<(u64, String, &String)> = table
        .iter()
        .map(|(key, cnt)| (*cnt, options.normalize(key), key))
        .collect();
    entries.sort_by(|a, b| match b.0.cmp(&a.0) {
        Ordering::Equal => a.1.cmp(&b.1),
        x => x,
    });

    let table_rows: Vec<TableRow> = entries
        .iter()
        .take(TABLE_ROWS)
        .map(|(cnt, label, _)| (*cnt, label.clone(), percent(*cnt, total)))
        .collect();
    let org_table: Vec<(String, Vec<f64>)> = entries
        .iter()
        .take(TABLE_ROWS)
        .map(|(_, label, key)| {
            let per_org = org_tables
                .iter()
                .zip(org_totals.iter())
                .map(|(t, org_total)| percent(t.get(*key).cloned().unwrap_or(0), *org_total))
                .collect();
            (label.clone(), per_org)
        })
        .collect();

    let mut labels: Vec<String> = Vec::new();
    let mut data: Vec<u64> = Vec::new();
    for (cnt, label, _) in entries.iter().take(PIE_TOP) {
        labels.push(label.clone());
        data.push(*cnt);
    }
    let hide_last_legend_item = entries.len() > PIE_TOP;
    if hide_last_legend_item {
        labels.push(OTHER_LABEL.to_string());
        data.push(entries.iter().skip(PIE_TOP).map(|e| e.0).sum());
    }
    while labels.len() < PIE_SLICES {
        labels.push(String::new());
        data.push(0);
    }

    TopVars {
        pie: PieVars {
            labels,
            data,
            hide_last_legend_item,
        },
        table: table_rows,
        org_table,
    }
}
