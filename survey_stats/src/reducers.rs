//! Per-type reducers: how one answer to a question updates the raw
//! aggregate of its representation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::options::OptionDict;
use crate::query::Node;

// ******** Raw aggregates *********

#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct AveragePercentData {
    pub main_cnt: u64,
    pub main_sum: f64,
    /// How many times each submitted value was seen.
    pub dist: BTreeMap<String, u64>,
    pub reg_cnt: BTreeMap<String, u64>,
    pub reg_sum: BTreeMap<String, f64>,
    pub org_cnt: BTreeMap<String, u64>,
    pub org_sum: BTreeMap<String, f64>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct YesNoData {
    pub main_cnt: u64,
    pub main_yes: u64,
    pub reg_cnt: BTreeMap<String, u64>,
    pub reg_yes: BTreeMap<String, u64>,
    pub org_cnt: BTreeMap<String, u64>,
    pub org_yes: BTreeMap<String, u64>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopCounts {
    pub cnt: u64,
    pub top1: BTreeMap<String, u64>,
    pub top3: BTreeMap<String, u64>,
}

impl TopCounts {
    fn record(&mut self, selection: &[String]) {
        self.cnt += 1;
        if let Some(first) = selection.first() {
            *self.top1.entry(first.clone()).or_insert(0) += 1;
        }
        let mut credited: Vec<&String> = Vec::new();
        for option in selection.iter().take(3) {
            if !credited.contains(&option) {
                credited.push(option);
                *self.top3.entry(option.clone()).or_insert(0) += 1;
            }
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiselectTopData {
    pub cnt: u64,
    pub top1: BTreeMap<String, u64>,
    pub top3: BTreeMap<String, u64>,
    /// The same counts, per organization.
    pub org: BTreeMap<String, TopCounts>,
}

/// The raw aggregate of a question stat.
///
/// Stored as a plain JSON object; the shape tells the variants apart.
/// Both `null` and `{}` read back as `Empty`.
#[derive(PartialEq, Debug, Clone, Default, Serialize)]
#[serde(untagged)]
pub enum QuestionData {
    #[default]
    Empty,
    AveragePercent(AveragePercentData),
    YesNo(YesNoData),
    MultiselectTop(MultiselectTopData),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoFields {}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredData {
    Null,
    AveragePercent(AveragePercentData),
    YesNo(YesNoData),
    MultiselectTop(MultiselectTopData),
    EmptyObject(NoFields),
}

impl<'de> Deserialize<'de> for QuestionData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match StoredData::deserialize(deserializer)? {
            StoredData::Null | StoredData::EmptyObject(_) => QuestionData::Empty,
            StoredData::AveragePercent(d) => QuestionData::AveragePercent(d),
            StoredData::YesNo(d) => QuestionData::YesNo(d),
            StoredData::MultiselectTop(d) => QuestionData::MultiselectTop(d),
        })
    }
}

impl QuestionData {
    /// True when no answer contributed to this aggregate.
    pub fn is_empty(&self) -> bool {
        match self {
            QuestionData::Empty => true,
            QuestionData::AveragePercent(d) => d.main_cnt == 0,
            QuestionData::YesNo(d) => d.main_cnt == 0,
            QuestionData::MultiselectTop(d) => d.cnt == 0,
        }
    }

    /// Adds one observation. The first observation decides the variant.
    pub fn record(
        &mut self,
        question: QuestionId,
        observation: &Observation,
        region_key: Option<&str>,
        org_key: &str,
    ) -> StatResult<()> {
        if *self == QuestionData::Empty {
            *self = match observation {
                Observation::Percent { .. } => {
                    QuestionData::AveragePercent(AveragePercentData::default())
                }
                Observation::YesNo(_) => QuestionData::YesNo(YesNoData::default()),
                Observation::Selection(_) => {
                    QuestionData::MultiselectTop(MultiselectTopData::default())
                }
            };
        }
        match (self, observation) {
            (QuestionData::AveragePercent(d), Observation::Percent { raw, value }) => {
                d.main_cnt += 1;
                d.main_sum += value;
                *d.dist.entry(raw.clone()).or_insert(0) += 1;
                if let Some(rk) = region_key {
                    *d.reg_cnt.entry(rk.to_string()).or_insert(0) += 1;
                    *d.reg_sum.entry(rk.to_string()).or_insert(0.0) += value;
                }
                *d.org_cnt.entry(org_key.to_string()).or_insert(0) += 1;
                *d.org_sum.entry(org_key.to_string()).or_insert(0.0) += value;
                Ok(())
            }
            (QuestionData::YesNo(d), Observation::YesNo(is_yes)) => {
                let yes = u64::from(*is_yes);
                d.main_cnt += 1;
                d.main_yes += yes;
                if let Some(rk) = region_key {
                    *d.reg_cnt.entry(rk.to_string()).or_insert(0) += 1;
                    *d.reg_yes.entry(rk.to_string()).or_insert(0) += yes;
                }
                *d.org_cnt.entry(org_key.to_string()).or_insert(0) += 1;
                *d.org_yes.entry(org_key.to_string()).or_insert(0) += yes;
                Ok(())
            }
            (QuestionData::MultiselectTop(d), Observation::Selection(selection)) => {
                let mut global = TopCounts {
                    cnt: d.cnt,
                    top1: std::mem::take(&mut d.top1),
                    top3: std::mem::take(&mut d.top3),
                };
                global.record(selection);
                d.cnt = global.cnt;
                d.top1 = global.top1;
                d.top3 = global.top3;
                d.org
                    .entry(org_key.to_string())
                    .or_default()
                    .record(selection);
                Ok(())
            }
            (_, obs) => Err(StatError::TypeMismatch {
                question,
                expected: obs.expected(),
                found: "stored data of another representation type".to_string(),
            }),
        }
    }
}

// ******** Observations *********

/// What one answer says about one question, once validated.
#[derive(PartialEq, Debug, Clone)]
pub enum Observation {
    Percent { raw: String, value: f64 },
    YesNo(bool),
    /// Normalized selections, in the order of the respondent.
    Selection(Vec<String>),
}

impl Observation {
    fn expected(&self) -> &'static str {
        match self {
            Observation::Percent { .. } => AVERAGE_PERCENT_SHAPE,
            Observation::YesNo(_) => YES_NO_SHAPE,
            Observation::Selection(_) => MULTISELECT_SHAPE,
        }
    }
}

const AVERAGE_PERCENT_SHAPE: &str = "a mapping with a numeric 'main' field";
const YES_NO_SHAPE: &str = "a single value";
const MULTISELECT_SHAPE: &str = "a sequence of options or a mapping with an '' key";

/// The attribution of an answer.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct AnswerContext {
    pub organization: OrganizationId,
    pub country: Option<CountryId>,
    pub region: Option<RegionId>,
}

impl AnswerContext {
    pub fn from_answer(answer: &Answer) -> AnswerContext {
        AnswerContext {
            organization: answer.organization,
            country: answer.country,
            region: answer.region,
        }
    }

    /// Global rows break down by country, country rows by region.
    pub fn region_key(&self, scope: CountryScope) -> Option<String> {
        match scope {
            CountryScope::Global => self.country.map(|c| c.to_string()),
            CountryScope::Specific(_) => self.region.map(|r| r.to_string()),
        }
    }

    pub fn org_key(&self) -> String {
        self.organization.to_string()
    }
}

/// Validates the value of a question against its representation type.
///
/// Returns `None` when the question counts as not answered.
pub fn observe(
    kind: RepresentationType,
    question: QuestionId,
    value: &Node,
    options: &mut OptionDict,
) -> StatResult<Option<Observation>> {
    let mismatch = |expected: &'static str| StatError::TypeMismatch {
        question,
        expected,
        found: value.shape(),
    };
    match kind {
        RepresentationType::AveragePercent => {
            // A mapping without a main field is a question left unanswered.
            let main = match value {
                Node::Map(m) => match m.get("main") {
                    None => return Ok(None),
                    Some(n) => n
                        .as_str()
                        .ok_or_else(|| mismatch(AVERAGE_PERCENT_SHAPE))?
                        .trim(),
                },
                _ => return Err(mismatch(AVERAGE_PERCENT_SHAPE)),
            };
            if main.is_empty() {
                return Ok(None);
            }
            match main.parse::<f64>() {
                Ok(x) if x.is_finite() => Ok(Some(Observation::Percent {
                    raw: main.to_string(),
                    value: x,
                })),
                _ => Err(mismatch(AVERAGE_PERCENT_SHAPE)),
            }
        }
        RepresentationType::YesNo => {
            let s = value.as_str().ok_or_else(|| mismatch(YES_NO_SHAPE))?;
            Ok(Some(Observation::YesNo(s == "Yes")))
        }
        RepresentationType::MultiselectTop => {
            let raw: Vec<&str> = match value {
                Node::List(l) => l
                    .iter()
                    .map(|n| n.as_str())
                    .collect::<Option<Vec<&str>>>()
                    .ok_or_else(|| mismatch(MULTISELECT_SHAPE))?,
                Node::Map(m) => match m.get("") {
                    Some(Node::Value(s)) => vec![s.as_str()],
                    Some(Node::List(l)) => l
                        .iter()
                        .map(|n| n.as_str())
                        .collect::<Option<Vec<&str>>>()
                        .ok_or_else(|| mismatch(MULTISELECT_SHAPE))?,
                    _ => return Err(mismatch(MULTISELECT_SHAPE)),
                },
                Node::Value(_) => return Err(mismatch(MULTISELECT_SHAPE)),
            };
            // The form posts an empty sentinel after the selections.
            let selection: Vec<String> = raw
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| options.normalize(&s.to_lowercase()))
                .collect();
            if selection.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Observation::Selection(selection)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{extract_data, parse_query_string};

    fn reduce(
        kind: RepresentationType,
        data: &mut QuestionData,
        question: QuestionId,
        value: &Node,
        scope: CountryScope,
        context: &AnswerContext,
        options: &mut OptionDict,
    ) -> StatResult<()> {
        if let Some(obs) = observe(kind, question, value, options)? {
            let region_key = context.region_key(scope);
            data.record(question, &obs, region_key.as_deref(), &context.org_key())?;
        }
        Ok(())
    }

    fn node(body: &str, qid: QuestionId) -> Node {
        let p = extract_data(parse_query_string(body).unwrap()).unwrap();
        p.get(&qid).unwrap().clone()
    }

    fn ctx(country: CountryId, region: RegionId) -> AnswerContext {
        AnswerContext {
            organization: 7,
            country: Some(country),
            region: Some(region),
        }
    }

    #[test]
    fn average_percent_skips_blank() {
        let mut options = OptionDict::empty();
        let mut data = QuestionData::Empty;
        for (body, region) in [
            ("data[4][main]=40&data[4][additional]=", 11),
            ("data[4][main]=&data[4][additional]=2", 12),
            ("data[4][main]=30&data[4][additional]=", 12),
        ] {
            let n = node(body, 4);
            reduce(
                RepresentationType::AveragePercent,
                &mut data,
                4,
                &n,
                CountryScope::Specific(1),
                &ctx(1, region),
                &mut options,
            )
            .unwrap();
        }
        match data {
            QuestionData::AveragePercent(d) => {
                assert_eq!(d.main_cnt, 2);
                assert!((d.main_sum - 70.0).abs() < 1e-9);
                assert_eq!(d.dist.get("40"), Some(&1));
                assert_eq!(d.dist.get("30"), Some(&1));
                assert_eq!(d.reg_cnt.get("11"), Some(&1));
                assert_eq!(d.reg_cnt.get("12"), Some(&1));
                assert_eq!(d.org_cnt.get("7"), Some(&2));
                assert!((d.org_sum["7"] - 70.0).abs() < 1e-9);
            }
            x => panic!("unexpected data {:?}", x),
        }
    }

    #[test]
    fn yes_no_global_breaks_down_by_country() {
        let mut options = OptionDict::empty();
        let mut data = QuestionData::Empty;
        for (v, country) in [("Yes", 1), ("No", 1), ("Yes", 2)] {
            reduce(
                RepresentationType::YesNo,
                &mut data,
                2,
                &Node::Value(v.to_string()),
                CountryScope::Global,
                &ctx(country, 99),
                &mut options,
            )
            .unwrap();
        }
        let d = match data {
            QuestionData::YesNo(d) => d,
            x => panic!("unexpected data {:?}", x),
        };
        assert_eq!(d.main_cnt, 3);
        assert_eq!(d.main_yes, 2);
        assert_eq!(d.reg_cnt.get("1"), Some(&2));
        assert_eq!(d.reg_yes.get("1"), Some(&1));
        assert_eq!(d.reg_cnt.get("2"), Some(&1));
        assert_eq!(d.reg_yes.get("2"), Some(&1));
        assert_eq!(d.org_yes.get("7"), Some(&2));
        assert!(!d.reg_cnt.contains_key("99"));
    }

    #[test]
    fn multiselect_top_counts() {
        let mut options = OptionDict::empty();
        let mut data = QuestionData::Empty;
        let bodies = [
            "data[5][]=x1&data[5][]=x2&data[5][]=x3&data[5][]=x4&data[5][]=",
            "data[5][]=X1&data[5][]=x2&data[5][]=&data[5][other]=",
            "data[5][]=x2&data[5][]=X3&data[5][]=x3&data[5][]=",
            "data[5][]=x3&data[5][other]=",
        ];
        for body in bodies {
            let n = node(body, 5);
            reduce(
                RepresentationType::MultiselectTop,
                &mut data,
                5,
                &n,
                CountryScope::Global,
                &ctx(1, 11),
                &mut options,
            )
            .unwrap();
        }
        let d = match data {
            QuestionData::MultiselectTop(d) => d,
            x => panic!("unexpected data {:?}", x),
        };
        let counts = |entries: &[(&str, u64)]| -> BTreeMap<String, u64> {
            entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
        };
        assert_eq!(d.cnt, 4);
        assert_eq!(d.top1, counts(&[("x1", 2), ("x2", 1), ("x3", 1)]));
        assert_eq!(d.top3, counts(&[("x1", 2), ("x2", 3), ("x3", 3)]));
        let org = d.org.get("7").unwrap();
        assert_eq!(org.cnt, 4);
        assert_eq!(org.top1, d.top1);
        assert_eq!(org.top3, d.top3);
    }

    #[test]
    fn shape_mismatches() {
        let mut options = OptionDict::empty();
        let empty_map = Node::Map(BTreeMap::new());
        for kind in [RepresentationType::YesNo, RepresentationType::MultiselectTop] {
            assert!(matches!(
                observe(kind, 1, &empty_map, &mut options),
                Err(StatError::TypeMismatch { .. })
            ));
        }
        let yes = Node::Value("Yes".to_string());
        assert!(observe(RepresentationType::AveragePercent, 1, &yes, &mut options).is_err());
        assert!(observe(RepresentationType::MultiselectTop, 1, &yes, &mut options).is_err());
        let not_a_number = node("data[1][main]=abc", 1);
        assert!(observe(RepresentationType::AveragePercent, 1, &not_a_number, &mut options).is_err());
        let nested = Node::Map(BTreeMap::from([(
            "main".to_string(),
            Node::List(vec![Node::Value("10".to_string())]),
        )]));
        assert!(observe(RepresentationType::AveragePercent, 1, &nested, &mut options).is_err());
    }

    #[test]
    fn average_percent_without_main() {
        let mut options = OptionDict::empty();
        let only_additional = node("data[1][additional]=2", 1);
        assert_eq!(
            observe(RepresentationType::AveragePercent, 1, &only_additional, &mut options).unwrap(),
            None
        );
        let empty_map = Node::Map(BTreeMap::new());
        assert_eq!(
            observe(RepresentationType::AveragePercent, 1, &empty_map, &mut options).unwrap(),
            None
        );
    }

    #[test]
    fn stored_data_of_another_type() {
        let mut options = OptionDict::empty();
        let mut data = QuestionData::YesNo(YesNoData::default());
        let n = node("data[1][main]=10", 1);
        let res = reduce(
            RepresentationType::AveragePercent,
            &mut data,
            1,
            &n,
            CountryScope::Global,
            &ctx(1, 1),
            &mut options,
        );
        assert!(matches!(res, Err(StatError::TypeMismatch { .. })));
    }

    #[test]
    fn data_json_shape() {
        let js = serde_json::json!({
            "main_cnt": 3, "main_yes": 2,
            "reg_cnt": {"1": 2}, "reg_yes": {"1": 1},
            "org_cnt": {"7": 3}, "org_yes": {"7": 2}
        });
        let data: QuestionData = serde_json::from_value(js).unwrap();
        assert!(matches!(data, QuestionData::YesNo(ref d) if d.main_yes == 2));
        let empty: QuestionData = serde_json::from_value(serde_json::Value::Null).unwrap();
        assert_eq!(empty, QuestionData::Empty);
        let empty: QuestionData = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(empty, QuestionData::Empty);
        let unknown = serde_json::from_value::<QuestionData>(serde_json::json!({"foo": 1}));
        assert!(unknown.is_err());
    }
}
