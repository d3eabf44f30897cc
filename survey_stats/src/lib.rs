mod config;
pub mod dependencies;
pub mod manual;
pub mod options;
pub mod presentation;
pub mod query;
pub mod reducers;
pub mod storage;

use std::collections::BTreeMap;

use log::{debug, info, warn};

pub use crate::config::*;
use crate::dependencies::{process_dependencies, DependencyRule};
use crate::options::OptionDict;
use crate::presentation::{build_vars, ReferenceCache};
use crate::query::{extract_data, parse_query_string};
use crate::reducers::{observe, AnswerContext, Observation, QuestionData};
use crate::storage::{Catalog, StatStore};

/// The aggregate state of one survey during a pass.
///
/// The lifecycle of a pass is `load_stat`, `fill_out`, `process_answer` for
/// every selected answer, then `save`. Nothing reaches the store before
/// `save`: a failing answer leaves the stored aggregates untouched.
pub struct Evaluator<'a> {
    survey: SurveyId,
    catalog: &'a Catalog,
    options: &'a mut OptionDict,
    dependencies: &'a [DependencyRule],
    pub survey_stat: BTreeMap<SurveyKey, SurveyStat>,
    pub organization_stat: BTreeMap<OrganizationKey, OrganizationStat>,
    pub question_stat: BTreeMap<QuestionKey, QuestionStat>,
    /// Each question feeds at most one representation.
    pub question_representation_link: BTreeMap<QuestionId, RepresentationId>,
    pub question_dict: BTreeMap<QuestionId, Question>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        survey: SurveyId,
        catalog: &'a Catalog,
        dependencies: &'a [DependencyRule],
        options: &'a mut OptionDict,
    ) -> Evaluator<'a> {
        Evaluator {
            survey,
            catalog,
            options,
            dependencies,
            survey_stat: BTreeMap::new(),
            organization_stat: BTreeMap::new(),
            question_stat: BTreeMap::new(),
            question_representation_link: BTreeMap::new(),
            question_dict: BTreeMap::new(),
        }
    }

    /// Loads the stored rows of the survey.
    pub fn load_stat(&mut self, store: &dyn StatStore, baseline: Baseline) {
        for mut s in store.survey_stats(self.survey) {
            if baseline == Baseline::FromZero {
                s.total = 0;
                s.last = None;
            }
            self.survey_stat.insert(s.key(), s);
        }
        for mut s in store.organization_stats(self.survey) {
            if baseline == Baseline::FromZero {
                s.total = 0;
            }
            self.organization_stat.insert(s.key(), s);
        }
        for mut s in store.question_stats(self.survey) {
            if baseline == Baseline::FromZero {
                s.data = QuestionData::Empty;
                s.vars = serde_json::Value::Null;
            }
            self.question_stat.insert(s.key(), s);
        }
        info!(
            "load_stat: survey {}: loaded {} survey stats, {} organization stats, {} question stats ({:?})",
            self.survey,
            self.survey_stat.len(),
            self.organization_stat.len(),
            self.question_stat.len(),
            baseline
        );
    }

    /// Creates the missing rows for every reported country (and the global
    /// rollup) and links the questions to their representation.
    pub fn fill_out(&mut self) {
        let survey = self.survey;
        let catalog: &'a Catalog = self.catalog;
        let mut scopes: Vec<CountryScope> = vec![CountryScope::Global];
        let mut organizations: Vec<&Organization> = Vec::new();
        match catalog.survey(survey) {
            Some(s) => {
                for c in catalog.countries.iter() {
                    if c.use_in_reports && s.countries.contains(&c.id) {
                        scopes.push(CountryScope::Specific(c.id));
                    }
                }
                for oid in s.organizations.iter() {
                    match catalog.organizations.iter().find(|o| o.id == *oid) {
                        Some(o) => organizations.push(o),
                        None => warn!("fill_out: survey {}: unknown organization {}", survey, oid),
                    }
                }
            }
            None => warn!("fill_out: survey {} is not in the catalog", survey),
        }

        for scope in scopes.iter() {
            let key = SurveyKey {
                survey,
                country: *scope,
            };
            self.survey_stat
                .entry(key)
                .or_insert_with(|| SurveyStat::new(key));
            for org in organizations.iter() {
                let key = OrganizationKey {
                    survey,
                    country: *scope,
                    organization: org.id,
                };
                self.organization_stat.entry(key).or_insert_with(|| {
                    let mut stat = OrganizationStat::new(key);
                    stat.ordering = org.ordering;
                    stat
                });
            }
        }

        for rep in catalog.active_representations(survey) {
            for scope in scopes.iter() {
                let key = QuestionKey {
                    survey,
                    country: *scope,
                    representation: rep.id,
                };
                let stat = self
                    .question_stat
                    .entry(key)
                    .or_insert_with(|| QuestionStat::new(key, rep));
                stat.kind = rep.kind.clone();
            }
            let qid = match rep.questions.first() {
                Some(qid) => *qid,
                None => {
                    warn!("fill_out: representation {} has no question", rep.id);
                    continue;
                }
            };
            if let Some(other) = self.question_representation_link.get(&qid) {
                warn!(
                    "fill_out: question {} is already reported by representation {}, ignoring representation {}",
                    qid, other, rep.id
                );
                continue;
            }
            match catalog.question(qid) {
                Some(q) if q.survey == survey => {
                    self.question_representation_link.insert(qid, rep.id);
                    self.question_dict.insert(qid, q.clone());
                }
                _ => warn!(
                    "fill_out: representation {}: question {} is not part of survey {}",
                    rep.id, qid, survey
                ),
            }
        }
        info!(
            "fill_out: survey {}: {} survey stats, {} organization stats, {} question stats, {} linked questions",
            survey,
            self.survey_stat.len(),
            self.organization_stat.len(),
            self.question_stat.len(),
            self.question_representation_link.len()
        );
    }

    /// Counts one answer for `key` and for the global row.
    pub fn update_survey_stat(&mut self, key: SurveyKey, answer: &Answer) {
        let mut keys = vec![key];
        if !key.country.is_global() {
            keys.push(key.global());
        }
        for k in keys {
            let stat = self
                .survey_stat
                .entry(k)
                .or_insert_with(|| SurveyStat::new(k));
            stat.total += 1;
            stat.last = match stat.last {
                Some(last) if last >= answer.created_at => Some(last),
                _ => Some(answer.created_at),
            };
        }
    }

    /// Counts one answer for `key` and for the global row.
    pub fn update_organization_stat(&mut self, key: OrganizationKey) {
        let mut keys = vec![key];
        if !key.country.is_global() {
            keys.push(key.global());
        }
        for k in keys {
            self.organization_stat
                .entry(k)
                .or_insert_with(|| OrganizationStat::new(k))
                .total += 1;
        }
    }

    /// Adds one answer to the aggregates.
    ///
    /// An answer with an empty body is ignored. The payload is validated
    /// completely before any row is touched.
    pub fn process_answer(&mut self, answer: &Answer) -> StatResult<()> {
        if answer.body.trim().is_empty() {
            debug!("process_answer: answer {}: empty body", answer.id);
            return Ok(());
        }
        let mut data = extract_data(parse_query_string(&answer.body)?)?;
        process_dependencies(self.dependencies, &mut data);

        let mut observations: Vec<(QuestionId, &'a Representation, Observation)> = Vec::new();
        for (qid, value) in data.iter() {
            let rid = match self.question_representation_link.get(qid) {
                Some(rid) => *rid,
                None => {
                    debug!("process_answer: answer {}: question {} is not reported", answer.id, qid);
                    continue;
                }
            };
            let catalog: &'a Catalog = self.catalog;
            let rep = catalog
                .representation(rid)
                .ok_or(StatError::UnknownRepresentation {
                    representation: rid,
                })?;
            let kind = RepresentationType::parse(rid, rep.kind.as_deref())?;
            if let Some(obs) = observe(kind, *qid, value, self.options)? {
                debug!(
                    "process_answer: answer {}: question {} ({:?}): {:?}",
                    answer.id,
                    qid,
                    self.question_dict.get(qid).map(|q| q.text.as_str()),
                    obs
                );
                observations.push((*qid, rep, obs));
            }
        }

        let scope = CountryScope::from(answer.country);
        self.update_survey_stat(
            SurveyKey {
                survey: answer.survey,
                country: scope,
            },
            answer,
        );
        self.update_organization_stat(OrganizationKey {
            survey: answer.survey,
            country: scope,
            organization: answer.organization,
        });

        let context = AnswerContext::from_answer(answer);
        let org_key = context.org_key();
        let mut scopes = vec![CountryScope::Global];
        if !scope.is_global() {
            scopes.push(scope);
        }
        for (qid, rep, obs) in observations {
            for s in scopes.iter() {
                let key = QuestionKey {
                    survey: answer.survey,
                    country: *s,
                    representation: rep.id,
                };
                let region_key = context.region_key(*s);
                self.question_stat
                    .entry(key)
                    .or_insert_with(|| QuestionStat::new(key, rep))
                    .data
                    .record(qid, &obs, region_key.as_deref(), &org_key)?;
            }
        }
        Ok(())
    }

    /// Refreshes the vars of the question stats, then writes every row and the
    /// pending option entries.
    pub fn save(&mut self, store: &mut dyn StatStore) -> StatResult<()> {
        let mut refs = ReferenceCache::new(self.catalog);
        for stat in self.question_stat.values_mut() {
            let rep = self.catalog.representation(stat.representation).ok_or(
                StatError::UnknownRepresentation {
                    representation: stat.representation,
                },
            )?;
            stat.vars = build_vars(stat, rep, &mut refs, self.options)?;
        }
        for stat in self.survey_stat.values() {
            store.save_survey_stat(stat);
        }
        for stat in self.organization_stat.values() {
            store.save_organization_stat(stat);
        }
        for stat in self.question_stat.values() {
            store.save_question_stat(stat);
        }
        let entries = self.options.take_changes();
        for entry in entries.iter() {
            store.save_option_entry(entry);
        }
        info!(
            "save: survey {}: wrote {} survey stats, {} organization stats, {} question stats, {} option entries",
            self.survey,
            self.survey_stat.len(),
            self.organization_stat.len(),
            self.question_stat.len(),
            entries.len()
        );
        Ok(())
    }
}

/// The answers of a survey that a pass iterates over, in their original order.
pub fn select_answers<'b>(
    answers: &'b [Answer],
    survey: SurveyId,
    policy: AnswerPolicy,
) -> impl Iterator<Item = &'b Answer> {
    answers
        .iter()
        .filter(move |a| a.survey == survey && policy.accepts(a))
}

/// Runs a full pass over the answers of a survey and persists the result.
///
/// Returns the number of answers that were processed. Any failing answer
/// aborts the pass before anything is written.
pub fn process_answers(
    store: &mut dyn StatStore,
    catalog: &Catalog,
    survey: SurveyId,
    answers: &[Answer],
    rules: &PassRules,
    options: &mut OptionDict,
) -> StatResult<usize> {
    info!(
        "process_answers: survey {}, {} answers available, rules: {:?}",
        survey,
        answers.len(),
        rules
    );
    let mut evaluator = Evaluator::new(survey, catalog, &rules.dependencies, options);
    evaluator.load_stat(store, rules.baseline);
    evaluator.fill_out();
    let mut count = 0;
    for answer in select_answers(answers, survey, rules.policy) {
        evaluator.process_answer(answer)?;
        count += 1;
    }
    evaluator.save(store)?;
    info!("process_answers: survey {}: {} answers processed", survey, count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OptionEntry, StaticOptions};
    use crate::reducers::YesNoData;
    use crate::storage::MemoryStore;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn catalog() -> Catalog {
        let js = json!({
            "countries": [
                {"id": 1, "name": "Mexico", "useInReports": true},
                {"id": 2, "name": "Chile", "useInReports": true},
                {"id": 9, "name": "Hidden", "useInReports": false}
            ],
            "regions": [
                {"id": 11, "name": "North", "country": 1},
                {"id": 12, "name": "South", "country": 1}
            ],
            "organizations": [
                {"id": 5, "name": "Org A", "ordering": 2},
                {"id": 6, "name": "Org B", "ordering": 1}
            ],
            "surveys": [{"id": 1, "name": "S", "countries": [1, 2, 9], "organizations": [5, 6]}],
            "questions": [
                {"id": 1, "survey": 1, "text": "Share"},
                {"id": 2, "survey": 1, "text": "Do you?"},
                {"id": 3, "survey": 1, "text": "Which ones?"},
                {"id": 4, "survey": 1, "text": "Not reported"}
            ],
            "representations": [
                {"id": 10, "survey": 1, "questions": [1], "type": "type_average_percent",
                 "ordering": 1, "label1": "Share", "label2": "Yes", "label3": "No"},
                {"id": 20, "survey": 1, "questions": [2], "type": "type_yes_no", "ordering": 2},
                {"id": 30, "survey": 1, "questions": [3], "type": "type_multiselect_top", "ordering": 3},
                {"id": 40, "survey": 1, "questions": [2], "type": "type_yes_no", "ordering": 4},
                {"id": 50, "survey": 1, "questions": [4], "type": "type_yes_no", "active": false}
            ],
            "options": ["Age", "Efficacy"]
        });
        serde_json::from_value(js).unwrap()
    }

    fn answer(id: AnswerId, country: Option<CountryId>, region: Option<RegionId>, body: &str, day: u32) -> Answer {
        Answer {
            id,
            survey: 1,
            organization: 5,
            country,
            region,
            user: None,
            body: body.to_string(),
            is_updated: id % 2 == 0,
            created_at: Utc.with_ymd_and_hms(2017, 1, day, 0, 0, 0).unwrap(),
        }
    }

    fn global(survey: SurveyId) -> SurveyKey {
        SurveyKey {
            survey,
            country: CountryScope::Global,
        }
    }

    #[test]
    fn fill_out_creates_rows() {
        init();
        let catalog = catalog();
        let mut options = OptionDict::empty();
        let mut ev = Evaluator::new(1, &catalog, &[], &mut options);
        ev.fill_out();
        // Global, Mexico, Chile.
        assert_eq!(ev.survey_stat.len(), 3);
        assert_eq!(ev.organization_stat.len(), 6);
        assert_eq!(ev.question_stat.len(), 12);
        let key = QuestionKey {
            survey: 1,
            country: CountryScope::Global,
            representation: 20,
        };
        assert_eq!(ev.question_stat[&key].ordering, 2);
        assert_eq!(ev.question_stat[&key].kind.as_deref(), Some("type_yes_no"));
        let org_key = OrganizationKey {
            survey: 1,
            country: CountryScope::Specific(2),
            organization: 5,
        };
        assert_eq!(ev.organization_stat[&org_key].ordering, 2);
        assert_eq!(
            ev.question_representation_link,
            [(1, 10), (2, 20), (3, 30)].into_iter().collect::<BTreeMap<_, _>>()
        );
        assert_eq!(
            ev.question_dict.keys().cloned().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn survey_totals_add_up() {
        init();
        let catalog = catalog();
        let mut options = OptionDict::empty();
        let mut ev = Evaluator::new(1, &catalog, &[], &mut options);
        ev.fill_out();
        let answers = vec![
            answer(1, Some(1), Some(11), "data[2]=Yes", 3),
            answer(2, Some(1), Some(12), "data[2]=No", 1),
            answer(3, Some(2), None, "data[2]=Yes", 2),
            answer(4, None, None, "data[2]=Yes", 4),
        ];
        for a in answers.iter() {
            ev.process_answer(a).unwrap();
        }
        let g = &ev.survey_stat[&global(1)];
        assert_eq!(g.total, 4);
        assert_eq!(g.last, Some(answers[3].created_at));
        let mexico = &ev.survey_stat[&SurveyKey {
            survey: 1,
            country: CountryScope::Specific(1),
        }];
        assert_eq!(mexico.total, 2);
        assert_eq!(mexico.last, Some(answers[0].created_at));
        let by_country: u64 = ev
            .survey_stat
            .values()
            .filter(|s| !s.country.is_global())
            .map(|s| s.total)
            .sum();
        // The answer without a country only counts globally.
        assert_eq!(by_country, 3);
        let org = &ev.organization_stat[&OrganizationKey {
            survey: 1,
            country: CountryScope::Global,
            organization: 5,
        }];
        assert_eq!(org.total, 4);

        let key = QuestionKey {
            survey: 1,
            country: CountryScope::Specific(1),
            representation: 20,
        };
        let expected = YesNoData {
            main_cnt: 2,
            main_yes: 1,
            reg_cnt: [("11".to_string(), 1), ("12".to_string(), 1)].into_iter().collect(),
            reg_yes: [("11".to_string(), 1), ("12".to_string(), 0)].into_iter().collect(),
            org_cnt: [("5".to_string(), 2)].into_iter().collect(),
            org_yes: [("5".to_string(), 1)].into_iter().collect(),
        };
        assert_eq!(ev.question_stat[&key].data, QuestionData::YesNo(expected));
        let global_data = match &ev.question_stat[&key.global()].data {
            QuestionData::YesNo(d) => d.clone(),
            x => panic!("unexpected data {:?}", x),
        };
        assert_eq!(global_data.main_cnt, 4);
        assert_eq!(global_data.main_yes, 3);
        assert_eq!(global_data.reg_cnt.get("1"), Some(&2));
        assert_eq!(global_data.reg_cnt.get("2"), Some(&1));
    }

    #[test]
    fn bad_answers_abort() {
        init();
        let catalog = catalog();
        let mut options = OptionDict::empty();
        let mut ev = Evaluator::new(1, &catalog, &[], &mut options);
        ev.fill_out();

        ev.process_answer(&answer(1, Some(1), None, "", 1)).unwrap();
        assert_eq!(ev.survey_stat[&global(1)].total, 0);

        assert!(matches!(
            ev.process_answer(&answer(2, Some(1), None, "111", 1)),
            Err(StatError::MalformedPayload { .. })
        ));
        assert_eq!(
            ev.process_answer(&answer(3, Some(1), None, "a=1", 1)),
            Err(StatError::MissingDataKey)
        );
        assert_eq!(
            ev.process_answer(&answer(4, Some(1), None, "data=1", 1)),
            Err(StatError::MissingDataKey)
        );
        assert!(matches!(
            ev.process_answer(&answer(5, Some(1), None, "data[1]=40", 1)),
            Err(StatError::TypeMismatch { question: 1, .. })
        ));
        assert_eq!(ev.survey_stat[&global(1)].total, 0);

        // Questions without a representation are skipped.
        ev.process_answer(&answer(6, Some(1), None, "data[4]=Yes&data[111]=Yes", 1))
            .unwrap();
        assert_eq!(ev.survey_stat[&global(1)].total, 1);
    }

    #[test]
    fn average_percent_without_main_is_unanswered() {
        init();
        let catalog = catalog();
        let mut options = OptionDict::empty();
        let mut ev = Evaluator::new(1, &catalog, &[], &mut options);
        ev.fill_out();
        ev.process_answer(&answer(1, Some(1), Some(11), "data[1][additional]=2", 1))
            .unwrap();
        assert_eq!(ev.survey_stat[&global(1)].total, 1);
        let key = QuestionKey {
            survey: 1,
            country: CountryScope::Specific(1),
            representation: 10,
        };
        assert_eq!(ev.question_stat[&key].data, QuestionData::Empty);
        assert_eq!(ev.question_stat[&key.global()].data, QuestionData::Empty);
    }

    #[test]
    fn full_pass_and_baselines() {
        init();
        let catalog = catalog();
        let mut store = MemoryStore::default();
        let answers = vec![
            answer(1, Some(1), Some(11), "data[1][main]=40&data[1][additional]=", 1),
            answer(2, Some(1), Some(12), "data[1][main]=&data[1][additional]=2", 2),
            answer(3, Some(1), Some(12), "data[1][main]=30&data[1][additional]=", 3),
            answer(4, Some(2), None, "data[3][]=AGE&data[3][]=efficacy&data[3][]=&data[3][other]=", 4),
        ];
        let mut options = OptionDict::new(Box::new(catalog.option_source(&store)));
        let rules = PassRules::DEFAULT_RULES;
        let n = process_answers(&mut store, &catalog, 1, &answers, &rules, &mut options).unwrap();
        assert_eq!(n, 4);
        assert_eq!(store.survey_stats(1).len(), 3);
        assert_eq!(store.options.len(), 2);

        let find = |store: &MemoryStore, country: CountryScope, rep: RepresentationId| {
            store
                .question_stats
                .iter()
                .find(|s| s.country == country && s.representation == rep)
                .cloned()
                .unwrap()
        };
        let mexico = find(&store, CountryScope::Specific(1), 10);
        match &mexico.data {
            QuestionData::AveragePercent(d) => {
                assert_eq!(d.main_cnt, 2);
                assert!((d.main_sum - 70.0).abs() < 1e-9);
            }
            x => panic!("unexpected data {:?}", x),
        }
        assert_eq!(mexico.vars["bar_series"], json!([40, 30]));
        assert_eq!(mexico.vars["pie_data"], json!([35, 65]));
        let multi = find(&store, CountryScope::Global, 30);
        assert_eq!(multi.vars["top1"]["pie"]["labels"], json!(["Age", "", "", ""]));
        assert_eq!(find(&store, CountryScope::Global, 20).vars, json!({"available": false}));

        // Accumulating the same answers again double counts.
        let mut options = OptionDict::new(Box::new(catalog.option_source(&store)));
        let rules = PassRules {
            baseline: Baseline::Accumulate,
            ..PassRules::DEFAULT_RULES
        };
        process_answers(&mut store, &catalog, 1, &answers, &rules, &mut options).unwrap();
        let g = store.survey_stats(1).into_iter().find(|s| s.country.is_global()).unwrap();
        assert_eq!(g.total, 8);

        // Starting from zero does not.
        let mut options = OptionDict::new(Box::new(catalog.option_source(&store)));
        process_answers(&mut store, &catalog, 1, &answers, &PassRules::DEFAULT_RULES, &mut options)
            .unwrap();
        let g = store.survey_stats(1).into_iter().find(|s| s.country.is_global()).unwrap();
        assert_eq!(g.total, 4);
        assert_eq!(store.survey_stats.len(), 3);
        assert_eq!(store.question_stats.len(), 12);
    }

    #[test]
    fn last_policy_and_dependencies() {
        init();
        let catalog = catalog();
        let mut store = MemoryStore::default();
        let answers = vec![
            answer(1, Some(1), None, "data[2]=Yes", 1),
            answer(2, Some(1), None, "data[3][]=Age&data[3][]=", 2),
        ];
        let rules = PassRules {
            policy: AnswerPolicy::Last,
            baseline: Baseline::FromZero,
            dependencies: vec![DependencyRule::set_radio(3, 2, &["Age"], "No")],
        };
        let mut options = OptionDict::new(Box::new(StaticOptions {
            entries: vec![OptionEntry {
                lower: "age".to_string(),
                original: "Age".to_string(),
            }],
            catalog: vec![],
        }));
        let n = process_answers(&mut store, &catalog, 1, &answers, &rules, &mut options).unwrap();
        assert_eq!(n, 1);
        let yes_no = store
            .question_stats
            .iter()
            .find(|s| s.country.is_global() && s.representation == 20)
            .unwrap();
        assert_eq!(
            yes_no.data,
            QuestionData::YesNo(YesNoData {
                main_cnt: 1,
                main_yes: 0,
                reg_cnt: [("1".to_string(), 1)].into_iter().collect(),
                reg_yes: [("1".to_string(), 0)].into_iter().collect(),
                org_cnt: [("5".to_string(), 1)].into_iter().collect(),
                org_yes: [("5".to_string(), 0)].into_iter().collect(),
            })
        );
        // Nothing new to flush.
        assert!(store.options.is_empty());
    }

    #[test]
    fn unknown_representation_type() {
        init();
        let mut catalog = catalog();
        catalog.representations[1].kind = Some("type_unknown".to_string());
        let mut options = OptionDict::empty();
        let mut ev = Evaluator::new(1, &catalog, &[], &mut options);
        ev.fill_out();
        assert_eq!(
            ev.process_answer(&answer(1, Some(1), None, "data[2]=Yes", 1)),
            Err(StatError::UnknownRepresentationType {
                representation: 20,
                name: Some("type_unknown".to_string()),
            })
        );
    }
}
