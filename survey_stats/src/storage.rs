use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::*;
use crate::options::{OptionEntry, StaticOptions};
use crate::presentation::ReferenceSource;

/// Persistence of the aggregate rows and of the option entries.
///
/// Every save is an upsert keyed by the dimension key of the row (or the
/// lower-cased text of the option).
pub trait StatStore {
    fn survey_stats(&self, survey: SurveyId) -> Vec<SurveyStat>;
    fn organization_stats(&self, survey: SurveyId) -> Vec<OrganizationStat>;
    fn question_stats(&self, survey: SurveyId) -> Vec<QuestionStat>;
    fn save_survey_stat(&mut self, stat: &SurveyStat);
    fn save_organization_stat(&mut self, stat: &OrganizationStat);
    fn save_question_stat(&mut self, stat: &QuestionStat);

    fn option_entries(&self) -> Vec<OptionEntry>;
    fn save_option_entry(&mut self, entry: &OptionEntry);
}

/// A store that keeps everything in memory. It serializes to a single JSON
/// document.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStore {
    #[serde(default)]
    pub survey_stats: Vec<SurveyStat>,
    #[serde(default)]
    pub organization_stats: Vec<OrganizationStat>,
    #[serde(default)]
    pub question_stats: Vec<QuestionStat>,
    #[serde(default)]
    pub options: Vec<OptionEntry>,
}

fn upsert<T: Clone, K: PartialEq>(rows: &mut Vec<T>, row: &T, key: impl Fn(&T) -> K) {
    let k = key(row);
    match rows.iter_mut().find(|r| key(r) == k) {
        Some(existing) => *existing = row.clone(),
        None => rows.push(row.clone()),
    }
}

impl StatStore for MemoryStore {
    fn survey_stats(&self, survey: SurveyId) -> Vec<SurveyStat> {
        self.survey_stats
            .iter()
            .filter(|s| s.survey == survey)
            .cloned()
            .collect()
    }

    fn organization_stats(&self, survey: SurveyId) -> Vec<OrganizationStat> {
        self.organization_stats
            .iter()
            .filter(|s| s.survey == survey)
            .cloned()
            .collect()
    }

    fn question_stats(&self, survey: SurveyId) -> Vec<QuestionStat> {
        self.question_stats
            .iter()
            .filter(|s| s.survey == survey)
            .cloned()
            .collect()
    }

    fn save_survey_stat(&mut self, stat: &SurveyStat) {
        upsert(&mut self.survey_stats, stat, |s| s.key());
    }

    fn save_organization_stat(&mut self, stat: &OrganizationStat) {
        upsert(&mut self.organization_stats, stat, |s| s.key());
    }

    fn save_question_stat(&mut self, stat: &QuestionStat) {
        upsert(&mut self.question_stats, stat, |s| s.key());
    }

    fn option_entries(&self) -> Vec<OptionEntry> {
        self.options.clone()
    }

    fn save_option_entry(&mut self, entry: &OptionEntry) {
        debug!("save_option_entry: {:?} -> {:?}", entry.lower, entry.original);
        upsert(&mut self.options, entry, |e| e.lower.clone());
    }
}

// ********* Reference catalog ***********

/// The survey-authoring data the aggregation reads from.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub countries: Vec<Country>,
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub surveys: Vec<Survey>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub representations: Vec<Representation>,
    /// The display texts of the options of all the questions.
    #[serde(default)]
    pub options: Vec<String>,
}

impl Catalog {
    pub fn survey(&self, survey: SurveyId) -> Option<&Survey> {
        self.surveys.iter().find(|s| s.id == survey)
    }

    pub fn representation(&self, representation: RepresentationId) -> Option<&Representation> {
        self.representations.iter().find(|r| r.id == representation)
    }

    pub fn question(&self, question: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question)
    }

    /// The active representations of a survey, in report order.
    pub fn active_representations(&self, survey: SurveyId) -> Vec<&Representation> {
        let mut res: Vec<&Representation> = self
            .representations
            .iter()
            .filter(|r| r.survey == survey && r.active)
            .collect();
        res.sort_by_key(|r| (r.ordering, r.id));
        res
    }

    /// The seed of an option normalizer: the stored entries and the catalog options.
    pub fn option_source(&self, store: &dyn StatStore) -> StaticOptions {
        StaticOptions {
            entries: store.option_entries(),
            catalog: self.options.clone(),
        }
    }
}

impl ReferenceSource for Catalog {
    fn regions(&self, country: CountryId) -> Vec<Region> {
        self.regions
            .iter()
            .filter(|r| r.country == country)
            .cloned()
            .collect()
    }

    fn organizations(&self) -> Vec<Organization> {
        let mut res = self.organizations.clone();
        res.sort_by_key(|o| (o.ordering, o.id));
        res
    }

    fn reportable_countries(&self, survey: SurveyId) -> Vec<Country> {
        let reportable = |c: &&Country| c.use_in_reports;
        match self.survey(survey) {
            Some(s) => s
                .countries
                .iter()
                .filter_map(|cid| self.countries.iter().find(|c| c.id == *cid))
                .filter(reportable)
                .cloned()
                .collect(),
            None => self.countries.iter().filter(reportable).cloned().collect(),
        }
    }
}
