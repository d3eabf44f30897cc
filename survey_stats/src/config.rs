use std::error::Error;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;

// ********* Identifiers ***********

pub type SurveyId = u32;
pub type CountryId = u32;
pub type RegionId = u32;
pub type OrganizationId = u32;
pub type QuestionId = u32;
pub type RepresentationId = u32;
pub type AnswerId = u32;
pub type UserId = u32;

/// The country dimension of an aggregate row.
///
/// Every answer with a country contributes to two rows: the row of its
/// country and the `Global` row that rolls up all the countries of a survey.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(from = "Option<CountryId>", into = "Option<CountryId>")]
pub enum CountryScope {
    Global,
    Specific(CountryId),
}

impl CountryScope {
    pub fn is_global(&self) -> bool {
        matches!(self, CountryScope::Global)
    }

    pub fn country(&self) -> Option<CountryId> {
        match self {
            CountryScope::Global => None,
            CountryScope::Specific(cid) => Some(*cid),
        }
    }
}

impl From<Option<CountryId>> for CountryScope {
    fn from(country: Option<CountryId>) -> Self {
        match country {
            Some(cid) => CountryScope::Specific(cid),
            None => CountryScope::Global,
        }
    }
}

impl From<CountryScope> for Option<CountryId> {
    fn from(scope: CountryScope) -> Self {
        scope.country()
    }
}

// ********* Dimension keys ***********

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct SurveyKey {
    pub survey: SurveyId,
    pub country: CountryScope,
}

impl SurveyKey {
    pub fn global(&self) -> SurveyKey {
        SurveyKey {
            survey: self.survey,
            country: CountryScope::Global,
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct OrganizationKey {
    pub survey: SurveyId,
    pub country: CountryScope,
    pub organization: OrganizationId,
}

impl OrganizationKey {
    pub fn global(&self) -> OrganizationKey {
        OrganizationKey {
            country: CountryScope::Global,
            ..*self
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct QuestionKey {
    pub survey: SurveyId,
    pub country: CountryScope,
    pub representation: RepresentationId,
}

impl QuestionKey {
    pub fn global(&self) -> QuestionKey {
        QuestionKey {
            country: CountryScope::Global,
            ..*self
        }
    }
}

// ********* Input data structures ***********

/// One submitted response.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub survey: SurveyId,
    pub organization: OrganizationId,
    #[serde(default)]
    pub country: Option<CountryId>,
    #[serde(default)]
    pub region: Option<RegionId>,
    #[serde(default)]
    pub user: Option<UserId>,
    /// The bracket-notation payload, as posted by the answer form.
    #[serde(default)]
    pub body: String,
    /// Marks the current revision of a respondent's answer.
    #[serde(default)]
    pub is_updated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Country {
    pub id: CountryId,
    pub name: String,
    #[serde(rename = "useInReports", default)]
    pub use_in_reports: bool,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    pub country: CountryId,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    #[serde(default = "default_ordering")]
    pub ordering: u32,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Survey {
    pub id: SurveyId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub countries: Vec<CountryId>,
    #[serde(default)]
    pub organizations: Vec<OrganizationId>,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub survey: SurveyId,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: String,
}

/// A reporting view bound to one or more questions.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Representation {
    pub id: RepresentationId,
    pub survey: SurveyId,
    #[serde(default)]
    pub questions: Vec<QuestionId>,
    /// The raw type name. It is only checked when the representation is used.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_ordering")]
    pub ordering: u32,
    #[serde(default)]
    pub label1: String,
    #[serde(default)]
    pub label2: String,
    #[serde(default)]
    pub label3: String,
}

fn default_ordering() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

/// The representation types that have a reducer and a presentation builder.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum RepresentationType {
    AveragePercent,
    YesNo,
    MultiselectTop,
}

impl RepresentationType {
    pub const ALL: [RepresentationType; 3] = [
        RepresentationType::AveragePercent,
        RepresentationType::YesNo,
        RepresentationType::MultiselectTop,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RepresentationType::AveragePercent => "type_average_percent",
            RepresentationType::YesNo => "type_yes_no",
            RepresentationType::MultiselectTop => "type_multiselect_top",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RepresentationType::AveragePercent => "Average percent representation",
            RepresentationType::YesNo => "Representation for \"yes\" or \"no\" answers",
            RepresentationType::MultiselectTop => {
                "Top 1 and top 3 representation for ordered multiselect"
            }
        }
    }

    /// Looks up the registered type for a raw type name.
    pub fn parse(
        representation: RepresentationId,
        name: Option<&str>,
    ) -> Result<RepresentationType, StatError> {
        RepresentationType::ALL
            .iter()
            .find(|t| Some(t.name()) == name)
            .cloned()
            .ok_or_else(|| StatError::UnknownRepresentationType {
                representation,
                name: name.map(|s| s.to_string()),
            })
    }
}

// ******** Aggregate state *********

/// Response count of a survey, per country and globally.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SurveyStat {
    pub survey: SurveyId,
    pub country: CountryScope,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub last: Option<DateTime<Utc>>,
}

impl SurveyStat {
    pub fn new(key: SurveyKey) -> SurveyStat {
        SurveyStat {
            survey: key.survey,
            country: key.country,
            total: 0,
            last: None,
        }
    }

    pub fn key(&self) -> SurveyKey {
        SurveyKey {
            survey: self.survey,
            country: self.country,
        }
    }
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationStat {
    pub survey: SurveyId,
    pub country: CountryScope,
    pub organization: OrganizationId,
    #[serde(default)]
    pub total: u64,
    #[serde(default = "default_ordering")]
    pub ordering: u32,
}

impl OrganizationStat {
    pub fn new(key: OrganizationKey) -> OrganizationStat {
        OrganizationStat {
            survey: key.survey,
            country: key.country,
            organization: key.organization,
            total: 0,
            ordering: default_ordering(),
        }
    }

    pub fn key(&self) -> OrganizationKey {
        OrganizationKey {
            survey: self.survey,
            country: self.country,
            organization: self.organization,
        }
    }
}

/// Raw aggregate of one representation, plus its presentation-ready vars.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct QuestionStat {
    pub survey: SurveyId,
    pub country: CountryScope,
    pub representation: RepresentationId,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: crate::reducers::QuestionData,
    #[serde(default)]
    pub vars: JSValue,
    #[serde(default = "default_ordering")]
    pub ordering: u32,
}

impl QuestionStat {
    pub fn new(key: QuestionKey, representation: &Representation) -> QuestionStat {
        QuestionStat {
            survey: key.survey,
            country: key.country,
            representation: key.representation,
            kind: representation.kind.clone(),
            data: Default::default(),
            vars: JSValue::Null,
            ordering: representation.ordering,
        }
    }

    pub fn key(&self) -> QuestionKey {
        QuestionKey {
            survey: self.survey,
            country: self.country,
            representation: self.representation,
        }
    }
}

// ********* Pass configuration **********

/// Which answers of a survey a full pass iterates over.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum AnswerPolicy {
    /// Every answer ever recorded (full-history replay).
    Total,
    /// Only the current revision of each respondent (`is_updated`).
    Last,
}

impl AnswerPolicy {
    pub fn accepts(&self, answer: &Answer) -> bool {
        match self {
            AnswerPolicy::Total => true,
            AnswerPolicy::Last => answer.is_updated,
        }
    }
}

/// What a pass starts from.
///
/// - Accumulate adds the answers on top of the stored totals. Callers that
/// replay a full history must have cleared the storage beforehand.
///
/// - FromZero only uses the stored rows to discover the existing keys. Totals,
/// timestamps and data are reset before the answers are processed.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Baseline {
    Accumulate,
    FromZero,
}

#[derive(PartialEq, Debug, Clone)]
pub struct PassRules {
    pub policy: AnswerPolicy,
    pub baseline: Baseline,
    pub dependencies: Vec<crate::dependencies::DependencyRule>,
}

impl PassRules {
    pub const DEFAULT_RULES: PassRules = PassRules {
        policy: AnswerPolicy::Total,
        baseline: Baseline::FromZero,
        dependencies: Vec::new(),
    };
}

// ********* Errors **********

/// Errors that abort a pass.
#[derive(PartialEq, Debug, Clone)]
pub enum StatError {
    /// The bracket-notation payload could not be decoded.
    MalformedPayload { reason: String },
    /// The decoded payload has no `data` mapping.
    MissingDataKey,
    /// The value of a question does not have the shape its representation expects.
    TypeMismatch {
        question: QuestionId,
        expected: &'static str,
        found: String,
    },
    UnknownRepresentationType {
        representation: RepresentationId,
        name: Option<String>,
    },
    /// A stat row refers to a representation missing from the catalog.
    UnknownRepresentation { representation: RepresentationId },
    Encoding { reason: String },
}

impl Error for StatError {}

impl Display for StatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatError::MalformedPayload { reason } => write!(f, "malformed payload: {}", reason),
            StatError::MissingDataKey => write!(f, "the payload has no 'data' key"),
            StatError::TypeMismatch {
                question,
                expected,
                found,
            } => write!(
                f,
                "question {}: expected {}, found {}",
                question, expected, found
            ),
            StatError::UnknownRepresentationType {
                representation,
                name,
            } => write!(
                f,
                "representation {}: no reducer registered for type {:?}",
                representation, name
            ),
            StatError::UnknownRepresentation { representation } => {
                write!(f, "unknown representation {}", representation)
            }
            StatError::Encoding { reason } => write!(f, "could not encode vars: {}", reason),
        }
    }
}

pub type StatResult<T> = Result<T, StatError>;
