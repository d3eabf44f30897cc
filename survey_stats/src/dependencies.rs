use std::collections::HashSet;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::QuestionId;
use crate::query::{Node, Payload};

/// The condition of a dependency rule.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum DependencyKind {
    /// Fires when the ordered multiselect of the source question selected
    /// one of the trigger options.
    #[serde(rename = "set_radio")]
    SetRadio,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct DependencyTrigger {
    pub options: Vec<String>,
    /// The value written to the target question.
    #[serde(alias = "anwser")]
    pub answer: String,
}

/// Fills in the answer of `target` when the condition on `source` holds and
/// the respondent did not answer `target`.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRule {
    pub source: QuestionId,
    pub target: QuestionId,
    #[serde(rename = "type")]
    pub kind: DependencyKind,
    #[serde(rename = "additional")]
    pub trigger: DependencyTrigger,
}

impl DependencyRule {
    pub fn set_radio(
        source: QuestionId,
        target: QuestionId,
        options: &[&str],
        answer: &str,
    ) -> DependencyRule {
        DependencyRule {
            source,
            target,
            kind: DependencyKind::SetRadio,
            trigger: DependencyTrigger {
                options: options.iter().map(|s| s.to_string()).collect(),
                answer: answer.to_string(),
            },
        }
    }

    fn is_triggered(&self, payload: &Payload) -> bool {
        match self.kind {
            DependencyKind::SetRadio => {
                let selected = match payload.get(&self.source).and_then(ordered_selection) {
                    Some(s) => s,
                    None => return false,
                };
                let triggers: HashSet<&str> =
                    self.trigger.options.iter().map(|s| s.as_str()).collect();
                selected.iter().any(|s| triggers.contains(s))
            }
        }
    }
}

// The selections of an ordered multiselect, if the node has that shape.
fn ordered_selection(node: &Node) -> Option<Vec<&str>> {
    match node {
        Node::List(l) => l.iter().map(|n| n.as_str()).collect(),
        Node::Map(m) => match m.get("") {
            Some(Node::Value(s)) => Some(vec![s.as_str()]),
            Some(Node::List(l)) => l.iter().map(|n| n.as_str()).collect(),
            _ => None,
        },
        Node::Value(_) => None,
    }
}

/// Applies the rules to the decoded answers.
///
/// Every rule looks at the answers as they were submitted. When several
/// rules fire for the same target, the first one in rule order wins.
pub fn process_dependencies(rules: &[DependencyRule], payload: &mut Payload) {
    let fired: Vec<&DependencyRule> = rules
        .iter()
        .filter(|r| !payload.contains_key(&r.target) && r.is_triggered(payload))
        .collect();
    for rule in fired {
        if payload.contains_key(&rule.target) {
            continue;
        }
        debug!(
            "process_dependencies: question {} -> setting question {} to {:?}",
            rule.source, rule.target, rule.trigger.answer
        );
        payload.insert(rule.target, Node::Value(rule.trigger.answer.clone()));
    }
}
