//! Decoder for the bracket notation posted by the answer form.
//!
//! `data[12][]=A&data[12][]=B&data[9][main]=X&data[16]=xxx` decodes to
//! `{data: {12: [A, B], 9: {main: X}, 16: xxx}}`.
//!
//! The legacy form also mixes both kinds of brackets on one path: the
//! ordered multiselect posts `data[3][]=a&data[3][]=b&data[3][other]=`. Such
//! a node becomes a mapping where the empty key holds the selections, as a
//! string when there is a single one and as a sequence otherwise.

use std::collections::BTreeMap;

use log::debug;

use crate::config::{QuestionId, StatError, StatResult};

/// A decoded node.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Node {
    Value(String),
    List(Vec<Node>),
    Map(BTreeMap<String, Node>),
}

impl Node {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Value(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// A short description of the shape, for error messages.
    pub fn shape(&self) -> String {
        match self {
            Node::Value(s) => format!("value {:?}", s),
            Node::List(l) => format!("sequence of {} elements", l.len()),
            Node::Map(m) => format!(
                "mapping with keys {:?}",
                m.keys().cloned().collect::<Vec<String>>()
            ),
        }
    }
}

/// The decoded answers, keyed by question id.
pub type Payload = BTreeMap<QuestionId, Node>;

// Intermediate tree: appended and named children are kept apart until the
// whole query string is read.
#[derive(Debug)]
enum Slot {
    Leaf(String),
    Branch {
        named: BTreeMap<String, Slot>,
        appended: Vec<String>,
    },
}

impl Slot {
    fn empty_branch() -> Slot {
        Slot::Branch {
            named: BTreeMap::new(),
            appended: Vec::new(),
        }
    }

    fn into_node(self) -> Node {
        match self {
            Slot::Leaf(s) => Node::Value(s),
            Slot::Branch { named, appended } if named.is_empty() => {
                Node::List(appended.into_iter().map(Node::Value).collect())
            }
            Slot::Branch {
                named,
                mut appended,
            } => {
                let mut m: BTreeMap<String, Node> = named
                    .into_iter()
                    .map(|(k, v)| (k, v.into_node()))
                    .collect();
                match appended.len() {
                    0 => {}
                    1 => {
                        m.insert("".to_string(), Node::Value(appended.remove(0)));
                    }
                    _ => {
                        m.insert(
                            "".to_string(),
                            Node::List(appended.into_iter().map(Node::Value).collect()),
                        );
                    }
                }
                Node::Map(m)
            }
        }
    }
}

fn malformed(reason: String) -> StatError {
    StatError::MalformedPayload { reason }
}

/// Decodes a url-encoded query string in bracket notation.
///
/// The root is always a mapping from the top-level names.
pub fn parse_query_string(query: &str) -> StatResult<BTreeMap<String, Node>> {
    let mut root: BTreeMap<String, Slot> = BTreeMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = pair
            .split_once('=')
            .ok_or_else(|| malformed(format!("no '=' in {:?}", pair)))?;
        let key = decode_component(raw_key)?;
        let value = decode_component(raw_value)?;
        let (name, segments) = split_key(&key)?;
        insert(&mut root, name, &segments, value, &key)?;
    }
    Ok(root.into_iter().map(|(k, v)| (k, v.into_node())).collect())
}

fn decode_component(s: &str) -> StatResult<String> {
    let spaced = s.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|c| c.into_owned())
        .map_err(|e| malformed(format!("invalid percent-encoding in {:?}: {}", s, e)))
}

// Splits `name[a][][b]` into `name` and `[Some(a), None, Some(b)]`.
fn split_key(key: &str) -> StatResult<(String, Vec<Option<String>>)> {
    let (name, mut rest) = match key.find('[') {
        Some(idx) => (&key[..idx], &key[idx..]),
        None => (key, ""),
    };
    if name.is_empty() {
        return Err(malformed(format!("empty name in key {:?}", key)));
    }
    if name.contains(']') {
        return Err(malformed(format!("unbalanced brackets in key {:?}", key)));
    }
    let mut segments: Vec<Option<String>> = Vec::new();
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(malformed(format!("unexpected text after ']' in {:?}", key)));
        }
        let close = rest
            .find(']')
            .ok_or_else(|| malformed(format!("unbalanced brackets in key {:?}", key)))?;
        let content = &rest[1..close];
        if content.contains('[') {
            return Err(malformed(format!("unbalanced brackets in key {:?}", key)));
        }
        segments.push(if content.is_empty() {
            None
        } else {
            Some(content.to_string())
        });
        rest = &rest[close + 1..];
    }
    Ok((name.to_string(), segments))
}

fn insert(
    root: &mut BTreeMap<String, Slot>,
    name: String,
    segments: &[Option<String>],
    value: String,
    key: &str,
) -> StatResult<()> {
    if segments.is_empty() {
        // A later plain assignment replaces an earlier one.
        return match root.get(&name) {
            Some(Slot::Branch { .. }) => Err(malformed(format!(
                "{:?} is used both as a value and as a container",
                key
            ))),
            _ => {
                root.insert(name, Slot::Leaf(value));
                Ok(())
            }
        };
    }
    let slot = root.entry(name).or_insert_with(Slot::empty_branch);
    insert_segments(slot, segments, value, key)
}

fn insert_segments(
    slot: &mut Slot,
    segments: &[Option<String>],
    value: String,
    key: &str,
) -> StatResult<()> {
    let (named, appended) = match slot {
        Slot::Leaf(_) => {
            return Err(malformed(format!(
                "{:?} is used both as a value and as a container",
                key
            )))
        }
        Slot::Branch { named, appended } => (named, appended),
    };
    match segments {
        [] => Err(malformed(format!("empty path in {:?}", key))),
        [None] => {
            appended.push(value);
            Ok(())
        }
        [None, ..] => Err(malformed(format!(
            "nested brackets after '[]' are not supported in {:?}",
            key
        ))),
        [Some(k)] => match named.get(k) {
            Some(Slot::Branch { .. }) => Err(malformed(format!(
                "{:?} is used both as a value and as a container",
                key
            ))),
            _ => {
                named.insert(k.clone(), Slot::Leaf(value));
                Ok(())
            }
        },
        [Some(k), rest @ ..] => {
            let child = named.entry(k.clone()).or_insert_with(Slot::empty_branch);
            insert_segments(child, rest, value, key)
        }
    }
}

/// Extracts the answers of the `data` root, keyed by question id.
///
/// Keys of `data` that are not question ids are dropped.
pub fn extract_data(mut root: BTreeMap<String, Node>) -> StatResult<Payload> {
    let data = match root.remove("data") {
        Some(Node::Map(m)) => m,
        _ => return Err(StatError::MissingDataKey),
    };
    let mut payload = Payload::new();
    for (k, v) in data {
        match k.parse::<QuestionId>() {
            Ok(qid) => {
                payload.insert(qid, v);
            }
            Err(_) => {
                debug!("extract_data: skipping non-question key {:?}", k);
            }
        }
    }
    Ok(payload)
}
