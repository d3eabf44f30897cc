use serde::de::DeserializeOwned;

use crate::stats::*;

pub fn read_json_file<T: DeserializeOwned>(path: &str) -> BReportResult<T> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let res: T = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    Ok(res)
}

/// Reads an array of answers.
pub fn read_json_answers(path: &str) -> BReportResult<Vec<Answer>> {
    let answers: Vec<Answer> = read_json_file(path)?;
    debug!("read_json_answers: {} answers in {:?}", answers.len(), path);
    Ok(answers)
}
