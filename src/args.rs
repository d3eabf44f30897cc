use clap::Parser;

/// This program aggregates the answers of a survey into report-ready statistics.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The file describing the pass: the survey, the reference catalog and the answer sources.
    /// For more information about the file format, read the manual of the survey_stats crate.
    #[clap(short, long, value_parser)]
    pub config: String,

    /// (file path, optional) The JSON store holding the aggregates. It is read before the pass and written
    /// back after it. Setting this option overrides the path that may be specified with the --config option.
    #[clap(short, long, value_parser)]
    pub store: Option<String>,

    /// (file path, 'stdout' or empty) If specified, the report will be written in JSON format to the given
    /// location. Setting this option overrides the path that may be specified with the --config option.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path) A reference report in JSON format. If provided, surveystat will
    /// check that the computed report matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (total or last) Which answers are processed: all of them, or only the current revision of each respondent.
    #[clap(long, value_parser)]
    pub policy: Option<String>,

    /// (fromZero or accumulate) Whether the stored totals are discarded or extended by the pass.
    #[clap(long, value_parser)]
    pub baseline: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
