/*!

This is the long-form manual for `survey_stats` and `surveystat`.

## Pipeline

One pass aggregates the answers of one survey:

1. the stored rows of the survey are loaded (`Evaluator::load_stat`)
2. the missing rows are created for the global rollup and for every country
   of the survey that is used in reports (`Evaluator::fill_out`)
3. every selected answer is decoded and added (`Evaluator::process_answer`)
4. the vars of every question stat are rebuilt and all the rows are written
   back (`Evaluator::save`)

`process_answers` chains the four steps. A single bad answer aborts the pass
before anything is written.

## Answer payload

The body of an answer uses the bracket notation of the answer form:

```text
data[1][main]=10&data[1][additional]=&data[2]=Yes&data[3][]=Age&data[3][]=Efficacy&data[3][]=&data[3][other]=
```

decodes to:

```text
1: {main: "10", additional: ""}
2: "Yes"
3: {"": ["Age", "Efficacy", ""], other: ""}
```

Keys of `data` that are not integers are ignored. A body that is empty
contributes nothing. A body without a `data` mapping is an error.

## Representation types

### `type_average_percent`

The question posts `{main, additional}`. `main` is a number. A blank `main`
is not counted. The vars show the rounded mean per region (or per country for
the global row) and per organization, `-1` when there is no answer, and a pie
`[mean, 100 - mean]` labelled with `label2` and `label3`.

### `type_yes_no`

The question posts a single value. `Yes` counts as yes, anything else as no.
The vars show `(yes, no)` pairs per region and per organization, `(-1, -1)`
when there is no answer, and a pie `[no, yes]`.

### `type_multiselect_top`

The question posts an ordered selection. The first option is counted in
`top1`, the first three distinct options in `top3`. Options go through the
option normalizer, so `AGE` and `Age` are the same option.

For each of `top1` and `top3` the vars hold:
- `pie`: the three most frequent options, `Other` for the rest, always four
  slices. `hide_last_legend_item` is set when `Other` is present.
- `table`: the ten most frequent options as `(count, label, percent)`.
- `org_table`: the same rows with the percent of each organization.

Ties are broken by the label.

## Configuration

`surveystat` reads a configuration file in JSON:

```json
{
  "outputSettings": {"reportName": "demo", "outputPath": "demo_report.json"},
  "survey": 1,
  "catalogPath": "catalog.json",
  "storePath": "store.json",
  "answerSources": [{"provider": "json", "filePath": "answers.json"}],
  "rules": {"policy": "total", "baseline": "fromZero"},
  "dependencies": [
    {"source": 3, "target": 5, "type": "set_radio",
     "additional": {"options": ["Aripiprazole-oral"], "anwser": "Yes"}}
  ]
}
```

- `provider` is `json` (an array of answers) or `xlsx` (an Excel export with
  the columns `id, survey, organization, country, region, user, body,
  is_updated, created_at`, `worksheetName` optional).
- `policy`: `total` replays every answer, `last` only the answers marked
  `is_updated`.
- `baseline`: `fromZero` discards the stored totals and data before the pass
  (the stored rows are kept), `accumulate` adds to them. Running `accumulate`
  twice over the same answers counts them twice.

Paths are relative to the configuration file.

 */
