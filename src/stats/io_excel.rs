use calamine::{open_workbook, DataType, Reader, Xlsx};

use crate::stats::io_common::{column_index, excel_serial_to_utc, parse_timestamp};
use crate::stats::*;

/// The positions of the answer columns in the header row.
struct Columns {
    id: usize,
    survey: usize,
    organization: usize,
    country: Option<usize>,
    region: Option<usize>,
    user: Option<usize>,
    body: usize,
    is_updated: Option<usize>,
    created_at: usize,
}

impl Columns {
    fn from_header(header: &[DataType]) -> BReportResult<Columns> {
        let names: Vec<String> = header
            .iter()
            .map(|c| match c {
                DataType::String(s) => s.clone(),
                _ => String::new(),
            })
            .collect();
        let optional = |name: &str| column_index(&names, name).ok();
        Ok(Columns {
            id: column_index(&names, "id")?,
            survey: column_index(&names, "survey")?,
            organization: column_index(&names, "organization")?,
            country: optional("country"),
            region: optional("region"),
            user: optional("user"),
            body: column_index(&names, "body")?,
            is_updated: optional("is_updated"),
            created_at: column_index(&names, "created_at")?,
        })
    }
}

fn wrong_cell(lineno: usize, cell: &DataType) -> Box<ReportError> {
    Box::new(ReportError::ExcelWrongCellType {
        lineno: lineno as u64,
        content: format!("{:?}", cell),
    })
}

fn read_id(row: &[DataType], col: Option<usize>, lineno: usize) -> BReportResult<Option<u32>> {
    let cell = match col.and_then(|c| row.get(c)) {
        Some(cell) => cell,
        None => return Ok(None),
    };
    match cell {
        DataType::Empty => Ok(None),
        DataType::Int(i) if *i >= 0 && *i <= u32::MAX as i64 => Ok(Some(*i as u32)),
        DataType::Float(f) if f.fract() == 0.0 && *f >= 0.0 && *f <= u32::MAX as f64 => {
            Ok(Some(*f as u32))
        }
        DataType::String(s) if s.trim().is_empty() => Ok(None),
        DataType::String(s) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| wrong_cell(lineno, cell)),
        _ => Err(wrong_cell(lineno, cell)),
    }
}

fn read_required_id(row: &[DataType], col: usize, lineno: usize) -> BReportResult<u32> {
    match read_id(row, Some(col), lineno)? {
        Some(x) => Ok(x),
        None => Err(wrong_cell(lineno, &DataType::Empty)),
    }
}

fn read_body(row: &[DataType], col: usize, lineno: usize) -> BReportResult<String> {
    match row.get(col) {
        None | Some(DataType::Empty) => Ok(String::new()),
        Some(DataType::String(s)) => Ok(s.clone()),
        // A body made of digits only is stored as a number.
        Some(DataType::Int(i)) => Ok(i.to_string()),
        Some(DataType::Float(f)) if f.fract() == 0.0 => Ok(format!("{}", *f as i64)),
        Some(cell) => Err(wrong_cell(lineno, cell)),
    }
}

fn read_flag(row: &[DataType], col: Option<usize>, lineno: usize) -> BReportResult<bool> {
    let cell = match col.and_then(|c| row.get(c)) {
        Some(cell) => cell,
        None => return Ok(false),
    };
    match cell {
        DataType::Empty => Ok(false),
        DataType::Bool(b) => Ok(*b),
        DataType::Int(i) => Ok(*i != 0),
        DataType::Float(f) => Ok(*f != 0.0),
        DataType::String(s) => match s.trim().to_lowercase().as_str() {
            "" | "false" | "0" | "no" => Ok(false),
            "true" | "1" | "yes" => Ok(true),
            _ => Err(wrong_cell(lineno, cell)),
        },
        _ => Err(wrong_cell(lineno, cell)),
    }
}

fn read_created_at(
    row: &[DataType],
    col: usize,
    lineno: usize,
) -> BReportResult<chrono::DateTime<chrono::Utc>> {
    let cell = match row.get(col) {
        Some(cell) => cell,
        None => return Err(wrong_cell(lineno, &DataType::Empty)),
    };
    let res = match cell {
        DataType::DateTime(f) | DataType::Float(f) => excel_serial_to_utc(*f),
        DataType::Int(i) => excel_serial_to_utc(*i as f64),
        DataType::String(s) => parse_timestamp(s),
        _ => None,
    };
    res.ok_or_else(|| wrong_cell(lineno, cell))
}

fn get_range(path: &str, src: &AnswerSource) -> BReportResult<calamine::Range<DataType>> {
    debug!(
        "get_range: path: {:?} worksheet: {:?}",
        path, &src.worksheet_name
    );
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;

    let wrange = match &src.worksheet_name {
        // A worksheet name was provided, use it.
        Some(worksheet_name) => workbook.worksheet_range(worksheet_name),
        None => workbook.worksheet_range_at(0),
    };
    let wrange = wrange
        .context(EmptyExcelSnafu {})?
        .context(OpeningExcelSnafu { path })?;
    Ok(wrange)
}

/// Reads the answers of an Excel export. The first row names the columns.
pub fn read_excel_answers(path: &str, src: &AnswerSource) -> BReportResult<Vec<Answer>> {
    let wrange = get_range(path, src)?;

    let mut iter = wrange.rows();
    let header = iter.next().context(EmptyExcelSnafu {})?;
    debug!("read_excel_answers: header: {:?}", header);
    let cols = Columns::from_header(header)?;

    let mut res: Vec<Answer> = Vec::new();
    for (idx, row) in iter.enumerate() {
        // Line numbers as shown by spreadsheet programs.
        let lineno = idx + 2;
        if row.iter().all(|c| *c == DataType::Empty) {
            continue;
        }
        let answer = Answer {
            id: read_required_id(row, cols.id, lineno)?,
            survey: read_required_id(row, cols.survey, lineno)?,
            organization: read_required_id(row, cols.organization, lineno)?,
            country: read_id(row, cols.country, lineno)?,
            region: read_id(row, cols.region, lineno)?,
            user: read_id(row, cols.user, lineno)?,
            body: read_body(row, cols.body, lineno)?,
            is_updated: read_flag(row, cols.is_updated, lineno)?,
            created_at: read_created_at(row, cols.created_at, lineno)?,
        };
        debug!("read_excel_answers: line {}: {:?}", lineno, answer);
        res.push(answer);
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn header() -> Vec<DataType> {
        ["id", "survey", "organization", "country", "body", "created_at"]
            .iter()
            .map(|s| DataType::String(s.to_string()))
            .collect()
    }

    #[test]
    fn header_with_optional_columns() {
        let cols = Columns::from_header(&header()).unwrap();
        assert_eq!(cols.country, Some(3));
        assert_eq!(cols.region, None);
        assert_eq!(cols.created_at, 5);
        let mut h = header();
        h.remove(4);
        assert!(Columns::from_header(&h).is_err());
    }

    #[test]
    fn cells() {
        let row = vec![
            DataType::Float(3.0),
            DataType::String("2".to_string()),
            DataType::Int(111),
            DataType::Empty,
            DataType::Float(1.5),
            DataType::String("2017-01-02 00:00:00".to_string()),
        ];
        assert_eq!(read_required_id(&row, 0, 2).unwrap(), 3);
        assert_eq!(read_id(&row, Some(1), 2).unwrap(), Some(2));
        assert_eq!(read_id(&row, Some(3), 2).unwrap(), None);
        assert_eq!(read_id(&row, None, 2).unwrap(), None);
        assert!(read_id(&row, Some(4), 2).is_err());
        assert_eq!(read_body(&row, 2, 2).unwrap(), "111");
        assert_eq!(read_body(&row, 3, 2).unwrap(), "");
        assert!(!read_flag(&row, Some(3), 2).unwrap());
        assert!(read_flag(&row, Some(0), 2).unwrap());
        assert_eq!(
            read_created_at(&row, 5, 2).unwrap(),
            Utc.with_ymd_and_hms(2017, 1, 2, 0, 0, 0).unwrap()
        );
        assert!(read_created_at(&row, 3, 2).is_err());
    }
}
