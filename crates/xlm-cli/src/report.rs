//! Text and JSON renderings of a run.

use std::collections::BTreeMap;

use base64::Engine as _;
use md5::Md5;
use serde::Serialize;
use sha2::{Digest, Sha256};
use xlm_engine::{MemoryRegion, TraceStep, VirtualFile};
use xlm_model::{Cell, DefinedNames, Workbook};

pub const DEFAULT_OUTPUT_FORMAT: &str = "CELL:[[CELL-ADDR]], [[STATUS]], [[INT-FORMULA]]";
pub const DEFAULT_EXTRACT_FORMAT: &str = "CELL:[[CELL-ADDR]], [[CELL-FORMULA]], [[CELL-VALUE]]";

/// Render one trace step through an output template.
pub fn format_step(step: &TraceStep, template: &str, with_indent: bool) -> String {
    let indent = if with_indent {
        "\t".repeat(step.indent)
    } else {
        String::new()
    };
    template
        .replace("[[CELL-ADDR]]", &format!("{:10}", step.address.to_a1()))
        .replace("[[STATUS]]", &format!("{:20}", step.status.as_str()))
        .replace("[[INT-FORMULA]]", &format!("{indent}{}", step.text))
}

/// Render one stored cell through an extraction template.
pub fn format_cell(cell: &Cell, template: &str) -> String {
    template
        .replace("[[CELL-ADDR]]", &cell.address.to_a1())
        .replace("[[CELL-FORMULA]]", cell.formula.as_deref().unwrap_or(""))
        .replace("[[CELL-VALUE]]", cell.value.as_deref().unwrap_or(""))
}

/// Macrosheet cells in listing order: formulas first, then plain values.
///
/// `sorted` orders each group column by column; otherwise rows come first.
pub fn extracted_cells(workbook: &Workbook, sorted: bool) -> Vec<(&str, Vec<&Cell>)> {
    workbook
        .macrosheets()
        .map(|(_, sheet)| {
            let mut cells = sheet.sorted_cells();
            if sorted {
                cells.sort_by_key(|c| (c.address.col, c.address.row));
            }
            let (mut formulas, values): (Vec<&Cell>, Vec<&Cell>) =
                cells.into_iter().partition(|c| c.formula.is_some());
            formulas.extend(values);
            (sheet.name.as_str(), formulas)
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct Record {
    pub index: usize,
    pub sheet: String,
    pub cell_add: String,
    pub status: String,
    pub formula: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MemoryRecord {
    pub base: u64,
    pub size: u64,
    pub data_hex: String,
}

#[derive(Debug, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub access: String,
    pub content_base64: String,
}

/// Structured report written by `--export-json`.
#[derive(Debug, Serialize)]
pub struct Report {
    pub file_path: String,
    pub md5_hash: String,
    pub sha256_hash: String,
    pub analysis_timestamp: i64,
    pub format_version: u32,
    pub defined_names: BTreeMap<String, String>,
    pub records: Vec<Record>,
    pub memory_records: Vec<MemoryRecord>,
    pub files: Vec<FileRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
}

impl Report {
    pub fn new(file_path: &str, content: &[u8], names: &DefinedNames) -> Self {
        Self {
            file_path: file_path.to_string(),
            md5_hash: hex::encode(Md5::digest(content)),
            sha256_hash: hex::encode(Sha256::digest(content)),
            analysis_timestamp: chrono::Utc::now().timestamp(),
            format_version: 1,
            defined_names: names
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            records: Vec::new(),
            memory_records: Vec::new(),
            files: Vec::new(),
            day_of_month: None,
        }
    }

    pub fn with_steps<'a>(mut self, steps: impl IntoIterator<Item = &'a TraceStep>) -> Self {
        self.records = steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| Record {
                index,
                sheet: step.sheet.clone(),
                cell_add: step.address.to_a1(),
                status: step.status.to_string(),
                formula: step.text.clone(),
                value: None,
            })
            .collect();
        self
    }

    pub fn with_cells(mut self, sheets: &[(&str, Vec<&Cell>)]) -> Self {
        self.records = sheets
            .iter()
            .flat_map(|(sheet, cells)| cells.iter().map(move |cell| (*sheet, *cell)))
            .enumerate()
            .map(|(index, (sheet, cell))| Record {
                index,
                sheet: sheet.to_string(),
                cell_add: cell.address.to_a1(),
                status: "EXTRACTED".to_string(),
                formula: cell.formula.clone().unwrap_or_default(),
                value: Some(cell.value.clone().unwrap_or_default()),
            })
            .collect();
        self
    }

    pub fn with_side_effects(mut self, memory: &[MemoryRegion], files: &[VirtualFile]) -> Self {
        self.memory_records = memory
            .iter()
            .map(|region| MemoryRecord {
                base: region.base,
                size: region.size(),
                data_hex: hex::encode(&region.data),
            })
            .collect();
        self.files = files
            .iter()
            .filter(|file| !file.content.is_empty())
            .map(|file| FileRecord {
                path: file.name.clone(),
                access: file.access.clone(),
                content_base64: base64::engine::general_purpose::STANDARD
                    .encode(file.content.as_bytes()),
            })
            .collect();
        self
    }

    pub fn with_day_of_month(mut self, day: Option<u32>) -> Self {
        self.day_of_month = day;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use xlm_engine::EvalStatus;
    use xlm_model::{CellLocation, LocalAddress, SheetId};

    fn step(indent: usize) -> TraceStep {
        let address = LocalAddress::new(1, 2);
        TraceStep {
            sheet: "Macro1".to_string(),
            address,
            status: EvalStatus::FullEvaluation,
            text: "CHAR(65)".to_string(),
            indent,
            location: CellLocation::new(SheetId(0), address),
        }
    }

    #[test]
    fn pads_fields_and_indents_formulas() {
        assert_eq!(
            format_step(&step(2), DEFAULT_OUTPUT_FORMAT, true),
            "CELL:A2        , FullEvaluation      , \t\tCHAR(65)"
        );
        assert_eq!(
            format_step(&step(2), "[[INT-FORMULA]]", false),
            "CHAR(65)"
        );
    }

    #[test]
    fn hashes_the_input_bytes() {
        let report = Report::new("x.json", b"abc", &DefinedNames::default());
        assert_eq!(report.md5_hash, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            report.sha256_hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn empty_files_are_left_out() {
        let files = vec![
            VirtualFile {
                name: "a.txt".to_string(),
                access: "3".to_string(),
                content: "hi".to_string(),
            },
            VirtualFile {
                name: "b.txt".to_string(),
                access: "1".to_string(),
                content: String::new(),
            },
        ];
        let report = Report::new("x.json", b"", &DefinedNames::default())
            .with_side_effects(&[], &files);
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].content_base64, "aGk=");
    }
}
