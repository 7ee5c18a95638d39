use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Reader, Xlsx};
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{idtype, Choice};

idtype!(KeySetName);

/// A question number followed by the first A-D letter after it, e.g.
/// `5 - c`, `12. B` or `7) d`.
const KEY_CELL_PATTERN: &str = r"(?i)^\D*?(\d+)[^a-d]*([a-d])";

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("unknown answer key set: {0}")]
    UnknownKeySet(KeySetName),
    #[error("answer key set {0} has no entries")]
    EmptyKeySet(KeySetName),
    #[error("no answer key sets loaded")]
    NoKeySets,
    #[error("unable to read answer keys {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("unable to parse answer keys: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("answer key set {set} has an invalid entry: {entry}")]
    InvalidEntry { set: KeySetName, entry: String },
    #[error("unable to read answer key spreadsheet: {0}")]
    Csv(#[from] csv::Error),
    #[error("unable to read answer key workbook {0}: {1}")]
    Workbook(PathBuf, #[source] calamine::XlsxError),
    #[error("answer key workbook {0} has no worksheets")]
    EmptyWorkbook(PathBuf),
    #[error("unsupported answer key file {0}, expected .json, .csv or .xlsx")]
    UnsupportedFormat(PathBuf),
    #[error("invalid key cell pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Correct choices by zero-based question index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnswerKey(BTreeMap<usize, Choice>);

impl AnswerKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a key whose `i`-th entry answers question `i`.
    pub fn from_choices(choices: impl IntoIterator<Item = Choice>) -> Self {
        Self(choices.into_iter().enumerate().collect())
    }

    pub fn insert(&mut self, question: usize, choice: Choice) -> Option<Choice> {
        self.0.insert(question, choice)
    }

    pub fn get(&self, question: usize) -> Option<Choice> {
        self.0.get(&question).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Choice)> + '_ {
        self.0.iter().map(|(question, choice)| (*question, *choice))
    }
}

/// A JSON key set is either a list of letters in question order or an object
/// from 1-based question numbers to letters.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeySetJson {
    List(Vec<Choice>),
    Numbered(BTreeMap<String, Choice>),
}

/// Named answer key sets in the order they were first loaded. That order
/// decides ties when a sheet matches several sets equally well.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerKeyStore {
    sets: Vec<(KeySetName, AnswerKey)>,
}

impl AnswerKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a set. Replacing an existing set keeps its original position.
    pub fn insert(&mut self, name: KeySetName, key: AnswerKey) {
        match self.sets.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing_key)) => {
                warn!("answer key set {} loaded twice, keeping the later one", name);
                *existing_key = key;
            }
            None => self.sets.push((name, key)),
        }
    }

    /// Looks up a set by name. Empty sets are rejected since nothing could be
    /// scored against them.
    pub fn get(&self, name: &KeySetName) -> Result<&AnswerKey, KeyStoreError> {
        match self.sets.iter().find(|(existing, _)| existing == name) {
            Some((_, key)) if key.is_empty() => Err(KeyStoreError::EmptyKeySet(name.clone())),
            Some((_, key)) => Ok(key),
            None => Err(KeyStoreError::UnknownKeySet(name.clone())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeySetName, &AnswerKey)> {
        self.sets.iter().map(|(name, key)| (name, key))
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Loads a `.json` store, or a `.csv` export or `.xlsx` workbook holding
    /// one set named after the file.
    pub fn load(&mut self, path: &Path) -> Result<(), KeyStoreError> {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
        let key = match extension.as_deref() {
            Some("json") => return self.extend_from_json(&read_key_file(path)?),
            Some("csv") => parse_spreadsheet(&read_key_file(path)?)?,
            Some("xlsx") => read_workbook(path)?,
            _ => return Err(KeyStoreError::UnsupportedFormat(path.to_path_buf())),
        };

        let name = key_set_name_for_path(path);
        debug!("loaded {} answers for key set {} from {}", key.len(), name, path.display());
        self.insert(name, key);
        Ok(())
    }

    /// Adds every set of a JSON store, in the order they appear in the
    /// document.
    pub fn extend_from_json(&mut self, json: &str) -> Result<(), KeyStoreError> {
        let sets: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;
        for (name, value) in sets {
            let name = KeySetName::from(name);
            let key = match serde_json::from_value::<KeySetJson>(value)? {
                KeySetJson::List(choices) => AnswerKey::from_choices(choices),
                KeySetJson::Numbered(entries) => {
                    let mut key = AnswerKey::new();
                    for (number, choice) in entries {
                        let question = question_index(&number).ok_or_else(|| {
                            KeyStoreError::InvalidEntry {
                                set: name.clone(),
                                entry: number.clone(),
                            }
                        })?;
                        key.insert(question, choice);
                    }
                    key
                }
            };
            debug!("loaded {} answers for key set {}", key.len(), name);
            self.insert(name, key);
        }
        Ok(())
    }
}

fn read_key_file(path: &Path) -> Result<String, KeyStoreError> {
    std::fs::read_to_string(path).map_err(|e| KeyStoreError::Read(path.to_path_buf(), e))
}

/// Converts a 1-based question number to an index.
fn question_index(number: &str) -> Option<usize> {
    number.trim().parse::<usize>().ok()?.checked_sub(1)
}

/// The set name for a spreadsheet export is its file stem with spaces
/// replaced by underscores.
pub fn key_set_name_for_path(path: &Path) -> KeySetName {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    KeySetName::from(stem.replace(' ', "_"))
}

/// Parses key cells such as `5 - c`.
pub struct KeyCellParser {
    pattern: Regex,
}

impl KeyCellParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(KEY_CELL_PATTERN)?,
        })
    }

    /// Returns the declared 1-based question number and the choice, or `None`
    /// when the cell does not follow the `<number>-<letter>` form.
    pub fn parse(&self, cell: &str) -> Option<(usize, Choice)> {
        let captures = self.pattern.captures(cell.trim())?;
        let number = captures.get(1)?.as_str().parse::<usize>().ok()?;
        if number == 0 {
            return None;
        }
        let letter = captures.get(2)?.as_str().chars().next()?;
        Some((number, Choice::from_letter(letter).ok()?))
    }
}

/// Builds a key from spreadsheet cells. Each cell declares its own question
/// number, so cell order only matters for duplicates, where the later cell
/// wins. Cells that do not parse, such as headers, are skipped.
fn key_from_cells<S: AsRef<str>>(cells: impl IntoIterator<Item = S>) -> Result<AnswerKey, KeyStoreError> {
    let parser = KeyCellParser::new()?;
    let mut key = AnswerKey::new();
    for cell in cells {
        let cell = cell.as_ref().trim();
        if cell.is_empty() {
            continue;
        }
        match parser.parse(cell) {
            Some((number, choice)) => {
                if let Some(previous) = key.insert(number - 1, choice) {
                    warn!(
                        "question {} listed twice ({} then {}), keeping {}",
                        number, previous, choice, choice
                    );
                }
            }
            None => debug!("skipping key cell {:?}", cell),
        }
    }
    Ok(key)
}

/// Reads every cell of a comma-separated spreadsheet export. Rows may have
/// different lengths.
pub fn parse_spreadsheet(text: &str) -> Result<AnswerKey, KeyStoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut cells = Vec::new();
    for record in reader.records() {
        cells.extend(record?.iter().map(str::to_string));
    }
    key_from_cells(cells)
}

/// Reads every cell of the first worksheet of an Excel workbook.
pub fn read_workbook(path: &Path) -> Result<AnswerKey, KeyStoreError> {
    let mut workbook: Xlsx<_> =
        open_workbook(path).map_err(|e| KeyStoreError::Workbook(path.to_path_buf(), e))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| KeyStoreError::EmptyWorkbook(path.to_path_buf()))?
        .map_err(|e| KeyStoreError::Workbook(path.to_path_buf(), e))?;
    key_from_cells(range.rows().flatten().map(|cell| cell.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn choice(letter: char) -> Choice {
        Choice::from_letter(letter).unwrap()
    }

    fn parse_key_cell(cell: &str) -> Option<(usize, Choice)> {
        KeyCellParser::new().unwrap().parse(cell)
    }

    #[test]
    fn test_parse_key_cell() {
        assert_eq!(parse_key_cell("5 - c"), Some((5, choice('C'))));
        assert_eq!(parse_key_cell("12. B"), Some((12, choice('B'))));
        assert_eq!(parse_key_cell("7)d"), Some((7, choice('D'))));
        assert_eq!(parse_key_cell("Q3-a"), Some((3, choice('A'))));
        assert_eq!(parse_key_cell("Answer"), None);
        assert_eq!(parse_key_cell("4 - e"), None);
        assert_eq!(parse_key_cell("0 - a"), None);
        assert_eq!(parse_key_cell(""), None);
    }

    #[test]
    fn test_json_store_keeps_document_order() {
        let mut store = AnswerKeyStore::new();
        store
            .extend_from_json(
                r#"{
                    "zeta": ["A", "B", "C"],
                    "alpha": { "1": "d", "3": "b" }
                }"#,
            )
            .unwrap();

        let names: Vec<_> = store.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        let alpha = store.get(&KeySetName::from("alpha".to_string())).unwrap();
        assert_eq!(alpha.len(), 2);
        assert_eq!(alpha.get(0), Some(choice('D')));
        assert_eq!(alpha.get(1), None);
        assert_eq!(alpha.get(2), Some(choice('B')));
    }

    #[test]
    fn test_json_store_rejects_bad_numbers() {
        let mut store = AnswerKeyStore::new();
        let result = store.extend_from_json(r#"{ "set": { "0": "A" } }"#);
        assert!(matches!(result, Err(KeyStoreError::InvalidEntry { .. })));
        let result = store.extend_from_json(r#"{ "set": ["Z1"] }"#);
        assert!(matches!(result, Err(KeyStoreError::Parse(_))));
    }

    #[test]
    fn test_lookup_errors() {
        let mut store = AnswerKeyStore::new();
        store.insert(KeySetName::from("empty".to_string()), AnswerKey::new());
        assert!(matches!(
            store.get(&KeySetName::from("missing".to_string())),
            Err(KeyStoreError::UnknownKeySet(_))
        ));
        assert!(matches!(
            store.get(&KeySetName::from("empty".to_string())),
            Err(KeyStoreError::EmptyKeySet(_))
        ));
    }

    #[test]
    fn test_load_spreadsheet_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Set B.csv");
        std::fs::write(
            &path,
            "Answers,Answers\n\"1 - a\",\"4 - d\"\n2 - B,5.c\n3 - c,\n",
        )
        .unwrap();

        let mut store = AnswerKeyStore::new();
        store.load(&path).unwrap();
        let key = store.get(&KeySetName::from("Set_B".to_string())).unwrap();
        let letters: Vec<_> = key.iter().map(|(q, c)| (q, c.letter())).collect();
        assert_eq!(
            letters,
            vec![(0, 'A'), (1, 'B'), (2, 'C'), (3, 'D'), (4, 'C')]
        );
    }

    #[test]
    fn test_quoted_cells_may_contain_commas() {
        let key = parse_spreadsheet("\"1, b\",\"2 - c\"\n\"3 -, d\"\n").unwrap();
        let letters: Vec<_> = key.iter().map(|(q, c)| (q, c.letter())).collect();
        assert_eq!(letters, vec![(0, 'B'), (1, 'C'), (2, 'D')]);
    }

    #[test]
    fn test_load_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Set A.xlsx");
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let worksheet = workbook.add_worksheet();
        // one subject per column, numbered across the whole sheet
        worksheet.write_string(0, 0, "Python").unwrap();
        worksheet.write_string(1, 0, "1 - a").unwrap();
        worksheet.write_string(2, 0, "2 - d").unwrap();
        worksheet.write_string(0, 1, "Statistics").unwrap();
        worksheet.write_string(1, 1, "3. b").unwrap();
        worksheet.write_string(2, 1, "4 - C").unwrap();
        workbook.save(&path).unwrap();

        let mut store = AnswerKeyStore::new();
        store.load(&path).unwrap();
        let key = store.get(&KeySetName::from("Set_A".to_string())).unwrap();
        let letters: Vec<_> = key.iter().map(|(q, c)| (q, c.letter())).collect();
        assert_eq!(letters, vec![(0, 'A'), (1, 'D'), (2, 'B'), (3, 'C')]);
    }

    #[test]
    fn test_load_rejects_corrupt_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, "not a zip archive").unwrap();
        let mut store = AnswerKeyStore::new();
        assert!(matches!(
            store.load(&path),
            Err(KeyStoreError::Workbook(..))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let mut store = AnswerKeyStore::new();
        assert!(matches!(
            store.load(Path::new("keys.ods")),
            Err(KeyStoreError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            store.load(Path::new("/definitely/missing/keys.json")),
            Err(KeyStoreError::Read(..))
        ));
    }

    #[test]
    fn test_reloading_a_set_keeps_its_position() {
        let mut store = AnswerKeyStore::new();
        let a = KeySetName::from("a".to_string());
        let b = KeySetName::from("b".to_string());
        store.insert(a.clone(), AnswerKey::from_choices([choice('A')]));
        store.insert(b, AnswerKey::from_choices([choice('B')]));
        store.insert(a.clone(), AnswerKey::from_choices([choice('C')]));

        assert_eq!(store.len(), 2);
        assert_eq!(store.iter().next().unwrap().0, &a);
        assert_eq!(store.get(&a).unwrap().get(0), Some(choice('C')));
    }

    proptest! {
        #[test]
        fn key_cells_parse_number_and_letter(
            number in 1usize..1000,
            letter in prop::sample::select(vec!['a', 'b', 'c', 'd', 'A', 'B', 'C', 'D']),
            separator in prop::sample::select(vec![" - ", "-", ". ", ")", " ", ":"]),
        ) {
            let cell = format!("{}{}{}", number, separator, letter);
            prop_assert_eq!(parse_key_cell(&cell), Some((number, choice(letter))));
        }
    }
}
