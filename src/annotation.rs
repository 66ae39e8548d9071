//! HPO annotation (`phenotype.hpoa`) table
//!
//! The table is tab-separated with `#`-prefixed header comments, one column
//! header row and twelve text columns. Values are never coerced: frequencies
//! such as `7/13` and dates inside biocuration stamps stay strings.
//!
//! Rows are identified by `(database_id, hpo_id)` for reconciliation; beyond
//! that key they are opaque field bags.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, Write};
use std::path::Path;

/// Column order of the annotation table
pub const COLUMNS: [&str; 12] = [
    "database_id",
    "disease_name",
    "qualifier",
    "hpo_id",
    "reference",
    "evidence",
    "onset",
    "frequency",
    "sex",
    "modifier",
    "aspect",
    "biocuration",
];

/// Valid `evidence` codes
pub const EVIDENCE_CODES: &[&str] = &["IEA", "PCS", "TAS"];

/// Valid `aspect` codes
pub const ASPECTS: &[&str] = &["P", "I", "C", "M"];

lazy_static::lazy_static! {
    static ref HP_TERM: Regex = Regex::new(r"^HP:\d{7}$").unwrap();
    static ref RATIO: Regex = Regex::new(r"^(\d+)/(\d+)$").unwrap();
    static ref PERCENT: Regex = Regex::new(r"^(\d+(?:\.\d+)?)%$").unwrap();
    static ref BIOCURATION: Regex =
        Regex::new(r"^[A-Za-z][\w-]*:[^\[\];]+\[\d{4}-\d{2}-\d{2}\]$").unwrap();
}

/// Error type for annotation table I/O
#[derive(Debug, thiserror::Error)]
pub enum AnnotationError {
    #[error("malformed annotation source: {0}")]
    MalformedSource(String),
    #[error("annotation I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnnotationError>;

/// One disease-phenotype association
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationRow {
    pub database_id: String,
    pub disease_name: String,
    pub qualifier: String,
    pub hpo_id: String,
    pub reference: String,
    pub evidence: String,
    pub onset: String,
    pub frequency: String,
    pub sex: String,
    pub modifier: String,
    pub aspect: String,
    pub biocuration: String,
}

/// Identity of a row for merge purposes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    pub database_id: String,
    pub hpo_id: String,
}

impl RowKey {
    pub fn new(database_id: impl Into<String>, hpo_id: impl Into<String>) -> Self {
        Self {
            database_id: database_id.into(),
            hpo_id: hpo_id.into(),
        }
    }

    /// Both halves present
    pub fn is_complete(&self) -> bool {
        !self.database_id.is_empty() && !self.hpo_id.is_empty()
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.database_id, self.hpo_id)
    }
}

/// A field that breaks the HPOA format rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldProblem {
    pub column: &'static str,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.column, self.value, self.reason)
    }
}

impl AnnotationRow {
    /// Build a row from table fields in [`COLUMNS`] order.
    ///
    /// Missing trailing fields are empty.
    pub fn from_fields(fields: &[&str]) -> Self {
        let mut row = Self::default();
        for (column, value) in COLUMNS.iter().zip(fields.iter()) {
            row.set(column, value);
        }
        row
    }

    /// Field values in [`COLUMNS`] order
    pub fn fields(&self) -> [&str; 12] {
        [
            &self.database_id,
            &self.disease_name,
            &self.qualifier,
            &self.hpo_id,
            &self.reference,
            &self.evidence,
            &self.onset,
            &self.frequency,
            &self.sex,
            &self.modifier,
            &self.aspect,
            &self.biocuration,
        ]
    }

    pub fn key(&self) -> RowKey {
        RowKey::new(self.database_id.clone(), self.hpo_id.clone())
    }

    pub fn has_key(&self, key: &RowKey) -> bool {
        self.database_id == key.database_id && self.hpo_id == key.hpo_id
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        COLUMNS
            .iter()
            .position(|c| *c == column)
            .map(|i| self.fields()[i])
    }

    /// Set a column by name. Returns `false` for unknown columns.
    pub fn set(&mut self, column: &str, value: &str) -> bool {
        let slot = match column {
            "database_id" => &mut self.database_id,
            "disease_name" => &mut self.disease_name,
            "qualifier" => &mut self.qualifier,
            "hpo_id" => &mut self.hpo_id,
            "reference" => &mut self.reference,
            "evidence" => &mut self.evidence,
            "onset" => &mut self.onset,
            "frequency" => &mut self.frequency,
            "sex" => &mut self.sex,
            "modifier" => &mut self.modifier,
            "aspect" => &mut self.aspect,
            "biocuration" => &mut self.biocuration,
            _ => return false,
        };
        *slot = value.to_string();
        true
    }

    /// Append a biocuration entry, e.g. `HPO:jdoe[2025-07-11]`.
    ///
    /// The first entry of the field records creation; later entries are
    /// appended after a semicolon. A curator without a namespace gets `HPO:`.
    pub fn stamp(&mut self, curator: &str, date: NaiveDate) {
        let who = if curator.contains(':') {
            curator.to_string()
        } else {
            format!("HPO:{}", curator)
        };
        let entry = format!("{}[{}]", who, date.format("%Y-%m-%d"));
        if self.biocuration.trim().is_empty() {
            self.biocuration = entry;
        } else {
            self.biocuration = format!("{};{}", self.biocuration, entry);
        }
    }

    /// Check the row against the HPOA field rules
    pub fn validate(&self) -> Vec<FieldProblem> {
        let mut problems = Vec::new();
        let mut problem = |column: &'static str, value: &str, reason: &str| {
            problems.push(FieldProblem {
                column,
                value: value.to_string(),
                reason: reason.to_string(),
            });
        };

        if crate::curie::Curie::parse(&self.database_id).is_err() {
            problem("database_id", &self.database_id, "expected a CURIE such as OMIM:301500");
        }
        if !HP_TERM.is_match(&self.hpo_id) {
            problem("hpo_id", &self.hpo_id, "expected an HP term id");
        }
        if !matches!(self.qualifier.as_str(), "" | "NOT") {
            problem("qualifier", &self.qualifier, "must be empty or NOT");
        }
        if !EVIDENCE_CODES.contains(&self.evidence.as_str()) {
            problem("evidence", &self.evidence, "must be one of IEA, PCS, TAS");
        }
        if !self.onset.is_empty() && !HP_TERM.is_match(&self.onset) {
            problem("onset", &self.onset, "expected an HP term id");
        }
        if !self.frequency.is_empty() && !is_valid_frequency(&self.frequency) {
            problem("frequency", &self.frequency, "expected an HP term id, n/m or a percentage");
        }
        if !self.sex.is_empty()
            && !self.sex.eq_ignore_ascii_case("MALE")
            && !self.sex.eq_ignore_ascii_case("FEMALE")
        {
            problem("sex", &self.sex, "must be empty, MALE or FEMALE");
        }
        if !self.modifier.is_empty() && !self.modifier.split(';').all(|m| HP_TERM.is_match(m.trim())) {
            problem("modifier", &self.modifier, "expected HP term ids separated by ';'");
        }
        if !ASPECTS.contains(&self.aspect.as_str()) {
            problem("aspect", &self.aspect, "must be one of P, I, C, M");
        }
        if self.biocuration.is_empty() || !self.biocuration.split(';').all(|e| BIOCURATION.is_match(e)) {
            problem("biocuration", &self.biocuration, "expected entries like HPO:name[YYYY-MM-DD]");
        }

        problems
    }
}

/// `HP:0040282`, `7/13` (n ≤ m, m > 0) or `17%` (0–100)
pub fn is_valid_frequency(value: &str) -> bool {
    if HP_TERM.is_match(value) {
        return true;
    }
    if let Some(caps) = RATIO.captures(value) {
        let n: u64 = caps[1].parse().unwrap_or(u64::MAX);
        let m: u64 = caps[2].parse().unwrap_or(0);
        return m > 0 && n <= m;
    }
    if let Some(caps) = PERCENT.captures(value) {
        return caps[1].parse::<f64>().map(|p| p <= 100.0).unwrap_or(false);
    }
    false
}

fn sanitize(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

/// The annotation table: preserved header comments plus rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationStore {
    comments: Vec<String>,
    rows: Vec<AnnotationRow>,
}

impl AnnotationStore {
    pub fn new(rows: Vec<AnnotationRow>) -> Self {
        Self {
            comments: Vec::new(),
            rows,
        }
    }

    /// Parse a table from any buffered reader
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut comments = Vec::new();
        let mut rows = Vec::new();
        let mut header_seen = false;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.starts_with('#') {
                if !header_seen {
                    comments.push(line.to_string());
                }
                continue;
            }
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if !header_seen {
                if fields != COLUMNS {
                    return Err(AnnotationError::MalformedSource(format!(
                        "line {}: expected header '{}', found '{}'",
                        index + 1,
                        COLUMNS.join("\\t"),
                        fields.join("\\t")
                    )));
                }
                header_seen = true;
                continue;
            }
            if fields.len() > COLUMNS.len() {
                return Err(AnnotationError::MalformedSource(format!(
                    "line {}: expected {} fields, found {}",
                    index + 1,
                    COLUMNS.len(),
                    fields.len()
                )));
            }
            rows.push(AnnotationRow::from_fields(&fields));
        }

        if !header_seen {
            return Err(AnnotationError::MalformedSource(
                "missing header row".to_string(),
            ));
        }
        tracing::info!(rows = rows.len(), "annotation table loaded");
        Ok(Self { comments, rows })
    }

    pub fn parse(text: &str) -> Result<Self> {
        Self::from_reader(text.as_bytes())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        tracing::info!(path = %path.display(), "loading annotation table");
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Write comments, header and rows as TSV
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        for comment in &self.comments {
            writeln!(writer, "{}", comment)?;
        }
        writeln!(writer, "{}", COLUMNS.join("\t"))?;
        for row in &self.rows {
            let fields: Vec<String> = row.fields().iter().map(|f| sanitize(f)).collect();
            writeln!(writer, "{}", fields.join("\t"))?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_tsv(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        String::from_utf8(buf).map_err(|e| AnnotationError::MalformedSource(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)?;
        self.write_to(std::io::BufWriter::new(file))
    }

    pub fn rows(&self) -> &[AnnotationRow] {
        &self.rows
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A new store with the same header comments and the given rows
    pub fn with_rows(&self, rows: Vec<AnnotationRow>) -> Self {
        Self {
            comments: self.comments.clone(),
            rows,
        }
    }

    /// Working copy of the rows matching `predicate`
    pub fn select<F>(&self, predicate: F) -> Vec<AnnotationRow>
    where
        F: Fn(&AnnotationRow) -> bool,
    {
        self.rows.iter().filter(|r| predicate(r)).cloned().collect()
    }

    /// Working copy of every row whose disease is one of `names`
    pub fn select_diseases<S: AsRef<str>>(&self, names: &[S]) -> Vec<AnnotationRow> {
        self.select(|row| names.iter().any(|n| n.as_ref() == row.disease_name))
    }

    /// Rows sharing an identity key
    pub fn rows_with_key(&self, key: &RowKey) -> Vec<&AnnotationRow> {
        self.rows.iter().filter(|r| r.has_key(key)).collect()
    }

    /// Sorted, de-duplicated, non-empty disease names
    pub fn disease_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .rows
            .iter()
            .map(|r| r.disease_name.as_str())
            .filter(|n| !n.is_empty())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Disease names containing `query`, case-insensitively
    pub fn search_diseases(&self, query: &str) -> Vec<&str> {
        let needle = query.trim().to_lowercase();
        self.disease_names()
            .into_iter()
            .filter(|n| n.to_lowercase().contains(&needle))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = "#description: \"HPO annotations for rare diseases\"
#version: 2025-05-06
#tracker: https://github.com/obophenotype/human-phenotype-ontology/issues
database_id\tdisease_name\tqualifier\thpo_id\treference\tevidence\tonset\tfrequency\tsex\tmodifier\taspect\tbiocuration
OMIM:301500\tFabry disease\t\tHP:0000963\tOMIM:301500\tIEA\t\tHP:0040282\t\t\tP\tHPO:iea[2009-02-17]
OMIM:301500\tFabry disease\t\tHP:0004322\tPMID:39292930\tPCS\t\t7/13\t\t\tP\tHPO:probinson[2012-04-24];HPO:jdoe[2015-12-07]
ORPHA:324\tFabry disease\tNOT\tHP:0001250\tORPHA:324\tTAS\tHP:0003577\t17%\tMALE\t\tP\tORPHA:orphadata[2025-01-01]
OMIM:300615\tCoffin-Lowry syndrome\t\tHP:0001249\tOMIM:300615\tIEA\t\t\t\t\tP\tHPO:iea[2009-02-17]
";

    pub(crate) fn row(database_id: &str, hpo_id: &str) -> AnnotationRow {
        AnnotationRow {
            database_id: database_id.to_string(),
            disease_name: format!("Disease {}", database_id),
            hpo_id: hpo_id.to_string(),
            reference: database_id.to_string(),
            evidence: "IEA".to_string(),
            aspect: "P".to_string(),
            biocuration: "HPO:iea[2009-02-17]".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_sample() {
        let store = AnnotationStore::parse(SAMPLE).unwrap();
        assert_eq!(store.len(), 4);
        assert_eq!(store.comments().len(), 3);

        let second = &store.rows()[1];
        assert_eq!(second.key(), RowKey::new("OMIM:301500", "HP:0004322"));
        assert_eq!(second.frequency, "7/13");
        assert_eq!(second.qualifier, "");
        assert_eq!(second.biocuration, "HPO:probinson[2012-04-24];HPO:jdoe[2015-12-07]");
    }

    #[test]
    fn test_values_stay_text() {
        let store = AnnotationStore::parse(SAMPLE).unwrap();
        assert_eq!(store.rows()[2].frequency, "17%");
        assert_eq!(store.rows()[0].database_id, "OMIM:301500");
    }

    #[test]
    fn test_roundtrip_preserves_rows_and_columns() {
        let store = AnnotationStore::parse(SAMPLE).unwrap();
        let written = store.to_tsv().unwrap();
        let reloaded = AnnotationStore::parse(&written).unwrap();
        assert_eq!(reloaded, store);
        assert!(written.contains(&COLUMNS.join("\t")));
    }

    #[test]
    fn test_short_rows_are_padded() {
        let text = format!("{}\nOMIM:1\tX\t\tHP:0000001\n", COLUMNS.join("\t"));
        let store = AnnotationStore::parse(&text).unwrap();
        assert_eq!(store.rows()[0].hpo_id, "HP:0000001");
        assert_eq!(store.rows()[0].biocuration, "");
    }

    #[test]
    fn test_malformed_tables() {
        let err = AnnotationStore::parse("#only comments\n").unwrap_err();
        assert!(matches!(err, AnnotationError::MalformedSource(_)));

        let err = AnnotationStore::parse("a\tb\tc\n1\t2\t3\n").unwrap_err();
        assert!(matches!(err, AnnotationError::MalformedSource(_)));

        let text = format!("{}\n{}\n", COLUMNS.join("\t"), vec!["x"; 13].join("\t"));
        let err = AnnotationStore::parse(&text).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let text = format!("#c\r\n{}\r\n\r\n{}\r\n", COLUMNS.join("\t"), row("OMIM:1", "HP:0000001").fields().join("\t"));
        let store = AnnotationStore::parse(&text).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.rows()[0].biocuration, "HPO:iea[2009-02-17]");
    }

    #[test]
    fn test_row_of_empty_fields_survives_roundtrip() {
        let store = AnnotationStore::new(vec![AnnotationRow::default(), row("OMIM:1", "HP:0000001")]);
        let written = store.to_tsv().unwrap();
        assert!(written.contains(&format!("\n{}\n", "\t".repeat(11))));

        let reloaded = AnnotationStore::parse(&written).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.rows()[0], AnnotationRow::default());
    }

    #[test]
    fn test_write_sanitizes_tabs() {
        let mut r = row("OMIM:1", "HP:0000001");
        r.disease_name = "Bad\tname\nhere".to_string();
        let store = AnnotationStore::new(vec![r]);
        let reloaded = AnnotationStore::parse(&store.to_tsv().unwrap()).unwrap();
        assert_eq!(reloaded.rows()[0].disease_name, "Bad name here");
    }

    #[test]
    fn test_select_does_not_mutate() {
        let store = AnnotationStore::parse(SAMPLE).unwrap();
        let mut copy = store.select_diseases(&["Fabry disease"]);
        assert_eq!(copy.len(), 3);
        copy[0].hpo_id = "HP:9999999".to_string();
        assert_eq!(store.rows()[0].hpo_id, "HP:0000963");
    }

    #[test]
    fn test_disease_names() {
        let store = AnnotationStore::parse(SAMPLE).unwrap();
        assert_eq!(store.disease_names(), vec!["Coffin-Lowry syndrome", "Fabry disease"]);
        assert_eq!(store.search_diseases("coffin"), vec!["Coffin-Lowry syndrome"]);
        assert_eq!(store.rows_with_key(&RowKey::new("OMIM:301500", "HP:0004322")).len(), 1);
    }

    #[test]
    fn test_get_and_set() {
        let mut r = AnnotationRow::default();
        assert!(r.set("onset", "HP:0003577"));
        assert!(!r.set("status", "added"));
        assert_eq!(r.get("onset"), Some("HP:0003577"));
        assert_eq!(r.get("nope"), None);
    }

    #[test]
    fn test_stamp() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 11).unwrap();
        let mut r = AnnotationRow::default();
        r.stamp("You", date);
        assert_eq!(r.biocuration, "HPO:You[2025-07-11]");
        r.stamp("ORCID:0000-0001", date);
        assert_eq!(r.biocuration, "HPO:You[2025-07-11];ORCID:0000-0001[2025-07-11]");
    }

    #[test]
    fn test_validate_sample_rows() {
        let store = AnnotationStore::parse(SAMPLE).unwrap();
        for r in store.rows() {
            assert!(r.validate().is_empty(), "{:?}", r.validate());
        }
    }

    #[test]
    fn test_validate_reports_bad_fields() {
        let r = AnnotationRow {
            database_id: "Fabry".to_string(),
            hpo_id: "HP:123".to_string(),
            qualifier: "MAYBE".to_string(),
            evidence: "XYZ".to_string(),
            frequency: "9/3".to_string(),
            sex: "other".to_string(),
            aspect: "Q".to_string(),
            biocuration: "someone".to_string(),
            ..Default::default()
        };
        let columns: Vec<&str> = r.validate().iter().map(|p| p.column).collect();
        assert_eq!(
            columns,
            vec!["database_id", "hpo_id", "qualifier", "evidence", "frequency", "sex", "aspect", "biocuration"]
        );
    }

    #[test]
    fn test_frequency_forms() {
        assert!(is_valid_frequency("HP:0040282"));
        assert!(is_valid_frequency("7/13"));
        assert!(is_valid_frequency("13/13"));
        assert!(is_valid_frequency("17%"));
        assert!(is_valid_frequency("12.5%"));
        assert!(!is_valid_frequency("14/13"));
        assert!(!is_valid_frequency("1/0"));
        assert!(!is_valid_frequency("120%"));
        assert!(!is_valid_frequency("often"));
    }
}
