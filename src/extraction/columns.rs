//! Column header → canonical field mapping.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    Date,
    Amount,
    Type,
    Description,
    Recallable,
    ContributionAdjustment,
}

impl CanonicalField {
    pub fn name(self) -> &'static str {
        match self {
            CanonicalField::Date => "date",
            CanonicalField::Amount => "amount",
            CanonicalField::Type => "type",
            CanonicalField::Description => "description",
            CanonicalField::Recallable => "recallable",
            CanonicalField::ContributionAdjustment => "contribution_adjustment",
        }
    }
}

/// Exact synonyms, compared after `normalize_header`.
const SYNONYMS: &[(CanonicalField, &[&str])] = &[
    (
        CanonicalField::Date,
        &[
            "date",
            "call date",
            "distribution date",
            "adjustment date",
            "payment date",
            "transaction date",
            "value date",
            "effective date",
            "as of",
        ],
    ),
    (
        CanonicalField::Amount,
        &[
            "amount",
            "value",
            "$",
            "amount $",
            "amount usd",
            "net amount",
            "call amount",
            "distribution amount",
            "adjustment amount",
            "total",
        ],
    ),
    (
        CanonicalField::Type,
        &[
            "type",
            "call type",
            "call number",
            "call no",
            "distribution type",
            "adjustment type",
            "category",
        ],
    ),
    (
        CanonicalField::Description,
        &["description", "memo", "note", "notes", "details", "comment", "comments"],
    ),
    (
        CanonicalField::Recallable,
        &["recallable", "is recallable", "recallable flag"],
    ),
    (
        CanonicalField::ContributionAdjustment,
        &[
            "contribution adjustment",
            "is contribution adjustment",
            "affects contributions",
            "affects paid in capital",
            "contribution",
        ],
    ),
];

/// Lowercase, turn punctuation into spaces (except `$`), collapse whitespace.
pub fn normalize_header(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '$' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map one header to a canonical field: exact synonym first, then keyword fallback.
pub fn classify_header(raw: &str) -> Option<CanonicalField> {
    let normalized = normalize_header(raw);
    if normalized.is_empty() {
        return None;
    }

    for (field, synonyms) in SYNONYMS {
        if synonyms.iter().any(|s| *s == normalized) {
            return Some(*field);
        }
    }

    let words: Vec<&str> = normalized.split(' ').collect();
    let has = |w: &str| words.contains(&w);

    if has("recallable") {
        Some(CanonicalField::Recallable)
    } else if has("contribution") && (has("adjustment") || has("adj")) {
        Some(CanonicalField::ContributionAdjustment)
    } else if has("date") {
        Some(CanonicalField::Date)
    } else if has("amount") || has("$") || has("usd") {
        Some(CanonicalField::Amount)
    } else if has("description") || has("memo") || has("notes") {
        Some(CanonicalField::Description)
    } else if has("type") || has("category") {
        Some(CanonicalField::Type)
    } else {
        None
    }
}

/// Header → field assignments for one table. The first column claiming a field wins.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    fields: HashMap<CanonicalField, String>,
}

impl ColumnMap {
    pub fn from_headers<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        let mut fields = HashMap::new();
        for header in headers {
            if let Some(field) = classify_header(header) {
                fields.entry(field).or_insert_with(|| header.to_string());
            }
        }
        Self { fields }
    }

    pub fn header_for(&self, field: CanonicalField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn has(&self, field: CanonicalField) -> bool {
        self.fields.contains_key(&field)
    }
}
