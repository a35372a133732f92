use crate::query::{MatchResults, Reference};
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
struct MatchRow {
    #[tabled(rename = "#")]
    ordinal: usize,
    #[tabled(rename = "Match")]
    label: String,
    #[tabled(rename = "Location")]
    location: String,
}

#[derive(Tabled)]
struct ReferenceRow {
    #[tabled(rename = "Location")]
    location: String,
    #[tabled(rename = "Use")]
    description: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, String)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

/// Search results with their ordinals, labels stripped of the ` [n]` suffix
pub fn match_table(results: &MatchResults) -> String {
    let rows: Vec<MatchRow> = results
        .labels
        .iter()
        .zip(&results.locations)
        .enumerate()
        .map(|(ordinal, (label, location))| MatchRow {
            ordinal,
            label: label
                .strip_suffix(&format!(" [{}]", ordinal))
                .unwrap_or(label)
                .to_string(),
            location: location.to_string(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn reference_table(references: &[Reference]) -> String {
    let rows: Vec<ReferenceRow> = references
        .iter()
        .map(|r| ReferenceRow {
            location: r.location.to_string(),
            description: r.description.clone(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}
