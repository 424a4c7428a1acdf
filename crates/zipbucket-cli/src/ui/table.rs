use tabled::{
    Table, Tabled,
    settings::{Panel, Style},
};
use zipbucket::ArchiveResult;

pub struct Formatter;

#[derive(Tabled)]
struct ManifestRow<'a> {
    #[tabled(rename = "source")]
    source: &'a str,
    #[tabled(rename = "entry")]
    entry:  &'a str,
}

impl Formatter {
    /// Summary of a run: where the archive went and what is in it.
    pub fn manifest(result: &ArchiveResult) -> Table {
        let rows = result.manifest.iter().map(|entry| ManifestRow {
            source: &entry.source_name,
            entry:  &entry.archive_path,
        });
        let mut table = Table::new(rows);

        let mut targets = Vec::new();
        if let (Some(container), Some(path)) = (&result.dest_container, &result.dest_path) {
            targets.push(format!("{container}/{path}"));
        }
        if let Some(keep) = &result.keep_path {
            targets.push(keep.display().to_string());
        }
        table.with(Panel::header(format!(
            "{}/{} -> {}",
            result.source_container,
            result.source_prefix,
            targets.join(", ")
        )));
        table.with(Panel::footer(format!(
            "{} entries, {} bytes",
            result.manifest.len(),
            result.bytes_written
        )));

        table.with(Style::blank());
        table
    }
}
