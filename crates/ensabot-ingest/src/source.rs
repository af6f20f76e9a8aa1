//! Source document loading.
//!
//! The corpus root holds JSON class schedules under `emploi-temps/` and free
//! text files anywhere below it. A document that cannot be read or parsed is
//! logged and skipped; it never aborts the whole load.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use ensabot_core::{Error, Result};
use ensabot_store::SCHEDULE_CATEGORY;

/// Folder (relative to the corpus root) holding the JSON schedules.
pub const SCHEDULE_DIR: &str = "emploi-temps";

/// Category used for text files without a usable parent folder name.
pub const DEFAULT_TEXT_CATEGORY: &str = "txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Schedule,
    Text,
}

/// One source file, read into memory.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub category: String,
    /// Rendered schedule lines, or the raw file text.
    pub content: String,
}

impl Document {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Documents found under a corpus root, plus the files that were skipped.
#[derive(Debug, Default)]
pub struct LoadedSources {
    pub documents: Vec<Document>,
    pub skipped: Vec<Error>,
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn source_error(path: &Path, reason: impl ToString) -> Error {
    Error::SourceRead {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Render a schedule object as one line per entry:
/// `"<day> | key: value | key: value"`.
///
/// Days map to a list of entries (a single entry is accepted too). Null or
/// empty days are skipped. String values are written without quotes.
pub fn render_schedule(value: &Value) -> std::result::Result<String, String> {
    let days = value
        .as_object()
        .ok_or_else(|| "schedule must be a JSON object keyed by day".to_string())?;

    let mut lines = Vec::new();
    for (day, schedule) in days {
        let entries: Vec<&Value> = match schedule {
            Value::Null => continue,
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for entry in entries {
            match entry {
                Value::Null => {}
                Value::Object(fields) if fields.is_empty() => {}
                Value::Object(fields) => {
                    let parts: Vec<String> = fields
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k, scalar_text(v)))
                        .collect();
                    lines.push(format!("{} | {}", day, parts.join(" | ")));
                }
                Value::String(s) if s.trim().is_empty() => {}
                other => lines.push(format!("{} | {}", day, scalar_text(other))),
            }
        }
    }
    Ok(lines.join("\n"))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Read and render one JSON schedule.
pub fn read_schedule(path: &Path) -> Result<Document> {
    let raw = std::fs::read_to_string(path).map_err(|e| source_error(path, e))?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| source_error(path, e))?;
    let content = render_schedule(&value).map_err(|e| source_error(path, e))?;
    Ok(Document {
        path: absolute(path),
        kind: DocumentKind::Schedule,
        category: SCHEDULE_CATEGORY.to_string(),
        content,
    })
}

/// Read one text file. Its category is the name of the folder holding it.
pub fn read_text(path: &Path) -> Result<Document> {
    let content = std::fs::read_to_string(path).map_err(|e| source_error(path, e))?;
    let path = absolute(path);
    let category = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_TEXT_CATEGORY.to_string());
    Ok(Document {
        path,
        kind: DocumentKind::Text,
        category,
        content,
    })
}

fn push_loaded(loaded: &mut LoadedSources, result: Result<Document>) {
    match result {
        Ok(doc) => {
            debug!("Loaded {} ({} bytes)", doc.path.display(), doc.content.len());
            loaded.documents.push(doc);
        }
        Err(e) => {
            warn!("Skipping source: {}", e);
            loaded.skipped.push(e);
        }
    }
}

/// Load every schedule (`<root>/emploi-temps/*.json`) and then every text
/// file (`<root>/**/*.txt`), each group sorted by path.
///
/// A missing root yields no documents.
pub fn load_sources(root: &Path) -> LoadedSources {
    let mut loaded = LoadedSources::default();
    if !root.is_dir() {
        warn!("Corpus root {} is not a directory", root.display());
        return loaded;
    }

    let schedule_dir = root.join(SCHEDULE_DIR);
    if schedule_dir.is_dir() {
        let schedules = WalkDir::new(&schedule_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(e) => {
                    warn!("Cannot list {}: {}", schedule_dir.display(), e);
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && has_extension(e.path(), "json"));
        for entry in schedules {
            push_loaded(&mut loaded, read_schedule(entry.path()));
        }
    }

    let texts = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Cannot walk {}: {}", root.display(), e);
                None
            }
        })
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), "txt"));
    for entry in texts {
        push_loaded(&mut loaded, read_text(entry.path()));
    }

    info!(
        "Loaded {} documents from {} ({} skipped)",
        loaded.documents.len(),
        root.display(),
        loaded.skipped.len()
    );
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_render_schedule_line() {
        let value = json!({"Lundi": [{"Matière": "Algo", "Heure": "08:00-10:00"}]});
        let rendered = render_schedule(&value).unwrap();
        assert_eq!(rendered, "Lundi | Matière: Algo | Heure: 08:00-10:00");
    }

    #[test]
    fn test_render_schedule_keeps_day_order_and_skips_empty_days() {
        let value = json!({
            "Mardi": [{"Matière": "Réseaux", "Salle": 12}],
            "Mercredi": [],
            "Jeudi": null,
            "Lundi": [{"Matière": "Algo"}, {"Matière": "Maths"}]
        });
        let rendered = render_schedule(&value).unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Mardi | Matière: Réseaux | Salle: 12",
                "Lundi | Matière: Algo",
                "Lundi | Matière: Maths",
            ]
        );
    }

    #[test]
    fn test_render_schedule_rejects_non_object() {
        assert!(render_schedule(&json!(["Lundi"])).is_err());
    }

    #[test]
    fn test_load_sources_layout() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("emploi-temps")).unwrap();
        std::fs::create_dir_all(root.join("scolarite")).unwrap();
        std::fs::write(
            root.join("emploi-temps/gi2.json"),
            r#"{"Lundi": [{"Matière": "Algo"}]}"#,
        )
        .unwrap();
        std::fs::write(root.join("emploi-temps/broken.json"), "{not json").unwrap();
        std::fs::write(root.join("emploi-temps/notes.md"), "ignored").unwrap();
        std::fs::write(root.join("scolarite/inscription.txt"), "Inscriptions en septembre.").unwrap();
        std::fs::write(root.join("general.txt"), "ENSA présentation.").unwrap();

        let loaded = load_sources(root);
        assert_eq!(loaded.documents.len(), 3);
        assert_eq!(loaded.skipped.len(), 1);
        assert!(matches!(loaded.skipped[0], Error::SourceRead { .. }));

        let schedule = &loaded.documents[0];
        assert_eq!(schedule.kind, DocumentKind::Schedule);
        assert_eq!(schedule.category, "emploi du temps");
        assert_eq!(schedule.file_name(), "gi2.json");
        assert!(schedule.path.is_absolute());

        let texts: Vec<_> = loaded.documents[1..]
            .iter()
            .map(|d| (d.file_name(), d.category.clone()))
            .collect();
        assert!(texts.contains(&("inscription.txt".to_string(), "scolarite".to_string())));
        assert!(loaded.documents[1..].iter().all(|d| d.kind == DocumentKind::Text));
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let loaded = load_sources(&dir.path().join("absent"));
        assert!(loaded.documents.is_empty());
        assert!(loaded.skipped.is_empty());
    }
}
