//! LLM-assisted query rewriting for the self-query and multi-query modes.
//!
//! The reasoner is any text completion service. Its answers are parsed
//! leniently; a response that cannot be used makes the retriever fall back
//! to plain vector search.

use async_trait::async_trait;
use serde::Deserialize;

use ensabot_core::Result;
use ensabot_store::MetadataFilter;

/// Maximum number of alternative phrasings used by multi-query search.
pub const MAX_ALTERNATIVES: usize = 3;

/// One-shot text completion used to rewrite queries.
#[async_trait]
pub trait QueryReasoner: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Search instructions derived from a natural-language question.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SelfQuery {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub filter: MetadataFilter,
}

pub fn self_query_prompt(query: &str) -> String {
    format!(
        r#"Vous transformez une question d'étudiant en requête de recherche sur les documents de l'ENSA.
Chaque document possède les métadonnées suivantes :
- name (texte) : nom du document, par exemple "gi2.json" ou "scolarite.txt (part 1)"
- categorie (texte) : catégorie du document, par exemple "emploi du temps" ou le nom du dossier
- source (texte) : chemin du fichier d'origine
- part (entier) : numéro de la partie du document

Répondez uniquement avec un objet JSON de la forme :
{{"query": "<texte à rechercher>", "filter": {{"categorie": "...", "name": "...", "source": "...", "part": 1}}}}
N'incluez dans "filter" que les champs dont vous êtes certain. Utilisez {{}} si aucun filtre ne s'applique.

Question : {}"#,
        query
    )
}

pub fn multi_query_prompt(query: &str) -> String {
    format!(
        "Vous êtes un assistant qui aide à rechercher des documents de l'ENSA. \
Proposez {} reformulations différentes de la question suivante pour retrouver \
les documents pertinents par recherche sémantique. \
Écrivez une reformulation par ligne, sans numérotation ni commentaire.\n\n\
Question : {}",
        MAX_ALTERNATIVES, query
    )
}

/// Parse the JSON object in a self-query response. Surrounding prose or code
/// fences are ignored. Blank filter values are dropped.
pub fn parse_self_query(response: &str) -> Option<SelfQuery> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    let mut parsed: SelfQuery = serde_json::from_str(&response[start..=end]).ok()?;

    parsed.query = parsed
        .query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty());
    let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
    if blank(&parsed.filter.name) {
        parsed.filter.name = None;
    }
    if blank(&parsed.filter.categorie) {
        parsed.filter.categorie = None;
    }
    if blank(&parsed.filter.source) {
        parsed.filter.source = None;
    }
    Some(parsed)
}

/// `"1. foo"`, `"2) foo"`, `"- foo"`, `"* foo"` → `"foo"`.
fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim();
        }
        return line;
    }
    line.trim_start_matches(|c: char| matches!(c, '-' | '*' | '•'))
        .trim()
}

/// Alternative phrasings, one per line, with list markers removed.
pub fn parse_alternatives(response: &str, original: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in response.lines() {
        let cleaned = strip_list_marker(line).trim_matches('"').trim();
        if cleaned.is_empty() || cleaned == original.trim() || out.iter().any(|o| o == cleaned) {
            continue;
        }
        out.push(cleaned.to_string());
        if out.len() == MAX_ALTERNATIVES {
            break;
        }
    }
    out
}
