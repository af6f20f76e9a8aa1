//! Answer prompt and user-facing messages (French).

pub const NO_CONTEXT_STREAM: &str = "Désolé, je n'ai pas trouvé d'informations pertinentes.";
pub const NO_CONTEXT_ANSWER: &str =
    "Désolé, je n'ai pas trouvé d'informations pertinentes pour répondre à votre question.";
pub const ALL_KEYS_RATE_LIMITED: &str =
    "Désolé, tous les clés API ont atteint leur limite. Veuillez réessayer plus tard.";
pub const REQUEST_FAILED: &str = "Impossible de traiter votre demande. Veuillez réessayer.";

/// Build the single user message sent to the model.
pub fn answer_prompt(context: &str, query: &str) -> String {
    format!(
        "Vous êtes un assistant utile intégré dans un système RAG. \
Utilisez le contexte suivant pour répondre à la question de manière COMPLÈTE et DÉTAILLÉE en français.\n\n\
IMPORTANT - FORMAT DE RÉPONSE:\n\
- Utilisez le format Markdown : titres, listes, tableaux, **gras** et `code` quand c'est utile.\n\
- Terminez toujours vos phrases.\n\
- Évitez de parler hors contexte.\n\n\
Si vous ne connaissez pas la réponse, dites simplement que vous ne savez pas. \
Utilisez seulement le contexte pertinent pour répondre.\n\n\
Contexte: {}\n\n\
Question: {}\n\n\
Réponse:",
        context, query
    )
}

/// Shorten each source path to its file name, keeping only `.json` and
/// `.txt`. Duplicates are dropped; first-seen order is kept.
pub fn display_sources(sources: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for source in sources {
        let source = source.replace('\\', "/");
        if !(source.ends_with(".json") || source.ends_with(".txt")) {
            continue;
        }
        let name = source.rsplit('/').next().unwrap_or_default().to_string();
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// Non-streamed answer text followed by its sources.
pub fn with_sources_footer(response: &str, sources: &[String]) -> String {
    if sources.is_empty() {
        return response.to_string();
    }
    format!("{}\n\nSources: {}", response, sources.join(", "))
}
