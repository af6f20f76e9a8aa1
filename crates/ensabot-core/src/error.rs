//! Error types for the ENSA Bot pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A single source document could not be read or parsed. Index builds
    /// skip the document and continue.
    #[error("Source read error ({path}): {reason}")]
    SourceRead { path: String, reason: String },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// French message shown to end users in place of the raw error.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::IndexUnavailable(_) => {
                "Le service de recherche est momentanément indisponible. Veuillez réessayer plus tard."
            }
            Error::Embedding(_) => {
                "Impossible d'analyser votre question pour le moment. Veuillez réessayer."
            }
            Error::Generation(_) => "Impossible de traiter votre demande. Veuillez réessayer.",
            _ => "Une erreur s'est produite lors du traitement de votre question.",
        }
    }

    /// HTTP status the web layer should report for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::IndexUnavailable(_) => 503,
            Error::Config(_) => 400,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
