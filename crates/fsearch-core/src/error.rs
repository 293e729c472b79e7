use crate::index::RootFailure;
use fsearch_query_parser::QuerySyntaxError;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Failed to index any root: {}", format_failures(.failures))]
    IndexBuild { failures: Vec<RootFailure> },
    #[error("Invalid query: {0}")]
    QuerySyntax(#[from] QuerySyntaxError),
    #[error("Failed to compile pattern '{pattern}': {message}")]
    PatternCompile { pattern: String, message: String },
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Failed to spawn search worker: {0}")]
    ThreadSpawn(#[source] std::io::Error),
    #[error("Thread panicked")]
    ThreadPanic,
    #[error("Search engine is shut down")]
    ShutDown,
    #[error("Invalid path {0}")]
    InvalidPath(std::path::PathBuf),
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

fn format_failures(failures: &[RootFailure]) -> String {
    if failures.is_empty() {
        return "no roots given".to_string();
    }

    failures
        .iter()
        .map(|f| format!("{} ({})", f.root.display(), f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
