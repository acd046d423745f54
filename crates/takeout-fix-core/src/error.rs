use std::io;
use std::path::PathBuf;

/// Fatal problems detected before any file is processed.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("The input directory must exist: {0}")]
    MissingInput(PathBuf),
    #[error("The input path is not a directory: {0}")]
    InputNotDirectory(PathBuf),
    #[error("The input directory is empty, so there is no work to do. Check that any zips have been extracted: {0}")]
    EmptyInput(PathBuf),
    #[error("If the {role} directory already exists, it must be empty: {path}")]
    NotEmpty { role: &'static str, path: PathBuf },
    #[error("The {role} directory must not be inside the input directory: {path}")]
    InsideInput { role: &'static str, path: PathBuf },
    #[error("The output and error directories must be different: {0}")]
    SameRoots(PathBuf),
    #[error("Cannot prepare {role} directory {path}: {source}")]
    Io {
        role: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Problems reading a Google JSON sidecar.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("cannot read sidecar {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed sidecar {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reason a single file could not be repaired. Rendered into the Error outcome.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("Error copying file: {0}")]
    Copy(#[source] io::Error),
    #[error("Error reading metadata: {0}")]
    Sidecar(#[from] SidecarError),
    #[error("Error updating EXIF: {0}")]
    ExifWrite(String),
    #[error("Error updating file date: {0}")]
    Timestamp(#[source] io::Error),
    #[error("Error propagating companion metadata: {0}")]
    Companion(String),
    #[error("Worker crashed: {0}")]
    Panicked(String),
}
