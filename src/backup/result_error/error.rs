use crate::backup::result_error::{AddDebugObjectAndFnName, AddFunctionName, AddMsg};
use itertools::Itertools;
use std::fmt::Debug;
use std::sync::mpsc::SendError;
use thiserror::Error;
use thiserror_ext::Construct;

#[derive(Error, Debug, Construct)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    EmailBuild(#[from] lettre::error::Error),
    #[error(transparent)]
    SmtpTransport(#[from] lettre::transport::smtp::Error),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not authenticated with {0}")]
    Authentication(String),
    #[error("Archive {stage} failed:\n{}", indent::indent_all_with("  ", error.to_string()))]
    Archive { stage: String, error: Box<Error> },
    #[error("Unsupported frequency: {0:?}")]
    UnsupportedFrequency(String),
    #[error("Unknown backend: {0:?}")]
    UnknownBackend(String),
    #[error("Remote api returned {status}: {body}")]
    RemoteApi { status: u16, body: String },
    #[error("{0}")]
    SmtpSendError(String),
    #[error("{0}")]
    ChannelSendError(String),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { error: Box<Error>, fn_name: String },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>, O: Debug + Send + 'static> AddDebugObjectAndFnName<S, O> for Error {
    fn add_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            error: Box::new(self),
            fn_name: fn_name.into(),
        }
    }
}

impl<D: Debug> From<SendError<D>> for Error {
    fn from(value: SendError<D>) -> Self {
        Self::ChannelSendError(format!("Failed to send {:?}", value.0))
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Wraps an error raised while building or reading an archive with the step that failed.
    pub fn in_archive_stage<S: Into<String>>(self, stage: S) -> Error {
        match self {
            e @ Error::Archive { .. } => e,
            e => Error::Archive {
                stage: stage.into(),
                error: Box::new(e),
            },
        }
    }

    /// Strips context wrappers down to the error that was originally raised.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. }
            | Error::WithDebugObjAndFnName { error, .. } => error.root_cause(),
            e => e,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self.root_cause() {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
