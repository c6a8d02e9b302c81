pub mod app_config;
pub mod archive;
pub mod cloud;
pub mod game;
pub mod naming;
pub mod notifications;
pub mod options;
pub mod orchestrator;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod schedule;
pub mod settings;
pub mod storage;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
