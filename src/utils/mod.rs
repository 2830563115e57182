pub mod get_env;
pub mod hash;
pub mod path;
pub mod urls;
