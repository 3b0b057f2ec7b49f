//! Runner configuration and the error class used by `Toolkit::message`.
use crate::error::{BoxError, GenericError};
use std::error::Error as StdError;
use std::fmt;

const ENV_PROFILE: &str = "STAGEWISE_PROFILE";
const ENV_BASE_PATH: &str = "STAGEWISE_BASE_PATH";
const ENV_ERROR_CODES: &str = "STAGEWISE_ERROR_CODES";

/// Constructor for errors built from a formatted message.
#[derive(Clone, Copy)]
pub struct ErrorClass {
    name: &'static str,
    construct: fn(String) -> BoxError,
}

impl ErrorClass {
    pub const fn new(name: &'static str, construct: fn(String) -> BoxError) -> Self {
        Self { name, construct }
    }

    /// Error class for any error type that can be built from its message.
    pub fn of<E>() -> Self
    where
        E: From<String> + StdError + Send + Sync + 'static,
    {
        let construct: fn(String) -> BoxError = |message| Box::new(E::from(message)) as BoxError;
        Self {
            name: std::any::type_name::<E>(),
            construct,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn construct(&self, message: String) -> BoxError {
        (self.construct)(message)
    }
}

impl Default for ErrorClass {
    fn default() -> Self {
        Self::of::<GenericError>()
    }
}

impl fmt::Debug for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorClass").field(&self.name).finish()
    }
}

/// Argument accepted by `Runner::profile`: a flag, or a base path that
/// also turns profiling on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileToggle {
    Enabled(bool),
    BasePath(String),
}

impl From<bool> for ProfileToggle {
    fn from(value: bool) -> Self {
        Self::Enabled(value)
    }
}

impl From<&str> for ProfileToggle {
    fn from(value: &str) -> Self {
        Self::BasePath(value.to_string())
    }
}

impl From<String> for ProfileToggle {
    fn from(value: String) -> Self {
        Self::BasePath(value)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Prefix stripped from recorded call-site files.
    pub base_path: String,
    pub profiling: bool,
    pub error_class: ErrorClass,
    /// Switches `Toolkit::coded` on and `Toolkit::message` off.
    pub error_codes: bool,
}

impl Config {
    /// Reads `STAGEWISE_PROFILE`, `STAGEWISE_BASE_PATH` and
    /// `STAGEWISE_ERROR_CODES` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(flag) = lookup(ENV_PROFILE).as_deref().and_then(parse_flag) {
            config.profiling = flag;
        }
        if let Some(path) = lookup(ENV_BASE_PATH).filter(|p| !p.is_empty()) {
            config.apply_profile(ProfileToggle::BasePath(path));
        }
        if let Some(flag) = lookup(ENV_ERROR_CODES).as_deref().and_then(parse_flag) {
            config.error_codes = flag;
        }
        config
    }

    pub(crate) fn apply_profile(&mut self, toggle: ProfileToggle) {
        match toggle {
            ProfileToggle::Enabled(flag) => self.profiling = flag,
            ProfileToggle::BasePath(path) => {
                self.base_path = path;
                self.profiling = true;
            }
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
