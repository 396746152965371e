//! Invocation requests and argument rendering
//!
//! Every positional value and every `name=value` keyword becomes exactly one
//! argv element. Several Starlink commands are scripts that re-split their
//! arguments on whitespace, so a single pre-joined string would break them.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::naming;

/// Keyword that controls the wrapper and is never sent to the program
pub const RETURN_STDOUT: &str = "returnstdout";

/// A value passed to a Starlink parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Logical(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Truthiness used for wrapper-only flags
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Logical(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Real(r) => *r != 0.0,
            Self::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "t" | "yes" | "y" | "1"
            ),
            Self::List(items) => !items.is_empty(),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logical(true) => write!(f, "True"),
            Self::Logical(false) => write!(f, "False"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Real(r) => write!(f, "{:?}", r),
            Self::Text(s) => write!(f, "{}", s),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Logical(v)
    }
}

macro_rules! integer_param {
    ($($t:ty),*) => {
        $(impl From<$t> for ParamValue {
            fn from(v: $t) -> Self {
                Self::Integer(v as i64)
            }
        })*
    };
}

integer_param!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        Self::Real(v as f64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&Path> for ParamValue {
    fn from(v: &Path) -> Self {
        Self::Text(v.display().to_string())
    }
}

impl From<PathBuf> for ParamValue {
    fn from(v: PathBuf) -> Self {
        Self::Text(v.display().to_string())
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// A request to run one Starlink application
#[derive(Debug, Clone)]
pub struct Invocation {
    command: String,
    command_name: String,
    positional: Vec<ParamValue>,
    keywords: Vec<(String, ParamValue)>,
    return_stdout: bool,
}

impl Invocation {
    /// Create a request for `command` whose parameters are stored under `command_name`
    ///
    /// `command` may contain `$NAME` or `${NAME}` placeholders such as
    /// `$KAPPA_DIR/stats`; they are resolved against the session environment.
    pub fn new(command: impl Into<String>, command_name: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            command_name: command_name.into(),
            positional: Vec::new(),
            keywords: Vec::new(),
            return_stdout: false,
        }
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<ParamValue>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Append several positional arguments
    pub fn args<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        self.positional.extend(values.into_iter().map(Into::into));
        self
    }

    /// Set a keyword parameter
    ///
    /// Names are lower-cased and lose a trailing `_`, so `in_` reaches the
    /// program as `in`. Setting a name twice keeps its first position and
    /// the last value. `returnStdOut` is intercepted as [`Self::return_stdout`].
    pub fn param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        let value = value.into();
        let name = naming::parameter_name(name);

        if name == RETURN_STDOUT {
            self.return_stdout = value.is_truthy();
            return self;
        }

        match self.keywords.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.keywords.push((name, value)),
        }
        self
    }

    /// Bundle the captured stdout with the result
    pub fn return_stdout(mut self, yes: bool) -> Self {
        self.return_stdout = yes;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub fn wants_stdout(&self) -> bool {
        self.return_stdout
    }

    /// Keyword parameters in the order they were first given
    pub fn keywords(&self) -> &[(String, ParamValue)] {
        &self.keywords
    }

    /// Render the argument vector: positionals first, then `name=value`
    pub fn render_arguments(&self) -> Vec<String> {
        self.positional
            .iter()
            .map(|v| v.to_string().trim_end().to_string())
            .chain(
                self.keywords
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v).trim_end().to_string()),
            )
            .collect()
    }
}
