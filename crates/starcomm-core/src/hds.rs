//! HDS container model
//!
//! An HDS container is a tree of named components. A component is either a
//! structure (named children, no value of its own) or a primitive holding a
//! scalar or array of one of the HDS primitive types. Readers produce this
//! tree; the decoder never touches the file format directly.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::environ::Environment;
use crate::error::DecodeError;

/// File extension HDS adds to container names
pub const CONTAINER_EXTENSION: &str = "sdf";

/// HDS primitive or structure type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HdsType {
    Logical,
    Byte,
    UByte,
    Word,
    UWord,
    Integer,
    Int64,
    Real,
    Double,
    /// `_CHAR*n`
    Char(usize),
    /// Any non-primitive type name, e.g. `NDF` or `ADAM_PARNAME`
    Struct(String),
}

impl HdsType {
    /// Parse a type name as printed by HDS (`_INTEGER`, `_CHAR*80`, `NDF`, ...)
    pub fn parse(name: &str) -> Self {
        let upper = name.trim().to_ascii_uppercase();
        match upper.as_str() {
            "_LOGICAL" => Self::Logical,
            "_BYTE" => Self::Byte,
            "_UBYTE" => Self::UByte,
            "_WORD" => Self::Word,
            "_UWORD" => Self::UWord,
            "_INTEGER" => Self::Integer,
            "_INT64" => Self::Int64,
            "_REAL" => Self::Real,
            "_DOUBLE" => Self::Double,
            "_CHAR" => Self::Char(1),
            other => match other.strip_prefix("_CHAR*") {
                Some(len) => Self::Char(len.parse().unwrap_or(1)),
                None => Self::Struct(upper),
            },
        }
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::Struct(_))
    }

    pub fn is_char(&self) -> bool {
        matches!(self, Self::Char(_))
    }
}

impl fmt::Display for HdsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logical => write!(f, "_LOGICAL"),
            Self::Byte => write!(f, "_BYTE"),
            Self::UByte => write!(f, "_UBYTE"),
            Self::Word => write!(f, "_WORD"),
            Self::UWord => write!(f, "_UWORD"),
            Self::Integer => write!(f, "_INTEGER"),
            Self::Int64 => write!(f, "_INT64"),
            Self::Real => write!(f, "_REAL"),
            Self::Double => write!(f, "_DOUBLE"),
            Self::Char(n) => write!(f, "_CHAR*{}", n),
            Self::Struct(name) => write!(f, "{}", name),
        }
    }
}

/// Primitive data, flattened in storage order
///
/// `None` marks a bad or undefined element.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Logical(Vec<Option<bool>>),
    Integer(Vec<Option<i64>>),
    Real(Vec<Option<f64>>),
    /// Raw bytes of each character element; HDS does not record an encoding
    Char(Vec<Vec<u8>>),
    /// The component exists but was never given a value
    Undefined,
}

impl Primitive {
    /// Number of stored elements (zero for undefined values)
    pub fn len(&self) -> usize {
        match self {
            Self::Logical(v) => v.len(),
            Self::Integer(v) => v.len(),
            Self::Real(v) => v.len(),
            Self::Char(v) => v.len(),
            Self::Undefined => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Structure or primitive payload of a component
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentKind {
    Structure(Vec<Component>),
    Primitive {
        hds_type: HdsType,
        shape: Vec<usize>,
        data: Primitive,
    },
}

/// One named node of a container
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub type_name: String,
    pub kind: ComponentKind,
}

impl Component {
    /// A structure component
    pub fn structure(
        name: impl Into<String>,
        type_name: impl Into<String>,
        children: Vec<Component>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            kind: ComponentKind::Structure(children),
        }
    }

    /// A primitive component
    pub fn primitive(
        name: impl Into<String>,
        hds_type: HdsType,
        shape: Vec<usize>,
        data: Primitive,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: hds_type.to_string(),
            kind: ComponentKind::Primitive {
                hds_type,
                shape,
                data,
            },
        }
    }

    /// A scalar character component
    pub fn text(name: impl Into<String>, value: &str) -> Self {
        let bytes = value.as_bytes().to_vec();
        Self::primitive(
            name,
            HdsType::Char(bytes.len().max(1)),
            Vec::new(),
            Primitive::Char(vec![bytes]),
        )
    }

    pub fn is_structure(&self) -> bool {
        matches!(self.kind, ComponentKind::Structure(_))
    }

    /// Children of a structure; empty for primitives
    pub fn children(&self) -> &[Component] {
        match &self.kind {
            ComponentKind::Structure(children) => children,
            ComponentKind::Primitive { .. } => &[],
        }
    }

    /// Array dimensions; empty for scalars and structures
    pub fn shape(&self) -> &[usize] {
        match &self.kind {
            ComponentKind::Primitive { shape, .. } => shape,
            ComponentKind::Structure(_) => &[],
        }
    }

    /// Number of elements implied by the shape
    pub fn element_count(&self) -> usize {
        self.shape().iter().product()
    }

    /// Find a direct child by case-insensitive name
    pub fn child(&self, name: &str) -> Option<&Component> {
        self.children()
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Something that can open an HDS container and return its tree
///
/// `Ok(None)` means there is no container at `path`, which is normal for
/// commands without output parameters.
pub trait ContainerSource: Send + Sync {
    fn open(&self, path: &Path, env: &Environment) -> Result<Option<Component>, DecodeError>;
}

/// Path of the parameter container written for `command_name`
pub fn container_path(scratch: &Path, command_name: &str) -> PathBuf {
    scratch.join(format!("{}.{}", command_name, CONTAINER_EXTENSION))
}
