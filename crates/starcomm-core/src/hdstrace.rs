//! Container reader backed by the Starlink `hdstrace` utility
//!
//! HDS has no native Rust reader, so containers are read the same way a
//! user would inspect one: `hdstrace` prints the whole component tree and
//! the listing is parsed back into a [`Component`]. The listing looks like
//!
//! ```text
//! STATS  <STRUC>
//!
//!    NDF            <NDF_PAR>       {structure}
//!       NAMEPTR        <_CHAR*132>     '/data/m31'
//!
//!    MAXPOS(2)      <_INTEGER>      55,28
//!    CLIP           <_REAL>         <undefined>
//!
//! End of Trace.
//! ```
//!
//! Character data is kept as raw bytes; decoding happens in [`crate::decode`].

use regex::bytes::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tracing::debug;

use crate::environ::Environment;
use crate::error::DecodeError;
use crate::hds::{Component, ContainerSource, HdsType, Primitive, CONTAINER_EXTENSION};

/// Parameters that make `hdstrace` print every element on predictable lines
pub const TRACE_ARGS: &[&str] = &[
    "full",
    "nlines=all",
    "newline=false",
    "eachline=false",
    "widepage=true",
];

/// Reads containers by running `hdstrace`
#[derive(Debug, Clone, Default)]
pub struct HdsTrace {
    program: Option<String>,
}

impl HdsTrace {
    /// Use `$HDSTRACE_DIR/hdstrace` from the session environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific trace program (placeholders are resolved)
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    fn program(&self, env: &Environment) -> String {
        match (&self.program, env.get("HDSTRACE_DIR")) {
            (Some(program), _) => env.resolve_placeholders(program),
            (None, Some(dir)) => Path::new(dir).join("hdstrace").display().to_string(),
            (None, None) => "hdstrace".to_string(),
        }
    }
}

impl ContainerSource for HdsTrace {
    fn open(&self, path: &Path, env: &Environment) -> Result<Option<Component>, DecodeError> {
        if !path.exists() {
            return Ok(None);
        }

        let program = self.program(env);
        let object = object_name(path);
        debug!(%program, object = %object.display(), "tracing container");

        let output = Command::new(&program)
            .arg(&object)
            .args(TRACE_ARGS)
            .env_clear()
            .envs(env.iter())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => DecodeError::Trace {
                    path: path.to_path_buf(),
                    message: format!("{} not found; is Starlink installed?", program),
                },
                _ => DecodeError::Io {
                    path: path.to_path_buf(),
                    source: e,
                },
            })?;

        if !output.status.success() {
            return Err(DecodeError::Trace {
                path: path.to_path_buf(),
                message: format!(
                    "{}\n{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        parse_listing(&output.stdout)
            .map(Some)
            .map_err(|reason| DecodeError::malformed(path, reason))
    }
}

/// HDS object name for a container file (the path without `.sdf`)
fn object_name(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == CONTAINER_EXTENSION => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

/// One component line of the listing, with any continuation text folded in
#[derive(Debug)]
struct Entry {
    indent: usize,
    name: String,
    dims: Vec<usize>,
    type_name: String,
    text: Vec<u8>,
    structure: bool,
    undefined: bool,
}

fn component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?-u)^( *)([A-Za-z][A-Za-z0-9_]*)(?:\(([0-9, ]*)\))?\s+<([^>]+)>\s*(.*)$")
            .unwrap_or_else(|e| panic!("component pattern is invalid: {}", e))
    })
}

/// Parse an `hdstrace` listing into a component tree
pub fn parse_listing(listing: &[u8]) -> Result<Component, String> {
    let entries = scan(listing)?;
    let root = entries.first().ok_or("listing contains no components")?;

    let mut pos = 1;
    let children = build(&entries, &mut pos, root.indent)?;
    if pos < entries.len() {
        return Err(format!(
            "component {} is not nested under {}",
            entries[pos].name, root.name
        ));
    }

    Ok(Component::structure(
        root.name.clone(),
        root.type_name.clone(),
        children,
    ))
}

fn scan(listing: &[u8]) -> Result<Vec<Entry>, String> {
    let mut entries: Vec<Entry> = Vec::new();

    for raw in listing.split(|&b| b == b'\n') {
        let line = raw.strip_suffix(b"\r").unwrap_or(raw);
        let content = line.trim_ascii();

        if content.is_empty() || content.starts_with(b"{") || content.starts_with(b"Contents of ")
        {
            continue;
        }
        if content.starts_with(b"End of Trace") {
            break;
        }

        if let Some(caps) = component_re().captures(line) {
            let type_name = lossy(&caps[4]);
            let rest = caps.get(5).map(|m| m.as_bytes().trim_ascii()).unwrap_or_default();
            let dims = match caps.get(3) {
                Some(m) => parse_dims(m.as_bytes())?,
                None => Vec::new(),
            };
            let structure = rest.starts_with(b"{") || !HdsType::parse(&type_name).is_primitive();

            entries.push(Entry {
                indent: caps[1].len(),
                name: lossy(&caps[2]),
                dims,
                type_name,
                text: if structure { Vec::new() } else { rest.to_vec() },
                structure,
                undefined: rest == b"<undefined>",
            });
            continue;
        }

        match entries.last_mut() {
            Some(last) if !last.structure && !last.undefined => continue_text(&mut last.text, content),
            _ => return Err(format!("unexpected line: {}", lossy(content))),
        }
    }

    Ok(entries)
}

/// Append a wrapped line of values to the text of the previous component
fn continue_text(text: &mut Vec<u8>, more: &[u8]) {
    let open_quote = text.iter().filter(|&&b| b == b'\'').count() % 2 == 1;
    if !open_quote && !text.is_empty() && !text.ends_with(b",") && !more.starts_with(b",") {
        text.push(b',');
    }
    text.extend_from_slice(more);
}

fn build(entries: &[Entry], pos: &mut usize, parent_indent: usize) -> Result<Vec<Component>, String> {
    let mut children = Vec::new();

    while *pos < entries.len() && entries[*pos].indent > parent_indent {
        let entry = &entries[*pos];
        *pos += 1;

        if entry.structure {
            let nested = build(entries, pos, entry.indent)?;
            children.push(Component::structure(
                entry.name.clone(),
                entry.type_name.clone(),
                nested,
            ));
        } else {
            children.push(primitive(entry)?);
        }
    }

    Ok(children)
}

fn primitive(entry: &Entry) -> Result<Component, String> {
    let hds_type = HdsType::parse(&entry.type_name);
    if entry.undefined {
        return Ok(Component::primitive(
            entry.name.clone(),
            hds_type,
            entry.dims.clone(),
            Primitive::Undefined,
        ));
    }

    let tokens = split_values(&entry.text);
    let expected: usize = entry.dims.iter().product();
    if tokens.len() != expected {
        return Err(format!(
            "{} declares {} element(s) but {} were listed",
            entry.name,
            expected,
            tokens.len()
        ));
    }

    let data = match hds_type {
        HdsType::Logical => Primitive::Logical(
            tokens
                .iter()
                .map(|t| match t.to_ascii_uppercase().as_slice() {
                    _ if is_bad(t) => Ok(None),
                    b"TRUE" | b"T" => Ok(Some(true)),
                    b"FALSE" | b"F" => Ok(Some(false)),
                    _ => Err(bad_value(entry, t)),
                })
                .collect::<Result<_, _>>()?,
        ),
        HdsType::Byte
        | HdsType::UByte
        | HdsType::Word
        | HdsType::UWord
        | HdsType::Integer
        | HdsType::Int64 => Primitive::Integer(
            tokens
                .iter()
                .map(|t| match is_bad(t) {
                    true => Ok(None),
                    false => lossy(t).parse().map(Some).map_err(|_| bad_value(entry, t)),
                })
                .collect::<Result<_, _>>()?,
        ),
        HdsType::Real | HdsType::Double => Primitive::Real(
            tokens
                .iter()
                .map(|t| match is_bad(t) {
                    true => Ok(None),
                    false => lossy(t)
                        .replace(['D', 'd'], "E")
                        .parse()
                        .map(Some)
                        .map_err(|_| bad_value(entry, t)),
                })
                .collect::<Result<_, _>>()?,
        ),
        HdsType::Char(_) => Primitive::Char(tokens.iter().map(|t| unquote(t)).collect()),
        HdsType::Struct(_) => return Err(format!("{} is not a primitive", entry.name)),
    };

    Ok(Component::primitive(
        entry.name.clone(),
        hds_type,
        entry.dims.clone(),
        data,
    ))
}

/// HDS prints bad values as `*`
fn is_bad(token: &[u8]) -> bool {
    token == b"*"
}

fn bad_value(entry: &Entry, token: &[u8]) -> String {
    format!(
        "{} <{}> has unreadable value {}",
        entry.name,
        entry.type_name,
        lossy(token)
    )
}

fn parse_dims(text: &[u8]) -> Result<Vec<usize>, String> {
    lossy(text)
        .split(',')
        .map(|d| {
            d.trim()
                .parse()
                .map_err(|_| format!("bad dimensions ({})", lossy(text)))
        })
        .collect()
}

/// Split a value list on commas outside single quotes
fn split_values(text: &[u8]) -> Vec<&[u8]> {
    let mut tokens = Vec::new();
    let mut in_quote = false;
    let mut start = 0;

    for (i, &b) in text.iter().enumerate() {
        match b {
            b'\'' => in_quote = !in_quote,
            b',' if !in_quote => {
                tokens.push(text[start..i].trim_ascii());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = text[start..].trim_ascii();
    if !tail.is_empty() || !tokens.is_empty() && !text.trim_ascii().ends_with(b",") {
        tokens.push(tail);
    }
    tokens
}

/// Strip surrounding quotes and collapse doubled quotes
fn unquote(token: &[u8]) -> Vec<u8> {
    let inner = match token {
        [b'\'', inner @ .., b'\''] => inner,
        other => other,
    };

    let mut out = Vec::with_capacity(inner.len());
    let mut iter = inner.iter().peekable();
    while let Some(&b) = iter.next() {
        out.push(b);
        if b == b'\'' && iter.peek() == Some(&&b'\'') {
            iter.next();
        }
    }
    out
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
