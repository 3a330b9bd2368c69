//! Schema loaders and the definition-text parser.
//!
//! A [`SchemaLoader`] turns a fully-qualified type name into a parsed
//! definition.  [`FileSchemaLoader`] walks the ecosystem-standard
//! colon-separated search path (`<root>/<package>/msg/<Type>.msg`),
//! indexed once on cold start.  [`StaticSchemaLoader`] serves definitions
//! from memory and backs the embedded schemas and tests.

use crate::error::MessageError;
use crate::field::{Constant, Field, is_builtin};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable holding the colon-separated schema search path.
pub const SCHEMA_PATH_ENV: &str = "ROS_PACKAGE_PATH";

/// A parsed message definition as handed out by a loader.
#[derive(Debug, Clone)]
pub struct MessageDefinition {
    pub fields: Vec<Field>,
    pub constants: Vec<Constant>,
    /// The raw definition text.
    pub text: String,
    /// Digest, when the source already knows it (compiled bindings do).
    /// `None` lets the schema context derive it from the field list.
    pub md5: Option<String>,
}

/// Source of message definitions, keyed by fully-qualified type name.
pub trait SchemaLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<MessageDefinition, MessageError>;
}

// ---------------------------------------------------------------------------
// StaticSchemaLoader
// ---------------------------------------------------------------------------

/// In-memory loader over `(name, definition text)` pairs.
#[derive(Debug, Default)]
pub struct StaticSchemaLoader {
    defs: HashMap<String, (String, Option<String>)>,
}

impl StaticSchemaLoader {
    pub fn new() -> Self {
        StaticSchemaLoader::default()
    }

    pub fn insert(&mut self, name: &str, text: &str) {
        self.defs
            .insert(name.to_owned(), (text.to_owned(), None));
    }

    /// Insert a definition together with its known digest, bypassing
    /// digest derivation (required for recursive definitions, whose
    /// derived digest would be self-referential).
    pub fn insert_with_md5(&mut self, name: &str, text: &str, md5: &str) {
        self.defs
            .insert(name.to_owned(), (text.to_owned(), Some(md5.to_owned())));
    }
}

impl SchemaLoader for StaticSchemaLoader {
    fn load(&self, name: &str) -> Result<MessageDefinition, MessageError> {
        let (text, md5) = self
            .defs
            .get(name)
            .ok_or_else(|| MessageError::UnknownType(name.to_owned()))?;
        let package = name
            .split_once('/')
            .map(|(pkg, _)| pkg)
            .ok_or_else(|| MessageError::Parse(format!("type name {name} is not fully qualified")))?;
        let (fields, constants) = parse_definition(package, text)?;
        Ok(MessageDefinition {
            fields,
            constants,
            text: text.clone(),
            md5: md5.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// FileSchemaLoader
// ---------------------------------------------------------------------------

/// Loader over `.msg` files found beneath a list of package roots.
///
/// The index is built once at construction; the first root containing a
/// given `package/Type` wins.
#[derive(Debug)]
pub struct FileSchemaLoader {
    index: HashMap<String, PathBuf>,
}

impl FileSchemaLoader {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut index = HashMap::new();
        for root in roots {
            index_root(root.as_ref(), &mut index);
        }
        FileSchemaLoader { index }
    }

    /// Build from the colon-separated search path in [`SCHEMA_PATH_ENV`];
    /// an unset variable yields an empty index.
    pub fn from_env() -> Self {
        let raw = std::env::var(SCHEMA_PATH_ENV).unwrap_or_default();
        FileSchemaLoader::new(raw.split(':').filter(|p| !p.is_empty()).map(PathBuf::from))
    }

    /// Number of indexed definitions.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn index_root(root: &Path, index: &mut HashMap<String, PathBuf>) {
    let Ok(packages) = fs::read_dir(root) else {
        return;
    };
    for package in packages.flatten() {
        let package_path = package.path();
        if !package_path.is_dir() {
            continue;
        }
        let Some(package_name) = package_path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Ok(entries) = fs::read_dir(package_path.join("msg")) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("msg") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            index
                .entry(format!("{package_name}/{stem}"))
                .or_insert(path);
        }
    }
}

impl SchemaLoader for FileSchemaLoader {
    fn load(&self, name: &str) -> Result<MessageDefinition, MessageError> {
        let path = self
            .index
            .get(name)
            .ok_or_else(|| MessageError::UnknownType(name.to_owned()))?;
        let text = fs::read_to_string(path)?;
        let package = name
            .split_once('/')
            .map(|(pkg, _)| pkg)
            .ok_or_else(|| MessageError::Parse(format!("type name {name} is not fully qualified")))?;
        let (fields, constants) = parse_definition(package, &text)?;
        Ok(MessageDefinition {
            fields,
            constants,
            text,
            md5: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Definition-text parser
// ---------------------------------------------------------------------------

/// Parse `.msg` definition text declared inside `package`.
///
/// Comments (`#`) are stripped except inside string-constant values,
/// which keep everything after the `=`.  Unqualified nested type names
/// resolve against the declaring package; the bare name `Header` resolves
/// to `std_msgs/Header`.
pub fn parse_definition(
    package: &str,
    text: &str,
) -> Result<(Vec<Field>, Vec<Constant>), MessageError> {
    let mut fields = Vec::new();
    let mut constants = Vec::new();
    for (lineno, raw) in text.lines().enumerate() {
        let stripped = strip_comment(raw).trim();
        if stripped.is_empty() {
            continue;
        }
        if stripped.contains('=') {
            constants.push(parse_constant(raw, stripped, lineno)?);
        } else {
            fields.push(parse_field(package, stripped, lineno)?);
        }
    }
    Ok((fields, constants))
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_constant(raw: &str, stripped: &str, lineno: usize) -> Result<Constant, MessageError> {
    let eq = stripped.find('=').expect("caller checked for '='");
    let decl = &stripped[..eq];
    let mut tokens = decl.split_whitespace();
    let ty = tokens
        .next()
        .ok_or_else(|| malformed(lineno, "constant missing type"))?;
    let name = tokens
        .next()
        .ok_or_else(|| malformed(lineno, "constant missing name"))?;
    if tokens.next().is_some() {
        return Err(malformed(lineno, "extra tokens before '='"));
    }
    let ty = normalize_alias(ty);
    if !is_builtin(ty) || ty == "time" || ty == "duration" {
        return Err(malformed(lineno, "constants must have a primitive type"));
    }
    let value = if ty == "string" {
        // String constants take the rest of the line, embedded '#' included.
        let raw_eq = raw.find('=').ok_or_else(|| malformed(lineno, "missing '='"))?;
        raw[raw_eq + 1..].trim().to_owned()
    } else {
        stripped[eq + 1..].trim().to_owned()
    };
    Ok(Constant {
        ty: ty.to_owned(),
        name: name.to_owned(),
        value,
    })
}

fn parse_field(package: &str, stripped: &str, lineno: usize) -> Result<Field, MessageError> {
    let mut tokens = stripped.split_whitespace();
    let type_token = tokens
        .next()
        .ok_or_else(|| malformed(lineno, "missing type"))?;
    let name = tokens
        .next()
        .ok_or_else(|| malformed(lineno, "missing field name"))?;
    if tokens.next().is_some() {
        return Err(malformed(lineno, "extra tokens after field name"));
    }

    let (base, array, array_len) = match type_token.find('[') {
        None => (type_token, false, -1),
        Some(open) => {
            if !type_token.ends_with(']') {
                return Err(malformed(lineno, "unterminated array brackets"));
            }
            let inside = &type_token[open + 1..type_token.len() - 1];
            let len = if inside.is_empty() {
                -1
            } else {
                inside
                    .parse::<u32>()
                    .map_err(|_| malformed(lineno, "bad array length"))?
                    .try_into()
                    .map_err(|_| malformed(lineno, "array length out of range"))?
            };
            (&type_token[..open], true, len)
        }
    };

    let base = normalize_alias(base);
    if is_builtin(base) {
        return Ok(if array {
            Field::builtin_array(base, name, array_len)
        } else {
            Field::builtin(base, name)
        });
    }

    let (pkg, ty) = match base.split_once('/') {
        Some((pkg, ty)) if !pkg.is_empty() && !ty.is_empty() => (pkg, ty),
        Some(_) => return Err(malformed(lineno, "bad qualified type name")),
        None if base == "Header" => ("std_msgs", "Header"),
        None => (package, base),
    };
    Ok(if array {
        Field::message_array(pkg, ty, name, array_len)
    } else {
        Field::message(pkg, ty, name)
    })
}

fn normalize_alias(ty: &str) -> &str {
    match ty {
        "byte" => "int8",
        "char" => "uint8",
        other => other,
    }
}

fn malformed(lineno: usize, what: &str) -> MessageError {
    MessageError::Parse(format!("line {}: {what}", lineno + 1))
}
