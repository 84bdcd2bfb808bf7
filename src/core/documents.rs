/*
 * Structured-document access for the XML files a deployment works with
 * (publish profiles, application manifests, application parameter files and
 * cluster manifests). It loads a document, hands a parsed `roxmltree` tree to
 * a caller-supplied closure, and projects an element's attributes into an
 * `AttributeMap` with boolean coercion applied once at ingestion.
 *
 * Elements are matched by local name so that documents declaring the default
 * fabric XML namespace are read the same as un-namespaced ones.
 */
use super::models::{AttributeMap, AttributeValue};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum DocumentError {
    NotFound(PathBuf),
    Io { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, message: String },
    MissingElement { path: PathBuf, element: String },
}

impl DocumentError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocumentError::NotFound(_))
    }

    pub fn missing(path: &Path, element: &str) -> Self {
        DocumentError::MissingElement {
            path: path.to_path_buf(),
            element: element.to_string(),
        }
    }
}

impl std::fmt::Display for DocumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentError::NotFound(path) => write!(f, "Document not found: {path:?}"),
            DocumentError::Io { path, source } => {
                write!(f, "I/O error reading document {path:?}: {source}")
            }
            DocumentError::Parse { path, message } => {
                write!(f, "Malformed document {path:?}: {message}")
            }
            DocumentError::MissingElement { path, element } => {
                write!(f, "Document {path:?} has no '{element}'")
            }
        }
    }
}

impl std::error::Error for DocumentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DocumentError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DocumentError>;

/// Reads a document's text, reporting a missing file before any parse is attempted.
pub fn load_document_text(path: &Path) -> Result<String> {
    if !path.is_file() {
        log::debug!("Documents: {path:?} does not exist or is not a file.");
        return Err(DocumentError::NotFound(path.to_path_buf()));
    }
    fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/*
 * Parses `text` and runs `f` against the resulting tree. `origin` is only used
 * to label errors, so in-memory documents (such as a cluster manifest fetched
 * from the cluster) can pass a descriptive placeholder path.
 */
pub fn with_document_text<T>(
    origin: &Path,
    text: &str,
    f: impl FnOnce(&roxmltree::Document) -> Result<T>,
) -> Result<T> {
    let doc = roxmltree::Document::parse(text).map_err(|e| DocumentError::Parse {
        path: origin.to_path_buf(),
        message: e.to_string(),
    })?;
    f(&doc)
}

pub fn with_document<T>(
    path: &Path,
    f: impl FnOnce(&roxmltree::Document) -> Result<T>,
) -> Result<T> {
    log::trace!("Documents: Loading {path:?}");
    let text = load_document_text(path)?;
    with_document_text(path, &text, f)
}

/// First child element of `node` whose local name is `name`.
pub fn child_element<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    child_elements(node, name).next()
}

pub fn child_elements<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

/*
 * Projects every attribute of `element` into a fresh map. Values that parse
 * as `true`/`false` are stored as flags, everything else verbatim. An element
 * without attributes yields an empty map.
 */
pub fn read_element_attributes(element: roxmltree::Node) -> AttributeMap {
    element
        .attributes()
        .map(|attr| (attr.name().to_string(), AttributeValue::from_raw(attr.value())))
        .collect()
}

/// Attributes of the named child section, or an empty map when the section is absent.
pub fn read_section_attributes(parent: roxmltree::Node, section: &str) -> AttributeMap {
    child_element(parent, section)
        .map(read_element_attributes)
        .unwrap_or_default()
}
