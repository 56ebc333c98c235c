//! Document corpus loading.
//!
//! Documents are read as UTF-8 text from a single directory (no recursion).
//! Declarations documents are named `<holder>-declarations.<ext>` and are
//! linked to a policy number through the sibling claim file `<holder>.json`.

use std::path::{Path, PathBuf};

use claimwise_core::{Metadata, PolicyDocument, meta, parse_claim};
use tracing::{debug, info};

use crate::StoreError;

const DECLARATIONS_SUFFIX: &str = "-declarations";

/// Per-document metadata hook, called with the document's source path.
pub type MetadataExtractor<'a> = dyn Fn(&Path) -> Result<Metadata, StoreError> + 'a;

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Accepted file extensions, without the dot, compared case-insensitively.
    pub extensions: Vec<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["md".into(), "txt".into()],
        }
    }
}

impl LoadOptions {
    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
    }
}

/// Load every accepted file in `dir` whose name passes `select`, in file-name order.
///
/// Extractor output is merged over the default `file_name`/`file_path`
/// metadata. An extractor error fails the whole load.
pub fn load_documents(
    dir: &Path,
    options: &LoadOptions,
    select: impl Fn(&str) -> bool,
    extractor: Option<&MetadataExtractor<'_>>,
) -> Result<Vec<PolicyDocument>, StoreError> {
    info!(dir = %dir.display(), "loading documents");

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !options.accepts(&path) {
            continue;
        }
        if file_name(&path).is_some_and(&select) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let name = file_name(&path).unwrap_or_default().to_string();
        let content = std::fs::read_to_string(&path)?;

        let mut metadata = Metadata::new();
        metadata.insert(meta::FILE_NAME.into(), name.clone());
        metadata.insert(meta::FILE_PATH.into(), path.display().to_string());
        if let Some(extract) = extractor {
            metadata.extend(extract(&path)?);
        }

        debug!(file = %name, chars = content.len(), "loaded document");
        documents.push(PolicyDocument {
            id: name,
            content,
            metadata,
        });
    }

    info!(dir = %dir.display(), count = documents.len(), "loaded documents");
    Ok(documents)
}

/// Load the general policy documents: everything that is not a declarations page.
///
/// When `only` is non-empty, just the named files are kept.
pub fn load_policy_corpus(
    dir: &Path,
    options: &LoadOptions,
    only: &[String],
) -> Result<Vec<PolicyDocument>, StoreError> {
    load_documents(
        dir,
        options,
        |name| {
            holder_from_declarations(name).is_none()
                && (only.is_empty() || only.iter().any(|o| o == name))
        },
        None,
    )
}

/// Load the declarations pages, each tagged with its holder's policy number.
pub fn load_declarations(
    dir: &Path,
    claims_root: &Path,
    options: &LoadOptions,
) -> Result<Vec<PolicyDocument>, StoreError> {
    let extractor = PolicyNumberExtractor::new(claims_root);
    let extract = |path: &Path| extractor.extract(path);
    load_documents(
        dir,
        options,
        |name| holder_from_declarations(name).is_some(),
        Some(&extract),
    )
}

/// `john-declarations.md` → `john`.
pub fn holder_from_declarations(file_name: &str) -> Option<&str> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    stem.strip_suffix(DECLARATIONS_SUFFIX)
        .filter(|holder| !holder.is_empty())
}

/// Links a declarations file to a policy number via `<claims_root>/<holder>.json`.
#[derive(Debug, Clone)]
pub struct PolicyNumberExtractor {
    claims_root: PathBuf,
}

impl PolicyNumberExtractor {
    pub fn new(claims_root: &Path) -> Self {
        Self {
            claims_root: claims_root.to_path_buf(),
        }
    }

    pub fn extract(&self, path: &Path) -> Result<Metadata, StoreError> {
        debug!(path = %path.display(), "extracting policy number from filename");
        let name = file_name(path).ok_or_else(|| StoreError::Linkage {
            path: path.to_path_buf(),
            reason: "path has no UTF-8 file name".into(),
        })?;
        let holder = holder_from_declarations(name).ok_or_else(|| StoreError::Linkage {
            path: path.to_path_buf(),
            reason: format!("expected a name like <holder>{DECLARATIONS_SUFFIX}.<ext>"),
        })?;

        let claim_path = self.claims_root.join(format!("{holder}.json"));
        if !claim_path.is_file() {
            return Err(StoreError::Linkage {
                path: path.to_path_buf(),
                reason: format!("claim file {} not found", claim_path.display()),
            });
        }
        let claim = parse_claim(&claim_path)?;

        let mut metadata = Metadata::new();
        metadata.insert(meta::POLICY_NUMBER.into(), claim.policy_number);
        metadata.insert(meta::FILE_NAME.into(), name.to_string());
        Ok(metadata)
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}
