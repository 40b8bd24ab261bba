//! Pairwise merging of page-container documents.
//!
//! Exactly two documents are held in memory while a pair is merged. Both
//! page trees are hung under a new root page node that carries no
//! inheritable attributes, so each tree keeps rendering with its own media
//! box, rotation and resources. Nothing is recompressed.

use crate::error::{MergeError, Result};
use crate::utils::temp;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;
use std::io::BufWriter;
use std::path::Path;
use tempfile::TempPath;
use utoipa::ToSchema;

/// Result of opening a staged document once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Inspection {
    /// Not opened, page counting was skipped
    Skipped,
    Readable { pages: usize },
    Encrypted,
    Unreadable { reason: String },
}

impl Inspection {
    /// Inputs in this state keep the merge disabled
    pub fn is_blocking(&self) -> bool {
        matches!(self, Inspection::Encrypted | Inspection::Unreadable { .. })
    }

    pub fn pages(&self) -> Option<usize> {
        match self {
            Inspection::Readable { pages } => Some(*pages),
            _ => None,
        }
    }
}

/// One side of a pairwise merge
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    pub name: &'a str,
    pub path: &'a Path,
}

/// Output of a pairwise merge
#[derive(Debug)]
pub struct PairMerge {
    pub path: TempPath,
    pub size: u64,
    pub pages: Option<usize>,
}

fn looks_encrypted(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("password") || message.contains("encrypt") || message.contains("decrypt")
}

/// Loads a document, classifying failures against the input's display name.
pub fn open(source: Source<'_>) -> Result<Document> {
    match Document::load(source.path) {
        Ok(doc) => {
            if doc.trailer.get(b"Encrypt").is_ok() {
                return Err(MergeError::Encrypted {
                    name: source.name.to_string(),
                });
            }
            Ok(doc)
        }
        Err(e) => {
            let reason = e.to_string();
            if looks_encrypted(&reason) {
                Err(MergeError::Encrypted {
                    name: source.name.to_string(),
                })
            } else {
                Err(MergeError::Unreadable {
                    name: source.name.to_string(),
                    reason,
                })
            }
        }
    }
}

/// Opens a staged file once to count its pages and detect problems early.
pub fn inspect(source: Source<'_>) -> Inspection {
    match open(source) {
        Ok(doc) => match root_pages_id(&doc) {
            Ok(_) => Inspection::Readable {
                pages: doc.get_pages().len(),
            },
            Err(e) => Inspection::Unreadable {
                reason: e.to_string(),
            },
        },
        Err(MergeError::Encrypted { .. }) => Inspection::Encrypted,
        Err(MergeError::Unreadable { reason, .. }) => Inspection::Unreadable { reason },
        Err(e) => Inspection::Unreadable {
            reason: e.to_string(),
        },
    }
}

pub fn count_pages(source: Source<'_>) -> Result<usize> {
    Ok(open(source)?.get_pages().len())
}

fn catalog_id(doc: &Document) -> std::result::Result<ObjectId, lopdf::Error> {
    doc.trailer.get(b"Root")?.as_reference()
}

fn root_pages_id(doc: &Document) -> std::result::Result<ObjectId, lopdf::Error> {
    let catalog = doc.get_object(catalog_id(doc)?)?.as_dict()?;
    catalog.get(b"Pages")?.as_reference()
}

/// Appends every page of `source` to the end of `target`.
pub fn append_document(
    target: &mut Document,
    mut source: Document,
) -> std::result::Result<(), lopdf::Error> {
    let target_root = root_pages_id(target)?;
    let target_pages = target.get_pages().len() as i64;

    source.renumber_objects_with(target.max_id + 1);
    let source_root = root_pages_id(&source)?;
    let source_pages = source.get_pages().len() as i64;

    // The second document's catalog and info dictionary are not carried over
    let source_catalog = catalog_id(&source)?;
    source.objects.remove(&source_catalog);
    if let Ok(info) = source
        .trailer
        .get(b"Info")
        .and_then(Object::as_reference)
    {
        source.objects.remove(&info);
    }

    if source.version > target.version {
        target.version = source.version.clone();
    }
    target.objects.extend(source.objects);
    target.max_id = target
        .objects
        .keys()
        .map(|(id, _)| *id)
        .max()
        .unwrap_or(target.max_id);

    // A fresh root keeps inheritable keys (Rotate, CropBox, Resources) of
    // one subtree from leaking into the other
    let new_root = (target.max_id + 1, 0);
    target.max_id = new_root.0;
    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set(
        "Kids",
        Object::Array(vec![
            Object::Reference(target_root),
            Object::Reference(source_root),
        ]),
    );
    pages.set("Count", Object::Integer(target_pages + source_pages));
    target.objects.insert(new_root, Object::Dictionary(pages));

    for subtree in [target_root, source_root] {
        target
            .get_object_mut(subtree)?
            .as_dict_mut()?
            .set("Parent", Object::Reference(new_root));
    }

    let catalog = catalog_id(target)?;
    target
        .get_object_mut(catalog)?
        .as_dict_mut()?
        .set("Pages", Object::Reference(new_root));

    Ok(())
}

/// Merges `second` onto `first` and writes the result to a new temporary
/// file in `out_dir`. The inputs are left untouched; both documents are
/// released before this returns.
pub fn merge_pair(
    first: Source<'_>,
    second: Source<'_>,
    out_dir: &Path,
    count_pages: bool,
) -> Result<PairMerge> {
    let mut target = open(first)?;
    let source = open(second)?;

    append_document(&mut target, source).map_err(|e| MergeError::Unreadable {
        name: second.name.to_string(),
        reason: e.to_string(),
    })?;

    let pages = count_pages.then(|| target.get_pages().len());

    let (file, path) = temp::create_in(out_dir, "merged-", ".pdf")?;
    let mut writer = BufWriter::new(file);
    target.save_to(&mut writer)?;
    let file = writer
        .into_inner()
        .map_err(|e| MergeError::Io(e.into_error()))?;
    file.sync_all()?;
    let size = file.metadata()?.len();
    drop(file);
    drop(target);

    Ok(PairMerge { path, size, pages })
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn src<'a>(name: &'a str, path: &'a Path) -> Source<'a> {
        Source { name, path }
    }

    #[test]
    fn test_merge_pair_appends_pages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sample(dir.path(), "a.pdf", "A", 2);
        let b = write_sample(dir.path(), "b.pdf", "B", 3);

        let merged = merge_pair(src("a.pdf", &a), src("b.pdf", &b), dir.path(), true).unwrap();

        assert_eq!(merged.pages, Some(5));
        assert!(merged.size > 0);
        assert_eq!(labels(&merged.path), vec!["A1", "A2", "B1", "B2", "B3"]);

        // Inputs are not consumed by the merger itself
        assert!(a.exists());
        assert!(b.exists());
    }

    #[test]
    fn test_merged_root_count_matches_pages() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sample(dir.path(), "a.pdf", "A", 1);
        let b = write_sample(dir.path(), "b.pdf", "B", 4);

        let merged = merge_pair(src("a", &a), src("b", &b), dir.path(), false).unwrap();
        assert_eq!(merged.pages, None);

        let doc = Document::load(&merged.path).unwrap();
        let root = root_pages_id(&doc).unwrap();
        let count = doc
            .get_object(root)
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Count")
            .unwrap()
            .as_i64()
            .unwrap();
        assert_eq!(count, 5);
        assert_eq!(doc.get_pages().len(), 5);
    }

    #[test]
    fn test_merging_a_merged_document_keeps_nested_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sample(dir.path(), "a.pdf", "A", 1);
        let b = write_sample(dir.path(), "b.pdf", "B", 1);
        let c = write_sample(dir.path(), "c.pdf", "C", 1);
        let d = write_sample(dir.path(), "d.pdf", "D", 1);

        let ab = merge_pair(src("a", &a), src("b", &b), dir.path(), true).unwrap();
        let cd = merge_pair(src("c", &c), src("d", &d), dir.path(), true).unwrap();
        let all = merge_pair(src("ab", &ab.path), src("cd", &cd.path), dir.path(), true).unwrap();

        assert_eq!(all.pages, Some(4));
        assert_eq!(labels(&all.path), vec!["A1", "B1", "C1", "D1"]);
    }

    /// Walks up the page tree until `key` is found.
    fn inherited(doc: &Document, mut id: ObjectId, key: &[u8]) -> Option<Object> {
        loop {
            let node = doc.get_object(id).unwrap().as_dict().unwrap();
            if let Ok(value) = node.get(key) {
                return Some(value.clone());
            }
            id = node.get(b"Parent").ok()?.as_reference().unwrap();
        }
    }

    #[test]
    fn test_root_attributes_stay_with_their_own_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut rotated = sample_document("A", 1);
        let root = root_pages_id(&rotated).unwrap();
        let node = rotated.get_object_mut(root).unwrap().as_dict_mut().unwrap();
        node.set("Rotate", Object::Integer(90));
        node.set(
            "MediaBox",
            Object::Array(vec![0.into(), 0.into(), 300.into(), 300.into()]),
        );
        let a = dir.path().join("a.pdf");
        std::fs::write(&a, save(rotated)).unwrap();
        let b = write_sample(dir.path(), "b.pdf", "B", 1);

        let merged = merge_pair(src("a", &a), src("b", &b), dir.path(), true).unwrap();
        assert_eq!(labels(&merged.path), vec!["A1", "B1"]);

        let doc = Document::load(&merged.path).unwrap();
        let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        let media_width = |id| {
            inherited(&doc, id, b"MediaBox").unwrap().as_array().unwrap()[2]
                .as_i64()
                .unwrap()
        };

        assert_eq!(inherited(&doc, pages[0], b"Rotate").unwrap().as_i64().unwrap(), 90);
        assert_eq!(media_width(pages[0]), 300);
        assert!(inherited(&doc, pages[1], b"Rotate").is_none());
        assert_eq!(media_width(pages[1]), 595);

        // The new root carries nothing either subtree could inherit
        let root = doc.get_object(root_pages_id(&doc).unwrap()).unwrap().as_dict().unwrap();
        assert!(root.get(b"Rotate").is_err());
        assert!(root.get(b"MediaBox").is_err());
        assert_eq!(root.get(b"Count").unwrap().as_i64().unwrap(), 2);
    }

    #[test]
    fn test_user_password_document_is_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sample(dir.path(), "a.pdf", "A", 1);
        let locked = dir.path().join("locked.pdf");
        std::fs::write(&locked, encrypted_pdf("E", 1, "owner", "secret")).unwrap();

        assert_eq!(inspect(src("locked.pdf", &locked)), Inspection::Encrypted);
        assert!(inspect(src("locked.pdf", &locked)).is_blocking());

        let err = merge_pair(src("a.pdf", &a), src("locked.pdf", &locked), dir.path(), true)
            .unwrap_err();
        match err {
            MergeError::Encrypted { name } => assert_eq!(name, "locked.pdf"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_owner_only_password_document_merges() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sample(dir.path(), "a.pdf", "A", 1);
        let restricted = dir.path().join("restricted.pdf");
        std::fs::write(&restricted, encrypted_pdf("E", 1, "owner", "")).unwrap();

        assert_eq!(
            inspect(src("restricted.pdf", &restricted)),
            Inspection::Readable { pages: 1 }
        );

        let merged = merge_pair(
            src("a.pdf", &a),
            src("restricted.pdf", &restricted),
            dir.path(),
            true,
        )
        .unwrap();
        assert_eq!(labels(&merged.path), vec!["A1", "E1"]);
    }

    #[test]
    fn test_unreadable_input_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sample(dir.path(), "a.pdf", "A", 1);
        let junk = dir.path().join("junk.pdf");
        std::fs::write(&junk, b"this is not a pdf at all").unwrap();

        let err = merge_pair(src("a.pdf", &a), src("junk.pdf", &junk), dir.path(), true)
            .unwrap_err();
        match err {
            MergeError::Unreadable { name, .. } => assert_eq!(name, "junk.pdf"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_inspect_reports_pages_and_problems() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sample(dir.path(), "a.pdf", "A", 3);
        assert_eq!(
            inspect(src("a.pdf", &a)),
            Inspection::Readable { pages: 3 }
        );

        let junk = dir.path().join("junk.pdf");
        std::fs::write(&junk, b"garbage").unwrap();
        let inspection = inspect(src("junk.pdf", &junk));
        assert!(inspection.is_blocking());
        assert!(matches!(inspection, Inspection::Unreadable { .. }));
    }

    #[test]
    fn test_encryption_messages_are_classified() {
        assert!(looks_encrypted("Decryption error: incorrect password"));
        assert!(looks_encrypted("document is Encrypted"));
        assert!(!looks_encrypted("invalid file header"));
    }

    #[test]
    fn test_count_pages() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sample(dir.path(), "a.pdf", "A", 7);
        assert_eq!(count_pages(src("a.pdf", &a)).unwrap(), 7);
    }
}
