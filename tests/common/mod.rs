#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use http_body_util::BodyExt;
use lopdf::{
    Dictionary, Document, EncryptionState, EncryptionVersion, Object, Permissions, Stream,
    StringFormat,
};
use rust_pdf_merger::config::MergeConfig;
use rust_pdf_merger::services::merge_service::MergeService;
use rust_pdf_merger::services::storage::RemoteStore;
use rust_pdf_merger::{AppState, create_app};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const BOUNDARY: &str = "---------------------------pdfmergerboundary";

/// Document whose pages carry a `Label` entry, e.g. "A1", "A2".
pub fn sample_pdf(label: &str, pages: usize) -> Vec<u8> {
    padded_pdf(label, pages, 0)
}

/// Like [`sample_pdf`], plus an uncompressed stream of `padding` bytes.
pub fn padded_pdf(label: &str, pages: usize, padding: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::with_capacity(pages);
    for i in 0..pages {
        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("Parent", Object::Reference(pages_id));
        page.set(
            "Label",
            Object::string_literal(format!("{}{}", label, i + 1)),
        );
        kids.push(Object::Reference(doc.add_object(page)));
    }

    let mut tree = Dictionary::new();
    tree.set("Type", Object::Name(b"Pages".to_vec()));
    tree.set("Kids", Object::Array(kids));
    tree.set("Count", Object::Integer(pages as i64));
    doc.objects.insert(pages_id, Object::Dictionary(tree));

    if padding > 0 {
        doc.add_object(Stream::new(Dictionary::new(), vec![b'0'; padding]));
    }

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// Encrypted copy of [`sample_pdf`]; an empty `user` password opens freely.
pub fn encrypted_pdf(label: &str, pages: usize, owner: &str, user: &str) -> Vec<u8> {
    let mut doc = Document::load_mem(&sample_pdf(label, pages)).unwrap();
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(vec![1u8; 16], StringFormat::Literal),
            Object::String(vec![2u8; 16], StringFormat::Literal),
        ]),
    );
    let state = EncryptionState::try_from(EncryptionVersion::V2 {
        document: &doc,
        owner_password: owner,
        user_password: user,
        key_length: 128,
        permissions: Permissions::all(),
    })
    .unwrap();
    doc.encrypt(&state).unwrap();

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// Page labels of a serialised document, in page order
pub fn labels(bytes: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .values()
        .map(|id| {
            let page = doc.get_object(*id).unwrap().as_dict().unwrap();
            let raw = page.get(b"Label").unwrap().as_str().unwrap();
            String::from_utf8_lossy(raw).to_string()
        })
        .collect()
}

pub fn multipart_body(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                Content-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
                Content-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// In-memory object store; `fail` makes every upload error out.
pub struct MockRemoteStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub fail: bool,
}

impl MockRemoteStore {
    pub fn new(fail: bool) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            fail,
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn upload_path(&self, key: &str, path: &Path) -> anyhow::Result<u64> {
        if self.fail {
            return Err(anyhow!("bucket unavailable"));
        }
        let data = std::fs::read(path)?;
        let size = data.len() as u64;
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(size)
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> anyhow::Result<String> {
        Ok(format!(
            "http://mock-store/{}?expires={}",
            key,
            expires_in.as_secs()
        ))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn describe(&self) -> String {
        "mock://bucket".to_string()
    }
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    // Keeps the staging root alive for the duration of the test
    pub root: tempfile::TempDir,
}

impl TestApp {
    pub fn new(remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self::with_config(remote, |_| {})
    }

    pub fn with_config(
        remote: Option<Arc<dyn RemoteStore>>,
        configure: impl FnOnce(&mut MergeConfig),
    ) -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut config = MergeConfig::development(root.path());
        configure(&mut config);
        let state = AppState::new(MergeService::new(config, remote));
        Self {
            app: create_app(state.clone()),
            state,
            root,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (u16, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.send(request).await;
        let status = response.status().as_u16();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    pub async fn create_session(&self) -> String {
        let (status, json) = self.json("POST", "/sessions", None).await;
        assert_eq!(status, 201, "{}", json);
        json["id"].as_str().unwrap().to_string()
    }

    pub async fn upload(&self, session: &str, files: &[(&str, &[u8])]) -> (u16, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/sessions/{}/files", session))
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(files)))
            .unwrap();
        let response = self.send(request).await;
        let status = response.status().as_u16();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    pub async fn download(&self, url: &str) -> (u16, Vec<u8>) {
        let request = Request::builder().uri(url).body(Body::empty()).unwrap();
        let response = self.send(request).await;
        let status = response.status().as_u16();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }
}
