//! Test-only fakes for the storage, job and notification boundaries, plus FITS
//! fixture builders.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};

use anyhow::{Result, anyhow};

use crate::core::fits::{BLOCK_LEN, CARD_LEN};
use crate::core::types::ObjectRef;
use crate::io::jobs::{AppTemplate, JobClient, SubmitRequest, Submission};
use crate::io::notify::Notifier;
use crate::io::storage::{StorageClient, StorageError, StorageResult, join_path, split_path};

/// Job client that answers from scripted tables and records every call.
#[derive(Default)]
pub struct ScriptedJobClient {
    apps: BTreeMap<String, AppTemplate>,
    statuses: RefCell<BTreeMap<String, String>>,
    failing_status: RefCell<BTreeSet<String>>,
    fail_submissions: RefCell<bool>,
    submissions: RefCell<Vec<SubmitRequest>>,
    status_queries: RefCell<Vec<String>>,
}

impl ScriptedJobClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app(mut self, search: &str, app: AppTemplate) -> Self {
        self.apps.insert(search.to_string(), app);
        self
    }

    /// Status reported for `job_id` from now on.
    pub fn set_status(&self, job_id: &str, status: &str) {
        self.statuses
            .borrow_mut()
            .insert(job_id.to_string(), status.to_string());
    }

    /// Make status queries for `job_id` fail.
    pub fn fail_status_for(&self, job_id: &str) {
        self.failing_status.borrow_mut().insert(job_id.to_string());
    }

    pub fn fail_submissions(&self) {
        *self.fail_submissions.borrow_mut() = true;
    }

    pub fn submissions(&self) -> Vec<SubmitRequest> {
        self.submissions.borrow().clone()
    }

    pub fn status_queries(&self) -> Vec<String> {
        self.status_queries.borrow().clone()
    }
}

impl JobClient for ScriptedJobClient {
    fn find_application(&self, search: &str) -> Result<AppTemplate> {
        self.apps
            .get(search)
            .cloned()
            .ok_or_else(|| anyhow!("no app matches {search:?}"))
    }

    fn submit(&self, request: &SubmitRequest) -> Result<Submission> {
        if *self.fail_submissions.borrow() {
            return Err(anyhow!("scripted submission failure"));
        }
        let mut submissions = self.submissions.borrow_mut();
        submissions.push(request.clone());
        let job_id = format!("job-{}", submissions.len());
        self.set_status(&job_id, "Submitted");
        Ok(Submission {
            job_id,
            status: "Submitted".to_string(),
        })
    }

    fn job_status(&self, job_id: &str) -> Result<String> {
        self.status_queries.borrow_mut().push(job_id.to_string());
        if self.failing_status.borrow().contains(job_id) {
            return Err(anyhow!("scripted status failure for {job_id}"));
        }
        self.statuses
            .borrow()
            .get(job_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown job {job_id}"))
    }
}

#[derive(Debug, Clone, Default)]
struct FakeObject {
    contents: Vec<u8>,
    metadata: BTreeMap<String, Vec<String>>,
}

/// In-memory storage with collections, objects, metadata and a move log.
#[derive(Default)]
pub struct FakeStorage {
    collections: RefCell<BTreeSet<String>>,
    objects: RefCell<BTreeMap<String, FakeObject>>,
    denied: RefCell<BTreeSet<String>>,
    moves: RefCell<Vec<(String, String)>>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collections(collections: &[&str]) -> Self {
        let storage = Self::new();
        for collection in collections {
            storage.add_collection(collection);
        }
        storage
    }

    pub fn add_collection(&self, collection: &str) {
        self.collections.borrow_mut().insert(collection.to_string());
    }

    pub fn add_object(&self, path: &str, contents: &[u8]) {
        self.objects.borrow_mut().insert(
            path.to_string(),
            FakeObject {
                contents: contents.to_vec(),
                metadata: BTreeMap::new(),
            },
        );
    }

    pub fn remove_object(&self, path: &str) {
        self.objects.borrow_mut().remove(path);
    }

    /// Make moves of `path` fail with a permission error.
    pub fn deny_moves_of(&self, path: &str) {
        self.denied.borrow_mut().insert(path.to_string());
    }

    pub fn allow_moves_of(&self, path: &str) {
        self.denied.borrow_mut().remove(path);
    }

    pub fn object_paths(&self) -> Vec<String> {
        self.objects.borrow().keys().cloned().collect()
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.objects
            .borrow()
            .get(path)
            .map(|object| object.contents.clone())
    }

    /// Successful moves as `(source path, destination collection)`.
    pub fn moves(&self) -> Vec<(String, String)> {
        self.moves.borrow().clone()
    }

    fn require_collection(&self, collection: &str) -> StorageResult<()> {
        if self.collections.borrow().contains(collection) {
            Ok(())
        } else {
            Err(StorageError::NotFound {
                path: collection.to_string(),
            })
        }
    }
}

impl StorageClient for FakeStorage {
    fn list_objects(&self, collection: &str) -> StorageResult<Vec<ObjectRef>> {
        self.require_collection(collection)?;
        Ok(self
            .objects
            .borrow()
            .keys()
            .filter(|path| split_path(path).0 == collection)
            .map(|path| ObjectRef::from_path(path.clone()))
            .collect())
    }

    fn list_collections(&self, collection: &str) -> StorageResult<Vec<String>> {
        self.require_collection(collection)?;
        Ok(self
            .collections
            .borrow()
            .iter()
            .filter(|path| split_path(path).0 == collection)
            .cloned()
            .collect())
    }

    fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.objects.borrow().contains_key(path) || self.collections.borrow().contains(path))
    }

    fn move_object(&self, path: &str, dest_collection: &str) -> StorageResult<()> {
        if self.denied.borrow().contains(path) {
            return Err(StorageError::PermissionDenied {
                path: path.to_string(),
            });
        }
        self.require_collection(dest_collection)?;
        let (_, name) = split_path(path);
        let dest = join_path(dest_collection, name);
        let mut objects = self.objects.borrow_mut();
        if !objects.contains_key(path) {
            return Err(StorageError::NotFound {
                path: path.to_string(),
            });
        }
        if objects.contains_key(&dest) {
            return Err(StorageError::AlreadyExists { path: dest });
        }
        if let Some(object) = objects.remove(path) {
            objects.insert(dest, object);
        }
        self.moves
            .borrow_mut()
            .push((path.to_string(), dest_collection.to_string()));
        Ok(())
    }

    fn create_object(&self, path: &str, contents: &[u8]) -> StorageResult<()> {
        self.require_collection(split_path(path).0)?;
        self.add_object(path, contents);
        Ok(())
    }

    fn open_object(&self, path: &str) -> StorageResult<Box<dyn Read>> {
        let contents = self.contents(path).ok_or_else(|| StorageError::NotFound {
            path: path.to_string(),
        })?;
        Ok(Box::new(Cursor::new(contents)))
    }

    fn metadata(&self, path: &str, key: &str) -> StorageResult<Vec<String>> {
        let objects = self.objects.borrow();
        let object = objects.get(path).ok_or_else(|| StorageError::NotFound {
            path: path.to_string(),
        })?;
        Ok(object.metadata.get(key).cloned().unwrap_or_default())
    }

    fn add_metadata(&self, path: &str, key: &str, value: &str) -> StorageResult<()> {
        let mut objects = self.objects.borrow_mut();
        let object = objects.get_mut(path).ok_or_else(|| StorageError::NotFound {
            path: path.to_string(),
        })?;
        object
            .metadata
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }
}

/// Notifier that keeps every `(subject, body)` it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: RefCell<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.borrow().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, subject: &str, body: &str) -> Result<()> {
        self.sent
            .borrow_mut()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Build a single-HDU FITS header: `SIMPLE = T`, the given cards, `END`.
///
/// Values are written verbatim after `"= "`, so strings must carry quotes.
pub fn fits_header(cards: &[(&str, &str)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut push_card = |text: String| {
        assert!(text.len() <= CARD_LEN, "card too long: {text}");
        bytes.extend_from_slice(format!("{text:<width$}", width = CARD_LEN).as_bytes());
    };
    push_card(format!("{:<8}= {:>20}", "SIMPLE", "T"));
    for (key, value) in cards {
        push_card(format!("{key:<8}= {value}"));
    }
    push_card("END".to_string());
    let padded = bytes.len().div_ceil(BLOCK_LEN) * BLOCK_LEN;
    bytes.resize(padded, b' ');
    bytes
}

/// Cards of an observation header that passes every rule.
pub fn valid_observation_cards() -> Vec<(&'static str, &'static str)> {
    vec![
        ("BITPIX", "16"),
        ("DATE-OBS", "'2019-05-05T03:25:53.30'"),
        ("EXPTIME", "30.0"),
        ("OBJCTRA", "'12 34 56'"),
        ("OBJCTDEC", "'-12 34 56'"),
        ("SITELAT", "'32 13 17'"),
        ("SITELONG", "'-110 56 47'"),
        ("SITEELEV", "'728.5'"),
        ("TELESCOP", "'RC 0.5m'"),
        ("COUNTRY", "'USA'"),
    ]
}
