//! Scripted in-memory session for adapter tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ShareError;
use crate::status::NtStatus;
use crate::transport::{FileId, OpenOptions, ShareConnector, ShareSession, ShareTarget};

#[derive(Default)]
pub(crate) struct FakeSession {
    next_id: Mutex<u64>,
    open_paths: Mutex<HashMap<FileId, String>>,
    pub created: Mutex<Vec<(String, OpenOptions)>>,
    pub missing: Mutex<Vec<String>>,
    pub pages: Mutex<VecDeque<Bytes>>,
    pub reads: Mutex<VecDeque<Result<Bytes, ShareError>>>,
    pub read_offsets: Mutex<Vec<u64>>,
    pub written: Mutex<HashMap<String, Vec<u8>>>,
    pub closed: Mutex<usize>,
}

impl FakeSession {
    pub fn with_pages(pages: Vec<Vec<u8>>) -> Self {
        let session = Self::default();
        *session.pages.lock().unwrap() = pages.into_iter().map(Bytes::from).collect();
        session
    }

    pub fn script_reads(&self, reads: Vec<Result<&'static str, ShareError>>) {
        *self.reads.lock().unwrap() = reads
            .into_iter()
            .map(|r| r.map(|s| Bytes::from_static(s.as_bytes())))
            .collect();
    }

    /// Handles created and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.open_paths.lock().unwrap().len()
    }
}

#[async_trait]
impl ShareSession for FakeSession {
    async fn create(&self, path: &str, options: &OpenOptions) -> Result<FileId, ShareError> {
        if self.missing.lock().unwrap().iter().any(|m| m == path) {
            return Err(NtStatus::OBJECT_NAME_NOT_FOUND.into());
        }
        self.created
            .lock()
            .unwrap()
            .push((path.to_string(), options.clone()));
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let id = FileId {
            persistent: *next,
            volatile: *next,
        };
        self.open_paths.lock().unwrap().insert(id, path.to_string());
        Ok(id)
    }

    async fn query_directory(
        &self,
        _directory: FileId,
        _pattern: &str,
        _restart_scan: bool,
    ) -> Result<Bytes, ShareError> {
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ShareError::Status(NtStatus::NO_MORE_FILES))
    }

    async fn read(&self, _file: FileId, offset: u64, _length: u32) -> Result<Bytes, ShareError> {
        self.read_offsets.lock().unwrap().push(offset);
        self.reads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Bytes::new()))
    }

    async fn write(&self, file: FileId, offset: u64, data: &[u8]) -> Result<u32, ShareError> {
        let path = self.open_paths.lock().unwrap()[&file].clone();
        let mut written = self.written.lock().unwrap();
        let buf = written.entry(path).or_default();
        let offset = offset as usize;
        if buf.len() < offset + data.len() {
            buf.resize(offset + data.len(), 0);
        }
        buf[offset..offset + data.len()].copy_from_slice(data);
        Ok(data.len() as u32)
    }

    async fn close(&self, file: FileId) -> Result<(), ShareError> {
        self.open_paths.lock().unwrap().remove(&file);
        *self.closed.lock().unwrap() += 1;
        Ok(())
    }
}

pub(crate) struct FakeConnector {
    pub session: Arc<FakeSession>,
    pub refuse_with: Option<ShareError>,
}

impl FakeConnector {
    pub fn new(session: Arc<FakeSession>) -> Self {
        Self {
            session,
            refuse_with: None,
        }
    }
}

#[async_trait]
impl ShareConnector for FakeConnector {
    async fn connect(&self, _target: &ShareTarget) -> Result<Arc<dyn ShareSession>, ShareError> {
        match &self.refuse_with {
            Some(err) => Err(err.clone()),
            None => Ok(self.session.clone()),
        }
    }
}
