//! Server-side session and assembly model.
//!
//! `ChunkAssembler` reproduces what the upload server does with a session:
//! it issues the upload id, verifies and stages each chunk on disk, reports
//! the missing set, and assembles the final file at finalize time. Nothing
//! becomes visible under the output directory until finalize succeeds.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chunkup_protocol::{
    ChunkUploadResponse, InitUploadRequest, InitUploadResponse, UploadStatusResponse,
};
use tracing::{debug, info};

use crate::chunked::ChunkLayout;
use crate::hasher::{file_digest, verify_chunk_digest};
use crate::validation::validate_file_name;
use crate::TransferError;

/// Directory under the output root holding in-progress sessions.
const STAGING_DIR: &str = ".staging";

/// Name of the file being assembled inside a session's staging directory.
const ASSEMBLING_FILE: &str = "assembling";

/// A file committed by [`ChunkAssembler::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFile {
    pub file_id: u64,
    pub title: String,
    pub path: PathBuf,
    pub size: u64,
    /// Full MD5 of the assembled file.
    pub digest: String,
}

struct StagedUpload {
    title: String,
    file_name: String,
    layout: ChunkLayout,
    dir: PathBuf,
    received: BTreeSet<u32>,
    assembled: Option<AssembledFile>,
}

impl StagedUpload {
    fn missing(&self) -> Vec<u32> {
        (0..self.layout.total_chunks())
            .filter(|i| !self.received.contains(i))
            .collect()
    }

    fn uploaded(&self) -> u32 {
        self.received.len() as u32
    }

    fn percentage(&self) -> f64 {
        f64::from(self.uploaded()) / f64::from(self.layout.total_chunks()) * 100.0
    }

    fn part_path(&self, index: u32) -> PathBuf {
        self.dir.join(format!("{index:08}.part"))
    }
}

/// Tracks upload sessions and assembles their chunks into files.
pub struct ChunkAssembler {
    output_root: PathBuf,
    max_file_size: Option<u64>,
    sessions: HashMap<String, StagedUpload>,
    next_file_id: u64,
}

impl ChunkAssembler {
    /// Creates an assembler writing finished files under `output_root`.
    pub fn new(output_root: &Path) -> Self {
        Self {
            output_root: output_root.to_path_buf(),
            max_file_size: None,
            sessions: HashMap::new(),
            next_file_id: 1,
        }
    }

    /// Rejects sessions for files larger than `max` bytes.
    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = Some(max);
        self
    }

    /// Opens a new session.
    pub fn init(&mut self, req: &InitUploadRequest) -> Result<InitUploadResponse, TransferError> {
        validate_file_name(&req.file_name)?;
        if req.file_title.trim().is_empty() {
            return Err(TransferError::EmptyTitle);
        }
        if let Some(max) = self.max_file_size
            && req.file_size > max
        {
            return Err(TransferError::FileTooLarge {
                size: req.file_size,
                max,
            });
        }
        let layout = ChunkLayout::new(req.file_size, req.chunk_size)?;
        if layout.total_chunks() != req.total_chunks {
            return Err(TransferError::InvalidRequest(format!(
                "total_chunks mismatch: expected {}, got {}",
                layout.total_chunks(),
                req.total_chunks
            )));
        }

        let upload_id = uuid::Uuid::new_v4().to_string();
        let dir = self.output_root.join(STAGING_DIR).join(&upload_id);
        std::fs::create_dir_all(&dir)?;

        info!(
            upload_id = %upload_id,
            file = %req.file_name,
            total_chunks = req.total_chunks,
            "upload session opened"
        );

        self.sessions.insert(
            upload_id.clone(),
            StagedUpload {
                title: req.file_title.clone(),
                file_name: req.file_name.clone(),
                layout,
                dir,
                received: BTreeSet::new(),
                assembled: None,
            },
        );

        Ok(InitUploadResponse {
            upload_id,
            file_id: None,
            detail: "Chunked upload initialized".into(),
            total_chunks: layout.total_chunks(),
            chunk_size: layout.chunk_size(),
        })
    }

    /// Verifies and stages one chunk. Re-sending a received chunk overwrites
    /// it without changing the count.
    pub fn accept_chunk(
        &mut self,
        upload_id: &str,
        index: u32,
        digest: &str,
        data: &[u8],
    ) -> Result<ChunkUploadResponse, TransferError> {
        let session = self.session_mut(upload_id)?;
        if session.assembled.is_some() {
            return Err(TransferError::InvalidRequest(
                "upload already completed".into(),
            ));
        }

        let expected_len = session.layout.chunk_len(index)?;
        if data.len() as u64 != expected_len {
            return Err(TransferError::InvalidRequest(format!(
                "chunk {index} is {} bytes, expected {expected_len}",
                data.len()
            )));
        }
        if !verify_chunk_digest(data, digest) {
            return Err(TransferError::DigestMismatch { index });
        }

        std::fs::write(session.part_path(index), data)?;
        session.received.insert(index);

        debug!(upload_id, chunk = index, "chunk staged");

        Ok(ChunkUploadResponse {
            detail: format!("Chunk {index} uploaded successfully"),
            chunk_number: index,
            chunk_size: expected_len,
            uploaded_chunks: session.uploaded(),
            total_chunks: session.layout.total_chunks(),
            progress_percentage: session.percentage(),
        })
    }

    /// Reports received and missing chunks.
    pub fn status(&self, upload_id: &str) -> Result<UploadStatusResponse, TransferError> {
        let session = self
            .sessions
            .get(upload_id)
            .ok_or_else(|| TransferError::SessionNotFound(upload_id.to_string()))?;
        Ok(UploadStatusResponse {
            upload_id: upload_id.to_string(),
            file_title: session.title.clone(),
            total_chunks: session.layout.total_chunks(),
            uploaded_chunks: session.uploaded(),
            is_complete: session.assembled.is_some(),
            progress_percentage: session.percentage(),
            missing_chunks: session.missing(),
        })
    }

    /// Assembles the staged chunks into the final file.
    ///
    /// Fails with [`TransferError::IncompleteUpload`] while chunks are
    /// missing. Finalizing an already assembled session returns the same file.
    pub fn finalize(&mut self, upload_id: &str) -> Result<AssembledFile, TransferError> {
        let file_id = self.next_file_id;
        let output_root = self.output_root.clone();
        let session = self.session_mut(upload_id)?;

        if let Some(done) = &session.assembled {
            return Ok(done.clone());
        }
        let missing = session.missing();
        if !missing.is_empty() {
            return Err(TransferError::IncompleteUpload { missing });
        }

        // Assemble inside staging; only a complete file is renamed out.
        let staged = session.dir.join(ASSEMBLING_FILE);
        {
            let mut out = BufWriter::new(File::create(&staged)?);
            for index in 0..session.layout.total_chunks() {
                let mut part = File::open(session.part_path(index))?;
                std::io::copy(&mut part, &mut out)?;
            }
            out.flush()?;
        }

        let size = std::fs::metadata(&staged)?.len();
        if size != session.layout.file_size() {
            std::fs::remove_file(&staged)?;
            return Err(TransferError::InvalidRequest(format!(
                "assembled {size} bytes, expected {}",
                session.layout.file_size()
            )));
        }
        let digest = file_digest(&staged)?;

        let path = output_root.join(format!("{file_id}_{}", session.file_name));
        std::fs::rename(&staged, &path)?;
        let assembled = AssembledFile {
            file_id,
            title: session.title.clone(),
            digest,
            path,
            size,
        };
        std::fs::remove_dir_all(&session.dir)?;
        session.assembled = Some(assembled.clone());
        self.next_file_id += 1;

        info!(
            upload_id,
            file_id,
            size,
            digest = %assembled.digest,
            "upload assembled"
        );
        Ok(assembled)
    }

    /// Drops a session and its staged chunks.
    pub fn cancel(&mut self, upload_id: &str) -> Result<(), TransferError> {
        let session = self
            .sessions
            .remove(upload_id)
            .ok_or_else(|| TransferError::SessionNotFound(upload_id.to_string()))?;
        if session.assembled.is_none() && session.dir.exists() {
            std::fs::remove_dir_all(&session.dir)?;
        }
        info!(upload_id, "upload session released");
        Ok(())
    }

    fn session_mut(&mut self, upload_id: &str) -> Result<&mut StagedUpload, TransferError> {
        self.sessions
            .get_mut(upload_id)
            .ok_or_else(|| TransferError::SessionNotFound(upload_id.to_string()))
    }
}
