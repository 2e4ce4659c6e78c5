//! Incremental log file reading

use crate::log_entry::{parse_lines, ParseOptions, ParsedBatch};
use anyhow::{Context, Result};
use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Configuration for the log reader
#[derive(Debug, Clone)]
pub struct LogReaderConfig {
    /// Buffer size for reading
    pub buffer_size: usize,
    /// Encoding to use (None for auto-detect)
    pub encoding: Option<&'static Encoding>,
}

impl Default for LogReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024, // 64KB buffer
            encoding: None,
        }
    }
}

/// Log file reader that remembers how far it has read.
///
/// Live reads only consume complete lines; a trailing line without its
/// newline stays in the file until the writer finishes it.
pub struct LogReader {
    /// Path to the log file
    path: PathBuf,
    /// Current byte offset in the file
    offset: u64,
    /// Lines consumed since the last reset
    line_count: usize,
    /// Configuration
    config: LogReaderConfig,
    /// Detected or specified encoding
    encoding: &'static Encoding,
}

impl LogReader {
    /// Create a reader positioned at the start of the file
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(path, LogReaderConfig::default())
    }

    /// Create a reader positioned at the current end of the file
    pub fn at_end(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = Self::new(path)?;
        reader.seek_to_end()?;
        Ok(reader)
    }

    /// Create a new log reader with custom configuration
    pub fn with_config(path: impl AsRef<Path>, config: LogReaderConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let encoding = match config.encoding {
            Some(enc) => enc,
            None => Self::detect_encoding(&path)?,
        };

        std::fs::metadata(&path)
            .with_context(|| format!("Failed to get metadata of {}", path.display()))?;

        Ok(Self {
            path,
            offset: 0,
            line_count: 0,
            config,
            encoding,
        })
    }

    /// Detect the encoding of a file, preferring UTF-8 whenever the sample is valid UTF-8
    fn detect_encoding(path: &Path) -> Result<&'static Encoding> {
        let mut file = File::open(path)
            .with_context(|| format!("Failed to open {} for encoding detection", path.display()))?;
        let mut buffer = [0u8; 8192];
        let bytes_read = file.read(&mut buffer)?;
        let sample = &buffer[..bytes_read];

        if let Some((encoding, _)) = Encoding::for_bom(sample) {
            return Ok(encoding);
        }

        match std::str::from_utf8(sample) {
            Ok(_) => return Ok(encoding_rs::UTF_8),
            // A multi-byte sequence cut off by the sample boundary
            Err(e) if e.error_len().is_none() => return Ok(encoding_rs::UTF_8),
            Err(_) => {}
        }

        let mut detector = EncodingDetector::new();
        detector.feed(sample, bytes_read < buffer.len());
        Ok(detector.guess(None, true))
    }

    /// Read complete lines appended since the last read.
    ///
    /// A file that shrank is assumed to have been truncated or rotated and
    /// is read again from the start.
    pub fn read_new_lines(&mut self) -> Result<Vec<String>> {
        self.read_lines(false)
    }

    /// Read the entire file from the beginning, including an unterminated last line
    pub fn read_all(&mut self) -> Result<Vec<String>> {
        self.offset = 0;
        self.line_count = 0;
        self.read_lines(true)
    }

    fn read_lines(&mut self, include_partial: bool) -> Result<Vec<String>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open log file {}", self.path.display()))?;
        let current_size = file.metadata()?.len();

        // Handle file truncation (log rotation)
        if current_size < self.offset {
            tracing::debug!("{} shrank, reading from the start", self.path.display());
            self.offset = 0;
            self.line_count = 0;
        }

        // No new content
        if current_size == self.offset {
            return Ok(Vec::new());
        }

        let mut reader = BufReader::with_capacity(self.config.buffer_size, file);
        reader.seek(SeekFrom::Start(self.offset))?;

        let mut lines = Vec::new();
        let mut line_buffer = Vec::new();

        loop {
            line_buffer.clear();
            let bytes_read = reader.read_until(b'\n', &mut line_buffer)?;

            if bytes_read == 0 {
                break;
            }
            if !include_partial && line_buffer.last() != Some(&b'\n') {
                break;
            }

            self.offset += bytes_read as u64;
            self.line_count += 1;
            lines.push(self.decode_line(&line_buffer));
        }

        Ok(lines)
    }

    /// Decode a line from bytes to string
    fn decode_line(&self, bytes: &[u8]) -> String {
        let (decoded, _, _) = self.encoding.decode(bytes);
        let mut line = decoded.into_owned();

        // Remove trailing newline characters
        if line.ends_with('\n') {
            line.pop();
        }
        if line.ends_with('\r') {
            line.pop();
        }

        line
    }

    /// Seek to the end of the file
    pub fn seek_to_end(&mut self) -> Result<()> {
        let metadata = std::fs::metadata(&self.path)
            .with_context(|| format!("Failed to get metadata of {}", self.path.display()))?;
        self.offset = metadata.len();
        Ok(())
    }

    /// Get the current byte offset
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Get the current line count
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directories, as recorded in events
    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }

    /// Check if the file grew or shrank since the last read
    pub fn has_new_content(&self) -> Result<bool> {
        let metadata = std::fs::metadata(&self.path)?;
        Ok(metadata.len() != self.offset)
    }

    /// Get the detected/configured encoding name
    pub fn encoding_name(&self) -> &'static str {
        self.encoding.name()
    }
}

/// Base name of a path, lossily converted
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// First non-blank line of a file, trimmed. Only used to sniff the format,
/// so bytes are decoded lossily as UTF-8.
pub fn first_non_blank_line(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer).ok()? == 0 {
            return None;
        }
        let line = String::from_utf8_lossy(&buffer);
        let line = line.trim();
        if !line.is_empty() {
            return Some(line.to_string());
        }
    }
}

/// Read and parse a whole file, numbering non-blank lines from 1
pub fn read_events(path: &Path, options: &ParseOptions) -> Result<ParsedBatch> {
    let mut reader = LogReader::new(path)?;
    let lines = reader.read_all()?;
    let batch = parse_lines(&lines, 1, &reader.file_name(), options);
    tracing::debug!(
        "Read {} events from {} ({} skipped, {})",
        batch.records.len(),
        path.display(),
        batch.skipped,
        reader.encoding_name()
    );
    Ok(batch)
}
