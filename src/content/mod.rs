// src/content/mod.rs

//! Content-aware file comparison
//!
//! Classifies files by magic bytes and compares them with format-specific
//! rules that ignore non-semantic noise: ELF build ids and debug-info
//! offsets, byte-compile timestamps, archive member ordering, gzip header
//! fields, and generator timestamps hidden in markup comments.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// External disassembler used for ELF comparison
const DISASSEMBLER: &str = "objdump";

/// External dumper used for GObject typelib comparison
const TYPELIB_DUMPER: &str = "g-ir-generate";

/// Detected content format
///
/// The constructor is a magic-byte classifier; dispatch over the variants
/// is exhaustive so adding a format forces every comparison site to choose
/// a rule for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Elf,
    Typelib,
    Html,
    ByteCompiled,
    Zip,
    Gzip,
    Unknown,
}

impl ContentKind {
    /// Classify a file by its leading bytes
    ///
    /// Magic bytes:
    /// - ELF: `7f 45 4c 46`
    /// - Typelib: `GOBJ\nMETADATA\r\n\x1a`
    /// - Zip: `PK\x03\x04`
    /// - Gzip: `1f 8b`
    /// - Byte-compiled python: `\r\n` at offset 2, plus a .pyc/.pyo suffix
    /// - HTML is sniffed from the document head
    pub fn classify(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut head = [0u8; 1024];
        let mut read = 0;
        // A single read may return short for pipes; files normally fill
        // the buffer in one call, but loop to be exact.
        loop {
            let n = file.read(&mut head[read..])?;
            if n == 0 {
                break;
            }
            read += n;
            if read == head.len() {
                break;
            }
        }
        let head = &head[..read];

        if head.starts_with(&[0x7f, b'E', b'L', b'F']) {
            return Ok(Self::Elf);
        }
        if head.starts_with(b"GOBJ\nMETADATA\r\n\x1a") {
            return Ok(Self::Typelib);
        }
        if head.starts_with(b"PK\x03\x04") {
            return Ok(Self::Zip);
        }
        if head.starts_with(&[0x1f, 0x8b]) {
            return Ok(Self::Gzip);
        }
        if head.len() >= 4
            && head[2..4] == [0x0d, 0x0a]
            && path
                .extension()
                .is_some_and(|ext| ext == "pyc" || ext == "pyo")
        {
            return Ok(Self::ByteCompiled);
        }
        if looks_like_html(head) {
            return Ok(Self::Html);
        }

        Ok(Self::Unknown)
    }
}

fn looks_like_html(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head).to_lowercase();
    let trimmed = text.trim_start();
    trimmed.starts_with("<!doctype html") || trimmed.contains("<html")
}

/// Structural markup event, comments excluded
///
/// Declarations, processing instructions and doctypes only matter for
/// equality, so they are kept as their rendered form.
#[derive(Debug, PartialEq, Eq)]
enum MarkupEvent {
    Start(String, Vec<(String, String)>),
    Empty(String, Vec<(String, String)>),
    End(String),
    Text(String),
    Other(String),
}

/// Compares two files by detected format
///
/// Owned by the driver and handed to the package comparator; the handle
/// carries the external inspector names so failures can identify the tool.
pub struct ContentComparator {
    disassembler: &'static str,
    typelib_dumper: &'static str,
}

impl Default for ContentComparator {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentComparator {
    pub fn new() -> Self {
        Self {
            disassembler: DISASSEMBLER,
            typelib_dumper: TYPELIB_DUMPER,
        }
    }

    /// Check that the external inspectors are available
    ///
    /// The disassembler is required; the typelib dumper is only needed
    /// when a typelib shows up, so its absence is a warning here.
    pub fn preflight(&self) -> Result<()> {
        if which::which(self.disassembler).is_err() {
            return Err(Error::MissingTool(self.disassembler));
        }
        if which::which(self.typelib_dumper).is_err() {
            warn!(
                "{} not found; typelib files cannot be compared",
                self.typelib_dumper
            );
        }
        Ok(())
    }

    /// Decide whether two files are semantically equal
    ///
    /// Files of differing detected formats, and files of unknown format,
    /// are reported different with a warning.
    pub fn equal(&self, a: &Path, b: &Path) -> Result<bool> {
        let kind_a = ContentKind::classify(a)?;
        let kind_b = ContentKind::classify(b)?;

        if kind_a != kind_b {
            warn!(
                "{} is {:?} but {} is {:?}; treating as different",
                a.display(),
                kind_a,
                b.display(),
                kind_b
            );
            return Ok(false);
        }

        debug!("comparing {} as {:?}", a.display(), kind_a);
        match kind_a {
            ContentKind::Elf => self.elf_equal(a, b),
            ContentKind::Typelib => self.typelib_equal(a, b),
            ContentKind::Html => html_equal(a, b),
            ContentKind::ByteCompiled => byte_compiled_equal(a, b),
            ContentKind::Zip => zip_equal(a, b),
            ContentKind::Gzip => gzip_equal(a, b),
            ContentKind::Unknown => {
                warn!(
                    "unknown file format for {}; treating as different",
                    a.display()
                );
                Ok(false)
            }
        }
    }

    /// ELF files are equal when their disassembly matches
    ///
    /// Build ids and debug-info offsets move without semantic change, so
    /// raw bytes are useless here; the disassembly is stable.
    fn elf_equal(&self, a: &Path, b: &Path) -> Result<bool> {
        let text_a = self.inspect(self.disassembler, &["-d"], a)?;
        let text_b = self.inspect(self.disassembler, &["-d"], b)?;
        Ok(text_a == text_b)
    }

    fn typelib_equal(&self, a: &Path, b: &Path) -> Result<bool> {
        let text_a = self.inspect(self.typelib_dumper, &[], a)?;
        let text_b = self.inspect(self.typelib_dumper, &[], b)?;
        Ok(text_a == text_b)
    }

    /// Run an external inspector and return its output with the input
    /// filename stripped, so the same content at two paths compares equal
    fn inspect(&self, tool: &'static str, args: &[&str], path: &Path) -> Result<String> {
        let output = Command::new(tool)
            .args(args)
            .arg(path)
            .output()
            .map_err(|e| Error::Inspector {
                tool,
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::Inspector {
                tool,
                path: path.to_path_buf(),
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(text.replacen(&path.display().to_string(), "", 1))
    }
}

/// Byte-compiled files carry the interpreter magic and an embedded
/// timestamp in the first 8 bytes; only the remainder is meaningful
fn byte_compiled_equal(a: &Path, b: &Path) -> Result<bool> {
    let bytes_a = fs::read(a)?;
    let bytes_b = fs::read(b)?;
    Ok(bytes_a.get(8..) == bytes_b.get(8..))
}

/// Gzip members are equal when the decompressed contents match; the
/// header (original name, mtime) is skipped by the decoder
fn gzip_equal(a: &Path, b: &Path) -> Result<bool> {
    Ok(gunzip(a)? == gunzip(b)?)
}

fn gunzip(path: &Path) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(File::open(path)?);
    let mut data = Vec::new();
    decoder
        .read_to_end(&mut data)
        .map_err(|e| Error::Archive {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    Ok(data)
}

/// Zip archives are equal when they hold the same member names with the
/// same bytes; ordering and archive-level timestamps are ignored
fn zip_equal(a: &Path, b: &Path) -> Result<bool> {
    let mut zip_a = open_zip(a)?;
    let mut zip_b = open_zip(b)?;

    let names_a: BTreeSet<String> = zip_a.file_names().map(String::from).collect();
    let names_b: BTreeSet<String> = zip_b.file_names().map(String::from).collect();
    if names_a != names_b {
        debug!(
            "archive member sets differ between {} and {}",
            a.display(),
            b.display()
        );
        return Ok(false);
    }

    for name in &names_a {
        if read_zip_member(&mut zip_a, a, name)? != read_zip_member(&mut zip_b, b, name)? {
            debug!("archive member {} differs", name);
            return Ok(false);
        }
    }
    Ok(true)
}

fn open_zip(path: &Path) -> Result<zip::ZipArchive<File>> {
    zip::ZipArchive::new(File::open(path)?).map_err(|e| Error::Archive {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

fn read_zip_member(
    archive: &mut zip::ZipArchive<File>,
    path: &Path,
    name: &str,
) -> Result<Vec<u8>> {
    let mut member = archive.by_name(name).map_err(|e| Error::Archive {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let mut data = Vec::new();
    member.read_to_end(&mut data)?;
    Ok(data)
}

/// Markup documents are equal when their structural event sequences match.
/// Comments are excluded: generators embed timestamps there and nowhere
/// else.
fn html_equal(a: &Path, b: &Path) -> Result<bool> {
    Ok(markup_events(a)? == markup_events(b)?)
}

fn markup_events(path: &Path) -> Result<Vec<MarkupEvent>> {
    let raw = fs::read(path)?;
    let text = String::from_utf8_lossy(&raw);

    let mut reader = Reader::from_str(&text);
    // HTML leaves <br>, <meta> and friends unclosed
    reader.check_end_names(false);

    let mut events = Vec::new();
    loop {
        match reader.read_event() {
            Err(e) => {
                // The parse stops here for both sides of a comparison, so
                // recording the error keeps equality deterministic.
                debug!("markup parse error in {}: {}", path.display(), e);
                events.push(MarkupEvent::Other(format!("parse error: {}", e)));
                break;
            }
            Ok(Event::Eof) => break,
            Ok(Event::Comment(_)) => {}
            Ok(Event::Start(e)) => {
                events.push(MarkupEvent::Start(name_of(e.name().as_ref()), attrs_of(&e)));
            }
            Ok(Event::Empty(e)) => {
                events.push(MarkupEvent::Empty(name_of(e.name().as_ref()), attrs_of(&e)));
            }
            Ok(Event::End(e)) => {
                events.push(MarkupEvent::End(name_of(e.name().as_ref())));
            }
            Ok(Event::Text(t)) => {
                let data = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                events.push(MarkupEvent::Text(data));
            }
            Ok(Event::CData(c)) => {
                events.push(MarkupEvent::Text(String::from_utf8_lossy(&c).into_owned()));
            }
            Ok(other) => {
                events.push(MarkupEvent::Other(format!("{:?}", other)));
            }
        }
    }
    Ok(events)
}

fn name_of(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn attrs_of(start: &quick_xml::events::BytesStart<'_>) -> Vec<(String, String)> {
    start
        .attributes()
        .with_checks(false)
        .filter_map(|attr| attr.ok())
        .map(|attr| {
            (
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                String::from_utf8_lossy(&attr.value).into_owned(),
            )
        })
        .collect()
}
