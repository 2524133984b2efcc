//! Virtual paths
//!
//! A [`VirtualPath`] is an immutable list of name segments plus a root marker.
//! It is purely lexical: nothing here touches a backend. Equality and ordering
//! compare the root marker first, then the segments one by one.

use std::fmt;

use crate::error::{FsError, FsResult};
use crate::{MAX_FILENAME_LEN, MAX_PATH_LEN};

/// Path separator used by every namespace
pub const SEPARATOR: char = '/';

/// Hierarchical path inside a namespace
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualPath {
    absolute: bool,
    segments: Vec<String>,
}

impl VirtualPath {
    /// The namespace root (`/`)
    pub fn root() -> Self {
        Self {
            absolute: true,
            segments: Vec::new(),
        }
    }

    /// Parse a textual path.
    ///
    /// Empty segments and `.` are dropped, `..` removes the previous segment
    /// (and is ignored at the root of an absolute path).
    pub fn parse(text: &str) -> FsResult<Self> {
        if text.contains('\0') {
            return Err(FsError::invalid_path("path contains null byte"));
        }
        if text.len() > MAX_PATH_LEN {
            return Err(FsError::invalid_path(format!(
                "path too long: {} bytes (max {})",
                text.len(),
                MAX_PATH_LEN
            )));
        }

        let absolute = text.starts_with(SEPARATOR);
        let mut segments: Vec<String> = Vec::new();
        for part in text.split(SEPARATOR) {
            match part {
                "" | "." => {}
                ".." => {
                    if segments.last().map_or(false, |s| s != "..") {
                        segments.pop();
                    } else if !absolute {
                        segments.push("..".into());
                    }
                }
                name => {
                    if name.len() > MAX_FILENAME_LEN {
                        return Err(FsError::invalid_path(format!(
                            "filename too long: {} bytes (max {})",
                            name.len(),
                            MAX_FILENAME_LEN
                        )));
                    }
                    segments.push(name.to_string());
                }
            }
        }

        Ok(Self { absolute, segments })
    }

    /// Build an absolute path from already-validated segments
    pub fn from_segments<I, S>(segments: I) -> FsResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = Self::root();
        for segment in segments {
            path = path.join(&segment.into())?;
        }
        Ok(path)
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// `true` for `/`
    pub fn is_root(&self) -> bool {
        self.absolute && self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of name segments (0 for `/`)
    pub fn name_count(&self) -> usize {
        self.segments.len()
    }

    /// Last segment, `None` for the root or an empty relative path
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Path without its last segment.
    ///
    /// The root and single-segment relative paths have no parent.
    pub fn parent(&self) -> Option<VirtualPath> {
        if self.segments.is_empty() {
            return None;
        }
        if !self.absolute && self.segments.len() == 1 {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self {
            absolute: self.absolute,
            segments,
        })
    }

    /// Append one name
    pub fn join(&self, name: &str) -> FsResult<VirtualPath> {
        validate_filename(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self {
            absolute: self.absolute,
            segments,
        })
    }

    /// Resolve against the root. Leading `..` segments of a relative path
    /// cannot climb above `/` and are dropped.
    pub fn to_absolute(&self) -> VirtualPath {
        if self.absolute {
            return self.clone();
        }
        Self {
            absolute: true,
            segments: self
                .segments
                .iter()
                .filter(|s| s.as_str() != "..")
                .cloned()
                .collect(),
        }
    }

    /// `true` if `self` equals `ancestor` or lies below it
    pub fn starts_with(&self, ancestor: &VirtualPath) -> bool {
        self.absolute == ancestor.absolute
            && self.segments.len() >= ancestor.segments.len()
            && self.segments[..ancestor.segments.len()] == ancestor.segments[..]
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "{}", SEPARATOR)?;
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEPARATOR)?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for VirtualPath {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Validate a filename (single path component)
pub fn validate_filename(name: &str) -> FsResult<()> {
    if name.is_empty() {
        return Err(FsError::invalid_path("empty filename"));
    }

    if name.contains('\0') {
        return Err(FsError::invalid_path("filename contains null byte"));
    }

    if name.len() > MAX_FILENAME_LEN {
        return Err(FsError::invalid_path(format!(
            "filename too long: {} bytes (max {})",
            name.len(),
            MAX_FILENAME_LEN
        )));
    }

    if name == "." || name == ".." {
        return Err(FsError::invalid_path("special directory names not allowed"));
    }

    if name.contains(SEPARATOR) {
        return Err(FsError::invalid_path("filename contains path separator"));
    }

    Ok(())
}
