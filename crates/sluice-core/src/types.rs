//! Core type definitions for Sluice
//!
//! Attribute model shared by every namespace: entry types, POSIX permission
//! bits, principals and the attribute snapshot handed to the protocol layer.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{FsError, FsResult};

/// Timestamp reported when a backend does not know a time
pub const NO_TIME: SystemTime = UNIX_EPOCH;

/// Type of filesystem entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    File,
    Directory,
}

/// POSIX permission bit set (the low nine bits of a mode)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Permissions(u16);

impl Permissions {
    pub const OWNER_READ: Permissions = Permissions(0o400);
    pub const OWNER_WRITE: Permissions = Permissions(0o200);
    pub const OWNER_EXECUTE: Permissions = Permissions(0o100);
    pub const GROUP_READ: Permissions = Permissions(0o040);
    pub const GROUP_WRITE: Permissions = Permissions(0o020);
    pub const GROUP_EXECUTE: Permissions = Permissions(0o010);
    pub const OTHERS_READ: Permissions = Permissions(0o004);
    pub const OTHERS_WRITE: Permissions = Permissions(0o002);
    pub const OTHERS_EXECUTE: Permissions = Permissions(0o001);

    /// Default permissions for directories (rwxr-xr-x)
    pub const DIR_DEFAULT: Permissions = Permissions(0o755);
    /// Default permissions for files (rw-r--r--)
    pub const FILE_DEFAULT: Permissions = Permissions(0o644);

    pub const fn empty() -> Self {
        Permissions(0)
    }

    pub const fn all() -> Self {
        Permissions(0o777)
    }

    /// Build from a numeric mode; bits above 0o777 are ignored
    pub const fn from_mode(mode: u32) -> Self {
        Permissions((mode & 0o777) as u16)
    }

    pub const fn mode(self) -> u32 {
        self.0 as u32
    }

    pub const fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Permissions) -> Self {
        Permissions(self.0 | other.0)
    }

    pub const fn difference(self, other: Permissions) -> Self {
        Permissions(self.0 & !other.0)
    }

    /// Parse the nine-character `rwxr-x---` form
    pub fn parse(text: &str) -> FsResult<Self> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() != 9 {
            return Err(FsError::unsupported(format!("invalid permission string: {}", text)));
        }
        let mut bits = 0u16;
        for (i, c) in chars.iter().enumerate() {
            let expected = ['r', 'w', 'x'][i % 3];
            match *c {
                '-' => {}
                c if c == expected => bits |= 1 << (8 - i),
                _ => {
                    return Err(FsError::unsupported(format!(
                        "invalid permission string: {}",
                        text
                    )))
                }
            }
        }
        Ok(Permissions(bits))
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: String = (0..9)
            .map(|i| {
                let set = self.0 & (1 << (8 - i)) != 0;
                if set {
                    ['r', 'w', 'x'][i % 3]
                } else {
                    '-'
                }
            })
            .collect();
        f.pad(&text)
    }
}

/// Owner or group of an entry
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Principal(String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The `root` principal used when a backend has no notion of ownership
    pub fn root() -> Self {
        Self::new("root")
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Attribute snapshot for one entry (similar to struct stat)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileAttributes {
    pub file_type: FileType,
    pub size: u64,
    pub permissions: Permissions,
    pub owner: Principal,
    pub group: Principal,
    pub modified: SystemTime,
    pub accessed: SystemTime,
    pub created: SystemTime,
}

impl FileAttributes {
    /// Attributes for a directory with unknown times
    pub fn directory(owner: Principal, group: Principal) -> Self {
        Self {
            file_type: FileType::Directory,
            size: 0,
            permissions: Permissions::DIR_DEFAULT,
            owner,
            group,
            modified: NO_TIME,
            accessed: NO_TIME,
            created: NO_TIME,
        }
    }

    /// Attributes for a file with unknown times
    pub fn file(size: u64, owner: Principal, group: Principal) -> Self {
        Self {
            file_type: FileType::File,
            size,
            permissions: Permissions::FILE_DEFAULT,
            owner,
            group,
            modified: NO_TIME,
            accessed: NO_TIME,
            created: NO_TIME,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_regular_file(&self) -> bool {
        self.file_type == FileType::File
    }

    /// Symbolic links are not modelled
    pub fn is_symbolic_link(&self) -> bool {
        false
    }

    pub fn is_other(&self) -> bool {
        false
    }

    /// Look up one attribute by its view name
    pub fn get(&self, name: &str) -> Option<AttributeValue> {
        let value = match name {
            "lastModifiedTime" => AttributeValue::Time(self.modified),
            "lastAccessTime" => AttributeValue::Time(self.accessed),
            "creationTime" => AttributeValue::Time(self.created),
            "size" => AttributeValue::Size(self.size),
            "isRegularFile" => AttributeValue::Flag(self.is_regular_file()),
            "isDirectory" => AttributeValue::Flag(self.is_directory()),
            "isSymbolicLink" => AttributeValue::Flag(self.is_symbolic_link()),
            "isOther" => AttributeValue::Flag(self.is_other()),
            "fileKey" => AttributeValue::None,
            "owner" => AttributeValue::Principal(self.owner.clone()),
            "group" => AttributeValue::Principal(self.group.clone()),
            "permissions" => AttributeValue::Permissions(self.permissions),
            _ => return None,
        };
        Some(value)
    }
}

/// Attribute names expanded from `*`, in reporting order
pub const ALL_ATTRIBUTES: &[&str] = &[
    "lastModifiedTime",
    "lastAccessTime",
    "creationTime",
    "size",
    "isRegularFile",
    "isDirectory",
    "isSymbolicLink",
    "isOther",
    "fileKey",
    "owner",
    "permissions",
    "group",
];

/// Attribute views understood by the namespaces
pub const SUPPORTED_VIEWS: &[&str] = &["basic", "owner", "posix"];

/// A single attribute value read or written by name
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeValue {
    Time(SystemTime),
    Size(u64),
    Flag(bool),
    Principal(Principal),
    Permissions(Permissions),
    None,
}

/// Access modes for access checks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    Execute,
}

/// Seconds since the epoch, clamping pre-epoch times to zero
pub fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_display_and_parse() {
        assert_eq!(Permissions::DIR_DEFAULT.to_string(), "rwxr-xr-x");
        assert_eq!(Permissions::FILE_DEFAULT.to_string(), "rw-r--r--");
        assert_eq!(Permissions::parse("rwxr-x---").unwrap().mode(), 0o750);
        assert!(Permissions::parse("rwx").is_err());
        assert!(Permissions::parse("xwrr-x---").is_err());
    }

    #[test]
    fn test_display_honors_width() {
        assert_eq!(format!("{:>8}|", Principal::root()), "    root|");
        assert_eq!(format!("{:<6}|", Principal::new("bob")), "bob   |");
        assert_eq!(format!("{:>10}", Permissions::FILE_DEFAULT), " rw-r--r--");
    }

    #[test]
    fn test_permissions_set_ops() {
        let p = Permissions::OWNER_READ.union(Permissions::OWNER_WRITE);
        assert!(p.contains(Permissions::OWNER_READ));
        assert!(!p.contains(Permissions::OWNER_EXECUTE));
        assert_eq!(p.difference(Permissions::OWNER_WRITE), Permissions::OWNER_READ);
        assert_eq!(Permissions::from_mode(0o100755).mode(), 0o755);
        assert!(Permissions::all().contains(Permissions::OTHERS_EXECUTE));
    }

    #[test]
    fn test_attribute_lookup() {
        let attrs = FileAttributes::file(10, Principal::root(), Principal::new("staff"));
        assert_eq!(attrs.get("size"), Some(AttributeValue::Size(10)));
        assert_eq!(attrs.get("isDirectory"), Some(AttributeValue::Flag(false)));
        assert_eq!(
            attrs.get("group"),
            Some(AttributeValue::Principal(Principal::new("staff")))
        );
        assert_eq!(attrs.get("lastModifiedTime"), Some(AttributeValue::Time(NO_TIME)));
        assert_eq!(attrs.get("acl"), None);
        for name in ALL_ATTRIBUTES {
            assert!(attrs.get(name).is_some(), "{} should resolve", name);
        }
    }

    #[test]
    fn test_epoch_secs() {
        assert_eq!(epoch_secs(NO_TIME), 0);
        assert_eq!(epoch_secs(UNIX_EPOCH + Duration::from_secs(42)), 42);
    }
}
