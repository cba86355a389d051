//! The synthetic view of the base directory.

/// Attribute/content cache keyed by view path.
pub mod cache;
/// FUSE adapter: maps [`fuser::Filesystem`] callbacks to [`overlay::OverlayFs`].
pub mod fuser;
/// The path-based filesystem surface served through the view.
pub mod overlay;
/// View-relative to base-directory path mapping.
pub mod resolve;

pub use overlay::OverlayFs;

use std::ffi::OsString;
use std::os::unix::fs::MetadataExt as _;
use std::time::{Duration, SystemTime};

use bitflags::bitflags;

/// Type representing a file handle.
pub type FileHandle = u64;

bitflags! {
    /// Mode bits for an access check, as in access(2).
    ///
    /// The empty set corresponds to `F_OK`, a bare existence check.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMode: i32 {
        /// Read permission.
        const READ = libc::R_OK;
        /// Write permission.
        const WRITE = libc::W_OK;
        /// Execute (for files) or search (for directories) permission.
        const EXECUTE = libc::X_OK;
    }
}

impl From<i32> for AccessMode {
    fn from(mask: i32) -> Self {
        Self::from_bits_truncate(mask)
    }
}

/// The kind of an entry, as reported to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A regular file.
    RegularFile,
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink,
    /// A block device node.
    BlockDevice,
    /// A character device node.
    CharDevice,
    /// A named pipe.
    NamedPipe,
    /// A unix domain socket.
    Socket,
}

impl TryFrom<std::fs::FileType> for EntryKind {
    type Error = ();

    fn try_from(ft: std::fs::FileType) -> Result<Self, ()> {
        use std::os::unix::fs::FileTypeExt as _;
        if ft.is_file() {
            Ok(Self::RegularFile)
        } else if ft.is_dir() {
            Ok(Self::Directory)
        } else if ft.is_symlink() {
            Ok(Self::Symlink)
        } else if ft.is_block_device() {
            Ok(Self::BlockDevice)
        } else if ft.is_char_device() {
            Ok(Self::CharDevice)
        } else if ft.is_fifo() {
            Ok(Self::NamedPipe)
        } else if ft.is_socket() {
            Ok(Self::Socket)
        } else {
            Err(())
        }
    }
}

// libc::mode_t is u16 on some platforms.
#[allow(clippy::allow_attributes)]
#[allow(clippy::unnecessary_cast)]
mod mode_bits {
    pub const S_IFMT: u32 = libc::S_IFMT as u32;
    pub const S_IFDIR: u32 = libc::S_IFDIR as u32;
    pub const S_IFLNK: u32 = libc::S_IFLNK as u32;
    pub const S_IFBLK: u32 = libc::S_IFBLK as u32;
    pub const S_IFCHR: u32 = libc::S_IFCHR as u32;
    pub const S_IFIFO: u32 = libc::S_IFIFO as u32;
    pub const S_IFSOCK: u32 = libc::S_IFSOCK as u32;
}

/// Attributes of an entry, as last materialized from the base directory.
///
/// For a regular file whose content has been transformed, `size` is the byte
/// length of the transformed content, never the raw file's size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrRecord {
    /// Last access time.
    pub atime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
    /// Group id of the owner.
    pub gid: u32,
    /// File type and permission bits, as in stat(2) `st_mode`.
    pub mode: u32,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Number of hard links.
    pub nlink: u32,
    /// Size in bytes.
    pub size: u64,
    /// User id of the owner.
    pub uid: u32,
}

impl AttrRecord {
    /// The entry kind encoded in the mode bits.
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        match self.mode & mode_bits::S_IFMT {
            mode_bits::S_IFDIR => EntryKind::Directory,
            mode_bits::S_IFLNK => EntryKind::Symlink,
            mode_bits::S_IFBLK => EntryKind::BlockDevice,
            mode_bits::S_IFCHR => EntryKind::CharDevice,
            mode_bits::S_IFIFO => EntryKind::NamedPipe,
            mode_bits::S_IFSOCK => EntryKind::Socket,
            _ => EntryKind::RegularFile,
        }
    }

    /// Permission bits without the file type.
    #[must_use]
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

impl From<&std::fs::Metadata> for AttrRecord {
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "nsec fields are in [0, 1e9) and link counts fit in u32"
    )]
    fn from(meta: &std::fs::Metadata) -> Self {
        fn to_systime(secs: i64, nsecs: i64) -> SystemTime {
            if secs >= 0 {
                std::time::UNIX_EPOCH + Duration::new(secs.cast_unsigned(), nsecs as u32)
            } else {
                // Pre-epoch stamps carry whole seconds in secs; nsecs stays
                // non-negative and is added back on top.
                std::time::UNIX_EPOCH - Duration::from_secs((-secs).cast_unsigned())
                    + Duration::from_nanos(nsecs.cast_unsigned())
            }
        }

        Self {
            atime: to_systime(meta.atime(), meta.atime_nsec()),
            ctime: to_systime(meta.ctime(), meta.ctime_nsec()),
            gid: meta.gid(),
            mode: meta.mode(),
            mtime: to_systime(meta.mtime(), meta.mtime_nsec()),
            nlink: meta.nlink() as u32,
            size: meta.len(),
            uid: meta.uid(),
        }
    }
}

/// A directory entry yielded by [`overlay::OverlayFs::list_directory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDirEntry {
    /// The name of this entry within its parent directory.
    pub name: OsString,
    /// The kind reported for this entry.
    pub kind: EntryKind,
}
