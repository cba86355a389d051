//! FUSE adapter: maps [`fuser::Filesystem`] callbacks to [`OverlayFs`].
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};

use super::overlay::OverlayFs;
use super::{AccessMode, AttrRecord, EntryKind};

/// Block size reported for every attribute.
const BLOCK_SIZE: u32 = 4096;

fn file_type_of(kind: EntryKind) -> fuser::FileType {
    match kind {
        EntryKind::RegularFile => fuser::FileType::RegularFile,
        EntryKind::Directory => fuser::FileType::Directory,
        EntryKind::Symlink => fuser::FileType::Symlink,
        EntryKind::BlockDevice => fuser::FileType::BlockDevice,
        EntryKind::CharDevice => fuser::FileType::CharDevice,
        EntryKind::NamedPipe => fuser::FileType::NamedPipe,
        EntryKind::Socket => fuser::FileType::Socket,
    }
}

fn to_fuse_attr(ino: u64, attr: &AttrRecord) -> fuser::FileAttr {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "permission bits fit in 12 bits"
    )]
    let perm = attr.permissions() as u16;
    fuser::FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: file_type_of(attr.kind()),
        perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

struct NodeEntry {
    rc: u64,
    view_path: PathBuf,
    parent: u64,
}

/// Serves an [`OverlayFs`] over a FUSE mount.
///
/// Owns the inode table: the kernel speaks inodes, the overlay speaks view
/// paths. Callbacks run on the mount's session thread, so blocking on the
/// runtime handle here never stalls an executor worker.
pub struct FuserAdapter {
    overlay: OverlayFs,
    nodes: HashMap<u64, NodeEntry>,
    by_path: HashMap<PathBuf, u64>,
    next_ino: u64,
    runtime: tokio::runtime::Handle,
}

impl FuserAdapter {
    // The kernel re-queries attributes once this lapses, and the attribute
    // query is where base edits and fresh shell assignments get picked up.
    const KERNEL_TTL: Duration = Duration::from_secs(1);

    pub fn new(overlay: OverlayFs, runtime: tokio::runtime::Handle) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            fuser::FUSE_ROOT_ID,
            NodeEntry {
                rc: 1,
                view_path: PathBuf::from("/"),
                parent: fuser::FUSE_ROOT_ID,
            },
        );
        let by_path = HashMap::from([(PathBuf::from("/"), fuser::FUSE_ROOT_ID)]);

        Self {
            overlay,
            nodes,
            by_path,
            next_ino: fuser::FUSE_ROOT_ID + 1,
            runtime,
        }
    }

    fn view_path(&self, ino: u64) -> Option<PathBuf> {
        self.nodes.get(&ino).map(|node| node.view_path.clone())
    }

    /// The inode for a view path, allocating one on first sight.
    ///
    /// Never hands out inode 0: some libc implementations drop directory
    /// entries with a zero `d_ino`.
    fn intern(&mut self, view_path: PathBuf, parent: u64) -> u64 {
        if let Some(&ino) = self.by_path.get(&view_path) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.by_path.insert(view_path.clone(), ino);
        self.nodes.insert(
            ino,
            NodeEntry {
                rc: 0,
                view_path,
                parent,
            },
        );
        ino
    }
}

impl fuser::Filesystem for FuserAdapter {
    #[instrument(name = "FuserAdapter::lookup", skip(self, _req, reply))]
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        let Some(parent_path) = self.view_path(parent) else {
            warn!(
                "Lookup called on unknown parent inode {}. This is a programming bug",
                parent
            );
            reply.error(libc::ENOENT);
            return;
        };

        let child_path = parent_path.join(name);
        match self
            .runtime
            .block_on(self.overlay.query_attributes(&child_path))
        {
            Ok(attr) => {
                let ino = self.intern(child_path, parent);
                debug_assert!(
                    self.nodes.contains_key(&ino),
                    "interned inode {ino} missing from the node table"
                );
                if let Some(node) = self.nodes.get_mut(&ino) {
                    node.rc += 1;
                }

                let f_attr = to_fuse_attr(ino, &attr);
                debug!(?f_attr, "replying...");
                reply.entry(&Self::KERNEL_TTL, &f_attr, 0);
            }
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.into());
            }
        }
    }

    #[instrument(name = "FuserAdapter::getattr", skip(self, _req, _fh, reply))]
    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        let Some(view_path) = self.view_path(ino) else {
            warn!(
                "Getattr called on unknown inode {}. This is a programming bug",
                ino
            );
            reply.error(libc::ENOENT);
            return;
        };

        match self
            .runtime
            .block_on(self.overlay.query_attributes(&view_path))
        {
            Ok(attr) => {
                let f_attr = to_fuse_attr(ino, &attr);
                debug!(?f_attr, "replying...");
                reply.attr(&Self::KERNEL_TTL, &f_attr);
            }
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.into());
            }
        }
    }

    #[instrument(name = "FuserAdapter::readdir", skip(self, _req, _fh, offset, reply))]
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let Some(node) = self.nodes.get(&ino) else {
            warn!(
                "Readdir called on unknown inode {}. This is a programming bug",
                ino
            );
            reply.error(libc::ENOENT);
            return;
        };
        let dir_path = node.view_path.clone();
        let parent_ino = node.parent;

        let entries = match self.runtime.block_on(self.overlay.list_directory(&dir_path)) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.into());
                return;
            }
        };

        #[expect(
            clippy::cast_possible_truncation,
            reason = "fuser offset is i64 but always non-negative"
        )]
        for (i, entry) in entries
            .iter()
            .enumerate()
            .skip(offset.cast_unsigned() as usize)
        {
            let child_ino = if entry.name == "." {
                ino
            } else if entry.name == ".." {
                parent_ino
            } else {
                self.intern(dir_path.join(&entry.name), ino)
            };
            let Ok(idx): Result<i64, _> = (i + 1).try_into() else {
                error!("Directory entry index {} too large for fuser", i + 1);
                reply.error(libc::EIO);
                return;
            };

            debug!(?entry, "adding entry to reply...");
            if reply.add(child_ino, idx, file_type_of(entry.kind), &entry.name) {
                debug!("buffer full for now, stopping readdir");
                break;
            }
        }

        debug!("finalizing reply...");
        reply.ok();
    }

    #[instrument(name = "FuserAdapter::open", skip(self, _req, _flags, reply))]
    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        let Some(view_path) = self.view_path(ino) else {
            warn!(
                "Open called on unknown inode {}. This is a programming bug",
                ino
            );
            reply.error(libc::ENOENT);
            return;
        };

        let fh = self.overlay.open_file(&view_path);
        debug!(fh, "replying...");
        reply.opened(fh, 0);
    }

    #[instrument(
        name = "FuserAdapter::read",
        skip(self, _req, _fh, offset, size, _flags, _lock_owner, reply)
    )]
    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        let Some(view_path) = self.view_path(ino) else {
            warn!(
                "Read called on unknown inode {}. This is a programming bug",
                ino
            );
            reply.error(libc::ENOENT);
            return;
        };

        match self.overlay.read_file(&view_path, offset.cast_unsigned(), size) {
            Ok(data) => {
                debug!(read_bytes = data.len(), "replying...");
                reply.data(&data);
            }
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.into());
            }
        }
    }

    #[instrument(name = "FuserAdapter::access", skip(self, _req, reply))]
    fn access(&mut self, _req: &fuser::Request<'_>, ino: u64, mask: i32, reply: fuser::ReplyEmpty) {
        let Some(view_path) = self.view_path(ino) else {
            warn!(
                "Access called on unknown inode {}. This is a programming bug",
                ino
            );
            reply.error(libc::ENOENT);
            return;
        };

        match self.overlay.check_access(&view_path, AccessMode::from(mask)) {
            Ok(()) => {
                debug!("replying ok");
                reply.ok();
            }
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.into());
            }
        }
    }

    #[instrument(
        name = "FuserAdapter::release",
        skip(self, _req, _ino, _flags, _lock_owner, _flush, reply)
    )]
    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        match self.overlay.release_file(fh) {
            Ok(()) => {
                debug!("replying ok");
                reply.ok();
            }
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.into());
            }
        }
    }

    #[instrument(name = "FuserAdapter::forget", skip(self, _req, nlookup))]
    fn forget(&mut self, _req: &fuser::Request<'_>, ino: u64, nlookup: u64) {
        debug_assert!(
            self.nodes.contains_key(&ino),
            "inode {ino} not in the node table"
        );

        match self.nodes.entry(ino) {
            Entry::Occupied(entry) => {
                if entry.get().rc <= nlookup {
                    let node = entry.remove();
                    self.by_path.remove(&node.view_path);
                } else {
                    entry.into_mut().rc -= nlookup;
                }
            }
            Entry::Vacant(_) => {
                warn!(
                    "Forget called on unknown inode {}. This is a programming bug",
                    ino
                );
            }
        }
    }
}
