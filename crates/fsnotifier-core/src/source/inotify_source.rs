//! Linux backend: the kernel's inotify API. One descriptor services the
//! whole tree; directory watches report child-relative events directly,
//! so the engine never needs to rescan a directory to discover what
//! changed inside it.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};

use super::{EventSource, Handle, NormalizedEvent};
use crate::walker::LeafPolicy;

/// Default ceiling assumed when `/proc/sys/fs/inotify/max_user_watches`
/// cannot be read (spec §6: "a built-in ceiling of 1,000,000 is
/// assumed").
const DEFAULT_MAX_WATCHES: usize = 1_000_000;

fn watch_mask() -> WatchMask {
    WatchMask::ATTRIB
        | WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::DELETE_SELF
        | WatchMask::MODIFY
        | WatchMask::MOVE_SELF
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
}

pub struct InotifySource {
    inotify: Inotify,
    buffer: [u8; 4096],
    max_watches: usize,
    limit_reached: bool,
    next_id: i32,
    by_handle: HashMap<Handle, WatchDescriptor>,
    by_descriptor: HashMap<WatchDescriptor, Handle>,
}

impl InotifySource {
    fn read_max_watches() -> usize {
        fs::read_to_string("/proc/sys/fs/inotify/max_user_watches")
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_WATCHES)
    }

    fn alloc_handle(&mut self, wd: WatchDescriptor) -> Handle {
        let handle = Handle(self.next_id);
        self.next_id += 1;
        self.by_handle.insert(handle, wd.clone());
        self.by_descriptor.insert(wd, handle);
        handle
    }
}

impl EventSource for InotifySource {
    fn init() -> io::Result<Self> {
        let inotify = Inotify::init()?;
        Ok(InotifySource {
            inotify,
            buffer: [0; 4096],
            max_watches: Self::read_max_watches(),
            limit_reached: false,
            next_id: 0,
            by_handle: HashMap::new(),
            by_descriptor: HashMap::new(),
        })
    }

    fn register(&mut self, path: &Path, _is_dir: bool) -> io::Result<Handle> {
        match self.inotify.watches().add(path, watch_mask()) {
            Ok(wd) => Ok(self.alloc_handle(wd)),
            Err(err) => {
                // ENOSPC here means the per-user watch quota, not disk
                // space; notify-rs carries the same translation (see
                // "do not report inotify limits as 'no more space' on
                // linux").
                if err.raw_os_error() == Some(libc::ENOSPC) {
                    self.limit_reached = true;
                }
                Err(err)
            }
        }
    }

    fn unregister(&mut self, handle: Handle) {
        if let Some(wd) = self.by_handle.remove(&handle) {
            self.by_descriptor.remove(&wd);
            if let Err(err) = self.inotify.watches().remove(wd) {
                tracing::warn!(?err, "failed to remove inotify watch");
            }
        }
    }

    fn poll(&mut self) -> io::Result<Vec<NormalizedEvent>> {
        let events = self.inotify.read_events_blocking(&mut self.buffer)?;
        let mut out = Vec::new();
        for event in events {
            if event.mask.contains(EventMask::Q_OVERFLOW) {
                out.push(NormalizedEvent::Overflow);
                continue;
            }
            let handle = match self.by_descriptor.get(&event.wd) {
                Some(h) => *h,
                None => continue,
            };
            if event.mask.contains(EventMask::CREATE) || event.mask.contains(EventMask::MOVED_TO) {
                if let Some(name) = event.name {
                    out.push(NormalizedEvent::ChildCreated {
                        parent: handle,
                        child_basename: OsString::from(name),
                        child_is_dir: event.mask.contains(EventMask::ISDIR),
                    });
                }
                continue;
            }
            if event.mask.contains(EventMask::DELETE) || event.mask.contains(EventMask::MOVED_FROM) {
                if let Some(name) = event.name {
                    out.push(NormalizedEvent::ChildRemoved {
                        parent: handle,
                        child_basename: OsString::from(name),
                    });
                }
                continue;
            }
            if event.mask.contains(EventMask::DELETE_SELF) || event.mask.contains(EventMask::MOVE_SELF) {
                out.push(NormalizedEvent::SelfGone { handle });
                continue;
            }
            if event.mask.contains(EventMask::MODIFY) {
                out.push(NormalizedEvent::SelfChanged { handle });
                continue;
            }
            if event.mask.contains(EventMask::ATTRIB) {
                out.push(NormalizedEvent::AttrChanged { handle });
            }
        }
        Ok(out)
    }

    fn max_watches(&self) -> Option<usize> {
        Some(self.max_watches)
    }

    fn limit_reached(&self) -> bool {
        self.limit_reached
    }

    fn as_raw_fd(&self) -> RawFd {
        self.inotify.as_raw_fd()
    }
}

impl LeafPolicy for InotifySource {
    // A directory's own watch already reports CREATE/DELETE/MOVED_TO/
    // MOVED_FROM for its children, so leaf (non-directory) entries never
    // get their own registration on this model (spec §4.3 step 5).
    const REGISTER_LEAVES: bool = false;
}
