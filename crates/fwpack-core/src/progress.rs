//! Lifecycle hooks for progress reporting during load and push.
//! Every hook defaults to a no-op; results never depend on the observer.

use std::path::Path;

use crate::object::Object;

pub trait Progress {
    /// Before any object is loaded; `total` is the number of objects across all sets.
    fn pre_package_load(&mut self, _total: usize) {}

    /// Once per object, whether its digest was computed or reused.
    fn package_load(&mut self, _object: &Object) {}

    fn post_package_load(&mut self) {}

    /// Before the parts of one artifact are sent.
    fn pre_object_upload(&mut self, _filename: &Path, _size: u64) {}

    /// After each part; `bytes` is the part length.
    fn object_upload_progress(&mut self, _bytes: u64) {}

    fn post_object_upload(&mut self) {}

    fn push_finished(&mut self, _uid: &str) {}
}

/// Observer used when the caller passes none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {}
