//! Terminal progress for load and push, drawn with indicatif.
//! Hidden when stderr is not a terminal or `--quiet` is given.

use std::io::IsTerminal;
use std::path::Path;

use fwpack_core::{Object, Progress};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

pub struct TerminalProgress {
    visible: bool,
    load: Option<ProgressBar>,
    upload: Option<ProgressBar>,
    pub uploaded_objects: usize,
}

impl TerminalProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            visible: !quiet && std::io::stderr().is_terminal(),
            load: None,
            upload: None,
            uploaded_objects: 0,
        }
    }

    fn bar(&self, len: u64, template: &str) -> ProgressBar {
        let bar = if self.visible {
            ProgressBar::new(len)
        } else {
            ProgressBar::with_draw_target(Some(len), ProgressDrawTarget::hidden())
        };
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar
    }
}

impl Progress for TerminalProgress {
    fn pre_package_load(&mut self, total: usize) {
        let bar = self.bar(total as u64, "{msg:<12} [{bar:30}] {pos}/{len}");
        bar.set_message("Hashing");
        self.load = Some(bar);
    }

    fn package_load(&mut self, object: &Object) {
        if let Some(bar) = &self.load {
            bar.inc(1);
            tracing::trace!("loaded {}", object.filename().display());
        }
    }

    fn post_package_load(&mut self) {
        if let Some(bar) = self.load.take() {
            bar.finish_and_clear();
        }
    }

    fn pre_object_upload(&mut self, filename: &Path, size: u64) {
        let bar = self.bar(size, "{msg:<24} [{bar:30}] {bytes}/{total_bytes}");
        let name = filename
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.display().to_string());
        bar.set_message(name);
        self.upload = Some(bar);
    }

    fn object_upload_progress(&mut self, bytes: u64) {
        if let Some(bar) = &self.upload {
            bar.inc(bytes);
        }
    }

    fn post_object_upload(&mut self) {
        if let Some(bar) = self.upload.take() {
            bar.finish_and_clear();
        }
        self.uploaded_objects += 1;
    }
}
