//! Shader directory watcher
//!
//! Watches the shader override directory with `notify` and queues the
//! programs whose `<name>.wgsl` file was created or modified. The queue is
//! drained on the render thread by
//! [`WgpuDevice::poll_shader_reloads`](crate::WgpuDevice::poll_shader_reloads).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tessera_core::ShaderProgram;
use tracing::{debug, warn};

use crate::error::Result;

/// Program a shader source file belongs to
pub fn program_for_path(path: &Path) -> Option<ShaderProgram> {
    if path.extension()? != "wgsl" {
        return None;
    }
    ShaderProgram::from_name(path.file_stem()?.to_str()?)
}

/// Path of a program's source file inside `dir`
pub fn source_path(dir: &Path, program: ShaderProgram) -> PathBuf {
    dir.join(format!("{}.wgsl", program.name()))
}

pub struct ShaderWatcher {
    dir: PathBuf,
    changes: Receiver<ShaderProgram>,
    _watcher: RecommendedWatcher,
}

impl ShaderWatcher {
    pub fn new(dir: &Path) -> Result<Self> {
        let (sender, changes) = channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!("shader watch error: {}", e);
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            for program in event.paths.iter().filter_map(|p| program_for_path(p)) {
                // Receiver gone means the device was dropped
                let _ = sender.send(program);
            }
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        debug!("watching shader directory {}", dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            changes,
            _watcher: watcher,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Programs changed since the last call, each reported once
    pub fn drain(&self) -> BTreeSet<ShaderProgram> {
        self.changes.try_iter().collect()
    }
}

impl std::fmt::Debug for ShaderWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderWatcher").field("dir", &self.dir).finish()
    }
}
