//! A session: install root, scratch directory and child environment
//!
//! Starlink applications write their parameter files into `$ADAM_USER`,
//! which a session points at a private scratch directory. The directory is
//! removed when the session is closed or dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::args::Invocation;
use crate::config::Config;
use crate::decode;
use crate::environ::{absolute, Environment};
use crate::error::StarError;
use crate::hds::ContainerSource;
use crate::hdstrace::HdsTrace;
use crate::invoke::{self, RunOutput};
use crate::record::Record;

/// Prefix of every scratch directory name
pub const SCRATCH_PREFIX: &str = "tmpADAM";

/// Result of [`Session::invoke_and_decode`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Output {
    /// Output parameters, or `None` if the command wrote none
    pub record: Option<Record>,
    /// Captured stdout, when the invocation asked for it
    pub stdout: Option<String>,
}

impl Output {
    /// True when there is nothing to return to the caller
    pub fn is_empty(&self) -> bool {
        self.record.is_none() && self.stdout.is_none()
    }
}

/// Owns the scratch directory and environment used for every invocation
pub struct Session {
    config: Config,
    install_root: Option<PathBuf>,
    scratch: Option<TempDir>,
    scratch_path: PathBuf,
    env: Environment,
    source: Box<dyn ContainerSource>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Session {
    /// Start a session, discovering the install root from `config`
    pub fn new(config: Config) -> Result<Self, StarError> {
        let install_root = config.discover_install_root();
        Self::with_install_root(config, install_root)
    }

    /// Start a session with an explicit (possibly absent) install root
    pub fn with_install_root(config: Config, install_root: Option<PathBuf>) -> Result<Self, StarError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let parent = match &config.scratch_parent {
            Some(parent) => parent.clone(),
            None => std::env::current_dir().map_err(StarError::Scratch)?,
        };
        let scratch = builder.tempdir_in(&parent).map_err(StarError::Scratch)?;

        let scratch_path = scratch.path().to_path_buf();
        let install_root = install_root.map(|root| absolute(&root));
        let env = Environment::build(install_root.as_deref(), &scratch_path, config.env_options());

        let source: Box<dyn ContainerSource> = match &config.trace_command {
            Some(program) => Box::new(HdsTrace::with_program(program.clone())),
            None => Box::new(HdsTrace::new()),
        };

        info!(
            scratch = %scratch_path.display(),
            install_root = ?install_root,
            "session started"
        );

        Ok(Self {
            config,
            install_root,
            scratch: Some(scratch),
            scratch_path,
            env,
            source,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Replace the container reader
    pub fn with_container_source(mut self, source: impl ContainerSource + 'static) -> Self {
        self.source = Box::new(source);
        self
    }

    /// Point the session at another installation and rebuild the environment
    pub fn change_install_root(&mut self, root: impl AsRef<Path>) {
        let root = absolute(root.as_ref());
        info!(root = %root.display(), "changing install root");
        self.env = Environment::build(Some(&root), &self.scratch_path, self.config.env_options());
        self.install_root = Some(root);
    }

    pub fn install_root(&self) -> Option<&Path> {
        self.install_root.as_deref()
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_path
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout()
    }

    /// Run a command without decoding anything
    pub fn run(&self, invocation: &Invocation) -> Result<RunOutput, StarError> {
        invoke::run(invocation, &self.env, self.timeout())
    }

    /// Decode the parameter container `command_name` left in the scratch dir
    pub fn decode(&self, command_name: &str) -> Result<Option<Record>, StarError> {
        Ok(decode::decode(
            command_name,
            &self.scratch_path,
            &self.env,
            self.source.as_ref(),
        )?)
    }

    /// Decode a container file anywhere on disk with this session's reader
    pub fn decode_file(&self, path: &Path) -> Result<Option<Record>, StarError> {
        Ok(decode::decode_file(path, &self.env, self.source.as_ref())?)
    }

    /// Run a command and decode its output parameters
    ///
    /// Calls sharing a command name are serialised, since they share one
    /// parameter file in the scratch directory.
    pub fn invoke_and_decode(&self, invocation: &Invocation) -> Result<Output, StarError> {
        let name = invocation.command_name();
        let lock = self.lock_for(name);

        let result = {
            let _guard = relock(&lock);
            self.run_and_decode(invocation)
        };

        self.release(name, lock);
        result
    }

    fn run_and_decode(&self, invocation: &Invocation) -> Result<Output, StarError> {
        let run = self.run(invocation)?;
        let record = self.decode(invocation.command_name())?;
        let stdout = invocation.wants_stdout().then_some(run.stdout);

        if record.is_none() {
            debug!(command = invocation.command_name(), "no output parameters");
        }
        Ok(Output { record, stdout })
    }

    /// Remove the scratch directory now rather than on drop
    pub fn close(mut self) -> Result<(), StarError> {
        match self.scratch.take() {
            Some(scratch) => scratch.close().map_err(StarError::Scratch),
            None => Ok(()),
        }
    }

    fn lock_for(&self, command_name: &str) -> Arc<Mutex<()>> {
        let mut locks = relock(&self.locks);
        locks.entry(command_name.to_string()).or_default().clone()
    }

    /// Drop the lock entry once no other caller holds it
    fn release(&self, command_name: &str, lock: Arc<Mutex<()>>) {
        let mut locks = relock(&self.locks);
        drop(lock);
        if locks
            .get(command_name)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(command_name);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(e) = scratch.close() {
                warn!(path = %path.display(), error = %e, "failed to remove scratch directory");
            }
        }
    }
}

/// A panic in another caller does not invalidate the guarded data
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
