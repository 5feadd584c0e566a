use crate::error::EmulatorError;
use emulator_types::ffi::{invoke_raw, EntryPoint, FreeOutcome, FREE_SUFFIX};
use emulator_types::{handler_fn, Error, HandlerFn};
use libloading::Library;
use std::collections::HashMap;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Where a route's handler lives. Locations are fixed per route, there is no discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HandlerLocation {
    /// Qualified handler name used in logs and errors, e.g. `home.get`
    pub tag: &'static str,
    /// Crate name of the handler library without the platform prefix and suffix, e.g. `home_lambda`
    pub library: &'static str,
    /// Exported entry point, e.g. `handler`
    pub entry: &'static str,
}

/// A handler that was loaded from a location.
#[derive(Clone)]
pub(crate) struct HandlerModule {
    pub tag: String,
    pub handler: HandlerFn,
}

/// A cache of loaded handler modules keyed by location.
pub(crate) trait ModuleCache: Send + Sync {
    /// Drops the cached module for `location`, if any.
    fn invalidate(&self, location: &HandlerLocation);

    /// Returns the cached module or loads it from storage.
    fn load(&self, location: &HandlerLocation) -> Result<HandlerModule, EmulatorError>;
}

/// Supplies handler functions to the router, always from a fresh load.
#[derive(Clone)]
pub(crate) struct HandlerLoader {
    cache: Arc<dyn ModuleCache>,
}

impl HandlerLoader {
    pub fn new(cache: Arc<dyn ModuleCache>) -> Self {
        Self { cache }
    }

    /// Evicts and reloads the module at `location` so that a rebuilt handler is picked up
    /// without restarting the emulator.
    pub fn load_handler(&self, location: &HandlerLocation) -> Result<HandlerFn, EmulatorError> {
        self.cache.invalidate(location);
        let module = self.cache.load(location)?;
        debug!("Loaded handler {}", module.tag);
        Ok(module.handler)
    }
}

/// Loads handlers from dynamic libraries exporting the `emulator_types::export_handler!` ABI.
pub(crate) struct DylibCache {
    /// E.g. target/debug
    handlers_dir: PathBuf,
    /// Every load gets a uniquely named copy in here
    shadow_dir: PathBuf,
    modules: RwLock<HashMap<&'static str, HandlerModule>>,
}

impl DylibCache {
    pub fn new(handlers_dir: PathBuf) -> Self {
        Self {
            handlers_dir,
            shadow_dir: std::env::temp_dir().join("local-emulator"),
            modules: RwLock::new(HashMap::new()),
        }
    }

    /// E.g. target/debug/libhome_lambda.so on Linux
    pub fn library_path(&self, location: &HandlerLocation) -> PathBuf {
        self.handlers_dir
            .join([DLL_PREFIX, location.library, DLL_SUFFIX].concat())
    }

    fn open(&self, location: &HandlerLocation) -> Result<HandlerModule, EmulatorError> {
        let path = self.library_path(location);
        if !path.is_file() {
            return Err(EmulatorError::HandlerNotFound {
                tag: location.tag.to_owned(),
                reason: format!(
                    "{} does not exist. Build it with `cargo build -p {}`",
                    path.display(),
                    location.library.replace('_', "-")
                ),
            });
        }

        // dlopen returns the already mapped library for a path it has seen before,
        // so the rebuilt file is loaded from a unique copy
        let shadow = self.shadow_copy(location, &path)?;

        let library = unsafe { Library::new(&shadow) }.map_err(|e| EmulatorError::HandlerLoad {
            tag: location.tag.to_owned(),
            reason: e.to_string(),
        });

        // the mapping survives the file removal on unix, other platforms keep the copy until the next start
        if let Err(e) = fs::remove_file(&shadow) {
            debug!("Cannot remove {}: {e}", shadow.display());
        }

        let library = library?;
        let free_name = [location.entry, FREE_SUFFIX].concat();

        let not_found = |name: &str, e: libloading::Error| EmulatorError::HandlerNotFound {
            tag: location.tag.to_owned(),
            reason: format!("no exported `{name}` entry point ({e})"),
        };

        // the pointers stay valid for as long as `library` is alive, it is moved into the handler below
        let entry: EntryPoint = unsafe { library.get::<EntryPoint>(location.entry.as_bytes()) }
            .map(|v| *v)
            .map_err(|e| not_found(location.entry, e))?;
        let free: FreeOutcome = unsafe { library.get::<FreeOutcome>(free_name.as_bytes()) }
            .map(|v| *v)
            .map_err(|e| not_found(&free_name, e))?;

        info!("Handler {} loaded from {}", location.tag, path.display());

        let library = Arc::new(library);
        let handler = handler_fn(move |event, context| {
            let library = Arc::clone(&library);
            async move {
                // the library runs its own runtime and blocks until the handler completes
                let outcome = tokio::task::spawn_blocking(move || {
                    let outcome = unsafe { invoke_raw(entry, free, &event, &context) };
                    drop(library);
                    outcome
                })
                .await;

                match outcome {
                    Ok(v) => v,
                    Err(e) => Err(Error::from(format!("Handler task failed: {e}"))),
                }
            }
        });

        Ok(HandlerModule {
            tag: location.tag.to_owned(),
            handler,
        })
    }

    fn shadow_copy(&self, location: &HandlerLocation, path: &Path) -> Result<PathBuf, EmulatorError> {
        let load_error = |e: std::io::Error| EmulatorError::HandlerLoad {
            tag: location.tag.to_owned(),
            reason: format!("cannot copy {}: {e}", path.display()),
        };

        fs::create_dir_all(&self.shadow_dir).map_err(load_error)?;

        let shadow = self
            .shadow_dir
            .join([location.library, "-", &Uuid::new_v4().to_string(), DLL_SUFFIX].concat());
        fs::copy(path, &shadow).map_err(load_error)?;

        Ok(shadow)
    }
}

impl ModuleCache for DylibCache {
    fn invalidate(&self, location: &HandlerLocation) {
        if let Ok(mut w) = self.modules.write() {
            if w.remove(location.tag).is_some() {
                debug!("Evicted handler {}", location.tag);
            }
        } else {
            error!("Write deadlock on the module cache. It's a bug");
        }
    }

    fn load(&self, location: &HandlerLocation) -> Result<HandlerModule, EmulatorError> {
        if let Ok(r) = self.modules.read() {
            if let Some(module) = r.get(location.tag) {
                return Ok(module.clone());
            }
        } else {
            error!("Read deadlock on the module cache. It's a bug");
        }

        let module = self.open(location)?;

        if let Ok(mut w) = self.modules.write() {
            w.insert(location.tag, module.clone());
        } else {
            error!("Write deadlock on the module cache. It's a bug");
        }

        Ok(module)
    }
}
