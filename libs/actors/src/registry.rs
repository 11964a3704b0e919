//! Thread and startup registries
//!
//! All registration happens on a [`RegistryBuilder`] during startup. The
//! built [`Registry`] is immutable and shared by the host and every worker
//! thread. Installing it process-wide is allowed once, and only before the
//! first spawn. A thread can also [`Registry::enter`] a registry of its own;
//! worker threads enter the registry they were spawned with.

use crate::blueprint::{Args, Blueprint, Fault, Main};
use crate::channel::{Receiver, Sender};
use crate::error::{Result, SpindleError};
use crate::mutex::Mutex;
use once_cell::sync::{Lazy, OnceCell};
use spindle_codec::{Marshal, MarshalKey, MarshalRegistry};
use std::any::{type_name, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key identifying a blueprint across threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadKey(u32);

impl ThreadKey {
    /// Reserved for the main blueprint
    pub const MAIN: ThreadKey = ThreadKey(0);

    pub const fn new(key: u32) -> Self {
        Self(key)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub fn is_main(self) -> bool {
        self == Self::MAIN
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds a blueprint instance on its worker thread
pub type ConstructFn = fn(Args) -> std::result::Result<Rc<dyn Blueprint>, Fault>;

/// Builds the main instance in the host process
pub type CreateMainFn = fn() -> Rc<dyn Main>;

fn construct<B: Blueprint>(args: Args) -> std::result::Result<Rc<dyn Blueprint>, Fault> {
    Ok(Rc::new(B::construct(args)?))
}

fn create_main<M: Main + Default>() -> Rc<dyn Main> {
    Rc::new(M::default())
}

/// A spawnable blueprint
#[derive(Clone)]
pub struct BlueprintEntry {
    pub key: ThreadKey,
    pub name: &'static str,
    pub construct: ConstructFn,
}

impl fmt::Debug for BlueprintEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlueprintEntry")
            .field("key", &self.key)
            .field("name", &self.name)
            .finish()
    }
}

/// The main blueprint, always at [`ThreadKey::MAIN`]
#[derive(Clone)]
pub struct MainEntry {
    pub name: &'static str,
    pub create: CreateMainFn,
}

impl fmt::Debug for MainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainEntry").field("name", &self.name).finish()
    }
}

/// Table of spawnable blueprints plus the single main blueprint
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    main: Option<MainEntry>,
    workers: Vec<BlueprintEntry>,
    keys: HashMap<TypeId, ThreadKey>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_main<M: Main + Default>(&mut self) -> Result<ThreadKey> {
        if let Some(existing) = &self.main {
            return Err(SpindleError::MultipleMainRegistration {
                existing: existing.name,
                rejected: type_name::<M>(),
            });
        }
        self.main = Some(MainEntry {
            name: type_name::<M>(),
            create: create_main::<M>,
        });
        self.keys.insert(TypeId::of::<M>(), ThreadKey::MAIN);
        debug!(blueprint = type_name::<M>(), "Registered main blueprint");
        Ok(ThreadKey::MAIN)
    }

    /// Register a worker blueprint under the next key, starting at 1
    pub fn register_worker<B: Blueprint>(&mut self) -> Result<ThreadKey> {
        if let Some(&key) = self.keys.get(&TypeId::of::<B>()) {
            return Err(SpindleError::DuplicateBlueprint {
                name: type_name::<B>(),
                key: key.get(),
            });
        }
        let key = ThreadKey::new(self.workers.len() as u32 + 1);
        self.workers.push(BlueprintEntry {
            key,
            name: type_name::<B>(),
            construct: construct::<B>,
        });
        self.keys.insert(TypeId::of::<B>(), key);
        debug!(blueprint = type_name::<B>(), thread_key = %key, "Registered worker blueprint");
        Ok(key)
    }

    pub fn key_for<B: 'static>(&self) -> Option<ThreadKey> {
        self.keys.get(&TypeId::of::<B>()).copied()
    }

    /// Worker blueprint for a key; the main key never resolves here
    pub fn blueprint_for(&self, key: ThreadKey) -> Option<&BlueprintEntry> {
        if key.is_main() {
            return None;
        }
        self.workers.get(key.get() as usize - 1)
    }

    pub fn main(&self) -> Option<&MainEntry> {
        self.main.as_ref()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// Frozen registration tables shared by every thread of the process
#[derive(Debug)]
pub struct Registry {
    marshal: MarshalRegistry,
    threads: ThreadRegistry,
}

static INSTALLED: OnceCell<Arc<Registry>> = OnceCell::new();
static BUILTINS_ONLY: Lazy<Arc<Registry>> = Lazy::new(|| RegistryBuilder::new().build());
static SEALED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static ENTERED: RefCell<Option<Arc<Registry>>> = const { RefCell::new(None) };
}

/// Restores the previously entered registry on drop
#[must_use = "the registry is only entered while the guard lives"]
#[derive(Debug)]
pub struct RegistryScope {
    previous: Option<Arc<Registry>>,
}

impl Drop for RegistryScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ENTERED.with(|entered| *entered.borrow_mut() = previous);
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Publish this registry for the whole process
    ///
    /// Fails if a registry is already installed or a worker has already
    /// been spawned against the default one.
    pub fn install(self: Arc<Self>) -> Result<Arc<Self>> {
        if SEALED.load(Ordering::Acquire) && INSTALLED.get().is_none() {
            return Err(SpindleError::invalid_state(
                "registry installed after the first spawn",
            ));
        }
        INSTALLED
            .set(Arc::clone(&self))
            .map_err(|_| SpindleError::AlreadyInstalled)?;
        info!(
            marshalled_types = self.marshal.len(),
            blueprints = self.threads.worker_count(),
            has_main = self.threads.main().is_some(),
            "Installed process registry"
        );
        Ok(self)
    }

    /// The registry entered on this thread, else the installed one, else
    /// one holding only the built-in types
    pub fn current() -> Arc<Registry> {
        if let Some(entered) = ENTERED.with(|entered| entered.borrow().clone()) {
            return entered;
        }
        INSTALLED
            .get()
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&BUILTINS_ONLY))
    }

    /// Make `registry` current on this thread until the guard drops
    pub fn enter(registry: Arc<Registry>) -> RegistryScope {
        let previous = ENTERED.with(|entered| entered.borrow_mut().replace(registry));
        RegistryScope { previous }
    }

    pub fn is_installed() -> bool {
        INSTALLED.get().is_some()
    }

    /// Close the registration window; called on every spawn
    pub(crate) fn seal() {
        SEALED.store(true, Ordering::Release);
    }

    pub fn marshal(&self) -> &MarshalRegistry {
        &self.marshal
    }

    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    pub fn key_for<T: 'static>(&self) -> Option<MarshalKey> {
        self.marshal.key_for::<T>()
    }

    pub fn thread_key_for<B: 'static>(&self) -> Option<ThreadKey> {
        self.threads.key_for::<B>()
    }

    pub fn blueprint_for(&self, key: ThreadKey) -> Option<&BlueprintEntry> {
        self.threads.blueprint_for(key)
    }

    pub fn main_blueprint(&self) -> Option<&MainEntry> {
        self.threads.main()
    }
}

type RegisterBuiltin = fn(&mut MarshalRegistry) -> spindle_codec::Result<MarshalKey>;

/// Types every process registers before any user type
const BUILTINS: [RegisterBuiltin; 3] = [
    MarshalRegistry::register::<Sender>,
    MarshalRegistry::register::<Receiver>,
    MarshalRegistry::register::<Mutex>,
];

/// Startup-phase registration
#[derive(Debug)]
pub struct RegistryBuilder {
    marshal: MarshalRegistry,
    threads: ThreadRegistry,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        let mut marshal = MarshalRegistry::new();
        for register in BUILTINS {
            if let Err(err) = register(&mut marshal) {
                warn!(error = %err, "Built-in marshalled type failed to register");
            }
        }
        Self {
            marshal,
            threads: ThreadRegistry::new(),
        }
    }

    /// Mark `T` as a marshalled value type
    pub fn marshal<T: Marshal>(&mut self) -> Result<&mut Self> {
        self.marshal.register::<T>()?;
        Ok(self)
    }

    /// Mark `B` as a spawnable worker blueprint
    pub fn worker<B: Blueprint>(&mut self) -> Result<&mut Self> {
        self.threads.register_worker::<B>()?;
        Ok(self)
    }

    /// Mark `M` as the process entry point
    pub fn main<M: Main + Default>(&mut self) -> Result<&mut Self> {
        self.threads.register_main::<M>()?;
        Ok(self)
    }

    pub fn build(self) -> Arc<Registry> {
        Arc::new(Registry {
            marshal: self.marshal,
            threads: self.threads,
        })
    }

    /// Build and install in one step
    pub fn install(self) -> Result<Arc<Registry>> {
        self.build().install()
    }
}
