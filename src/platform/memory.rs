//! In-memory collaborators.
//!
//! Used by `bootinit run` to simulate a device from a profile and by the
//! tests. Everything is recorded so callers can inspect what the builtins
//! did; shutdowns are recorded instead of executed.

use super::{
    ActionQueue, BootloaderMessage, DeviceFlags, FsManager, OneshotService, Platform,
    PowerControl, PropertyStore, ReapCallback, ServiceList,
};
use crate::config_file::{DeviceProfile, FsManagerScript, ServiceDecl};
use crate::fstab::Fstab;
use crate::types::{FscryptAction, KeyRef, MountMode, Transition};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a panicking test poisoned it
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryProperties {
    values: Mutex<BTreeMap<String, String>>,
    waiting: Mutex<Option<(String, String)>>,
    persistent_loads: AtomicUsize,
}

impl MemoryProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a name/value map
    pub fn with_values(values: &BTreeMap<String, String>) -> Self {
        Self {
            values: Mutex::new(values.clone()),
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        lock(&self.values).clone()
    }

    /// The property/value pair currently blocking the queue, if any
    pub fn waiting_for(&self) -> Option<(String, String)> {
        lock(&self.waiting).clone()
    }

    pub fn persistent_loads(&self) -> usize {
        self.persistent_loads.load(Ordering::SeqCst)
    }
}

impl PropertyStore for MemoryProperties {
    fn get(&self, name: &str) -> Option<String> {
        lock(&self.values).get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) -> io::Result<()> {
        {
            let mut values = lock(&self.values);
            // ro.* properties are write-once
            if name.starts_with("ro.") && values.contains_key(name) {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("read-only property '{}' already set", name),
                ));
            }
            values.insert(name.to_string(), value.to_string());
        }

        let mut waiting = lock(&self.waiting);
        if waiting.as_ref().is_some_and(|(n, v)| n == name && v == value) {
            *waiting = None;
        }
        Ok(())
    }

    fn start_waiting(&self, name: &str, value: &str) -> bool {
        if lock(&self.waiting).is_some() {
            return false;
        }
        if self.get(name).is_some_and(|v| v == value) {
            return true;
        }
        *lock(&self.waiting) = Some((name.to_string(), value.to_string()));
        true
    }

    fn load_persistent(&self) {
        self.persistent_loads.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Action queue
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryActionQueue {
    triggers: Mutex<Vec<String>>,
    parsed: Mutex<Vec<String>>,
}

impl MemoryActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn triggers(&self) -> Vec<String> {
        lock(&self.triggers).clone()
    }

    /// How many times `trigger` was queued
    pub fn trigger_count(&self, trigger: &str) -> usize {
        lock(&self.triggers).iter().filter(|t| *t == trigger).count()
    }

    pub fn parsed_configs(&self) -> Vec<String> {
        lock(&self.parsed).clone()
    }
}

impl ActionQueue for MemoryActionQueue {
    fn queue_event_trigger(&self, trigger: &str) {
        lock(&self.triggers).push(trigger.to_string());
    }

    fn parse_config(&self, path: &str) -> bool {
        lock(&self.parsed).push(path.to_string());
        true
    }
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Clone)]
struct ServiceRecord {
    decl: ServiceDecl,
    running: bool,
    post_data: bool,
    reset_post_data: bool,
}

#[derive(Default)]
struct OneshotShared {
    callbacks: Vec<ReapCallback>,
    registered: bool,
    started: bool,
}

/// One-shot service handed out by [`MemoryServiceList::make_oneshot`]
pub struct MemoryOneshot {
    name: String,
    argv: Vec<String>,
    pid: i32,
    shared: Arc<Mutex<OneshotShared>>,
    fail_exec_start: bool,
    exit_code: Option<i32>,
}

impl MemoryOneshot {
    fn run(&mut self) -> io::Result<()> {
        if self.fail_exec_start {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("cannot execute '{}'", self.argv[0]),
            ));
        }
        lock(&self.shared).started = true;
        if let Some(code) = self.exit_code {
            reap_shared(&self.shared, WaitStatus::Exited(Pid::from_raw(self.pid), code));
        }
        Ok(())
    }
}

impl OneshotService for MemoryOneshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_reap_callback(&mut self, callback: ReapCallback) {
        lock(&self.shared).callbacks.push(callback);
    }

    fn exec_start(&mut self) -> io::Result<()> {
        self.run()
    }

    fn start(&mut self) -> io::Result<()> {
        self.run()
    }
}

fn reap_shared(shared: &Mutex<OneshotShared>, status: WaitStatus) {
    // Callbacks run without the lock held
    let callbacks = std::mem::take(&mut lock(shared).callbacks);
    for callback in callbacks {
        callback(status);
    }
}

/// Service registry seeded from declarations
#[derive(Default)]
pub struct MemoryServiceList {
    services: Mutex<Vec<ServiceRecord>>,
    oneshots: Mutex<Vec<(String, Arc<Mutex<OneshotShared>>)>>,
    history: Mutex<Vec<(String, Transition)>>,
    exit_codes: Mutex<HashMap<String, i32>>,
    post_data_marked: AtomicBool,
    fail_make_oneshot: AtomicBool,
    fail_exec_start: AtomicBool,
    next_pid: AtomicI32,
}

impl MemoryServiceList {
    pub fn new(decls: &[ServiceDecl]) -> Self {
        let list = Self::default();
        {
            let mut services = lock(&list.services);
            for decl in decls {
                services.push(ServiceRecord {
                    decl: decl.clone(),
                    running: false,
                    post_data: decl.post_data,
                    reset_post_data: false,
                });
            }
        }
        list.next_pid.store(1000, Ordering::SeqCst);
        list
    }

    pub fn is_running(&self, name: &str) -> bool {
        lock(&self.services)
            .iter()
            .any(|s| s.decl.name == name && s.running)
    }

    /// Every transition requested so far, in order
    pub fn history(&self) -> Vec<(String, Transition)> {
        lock(&self.history).clone()
    }

    /// Names of one-shot services handed over via `add_service`
    pub fn registered_oneshots(&self) -> Vec<String> {
        lock(&self.oneshots)
            .iter()
            .filter(|(_, shared)| lock(shared).registered)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Simulate the supervisor reaping a one-shot service
    pub fn reap(&self, name: &str, status: WaitStatus) -> bool {
        let shared = lock(&self.oneshots)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, shared)| Arc::clone(shared));
        match shared {
            Some(shared) => {
                reap_shared(&shared, status);
                true
            }
            None => false,
        }
    }

    /// Make one-shots whose argv[0] is `binary` exit with `code` as soon as they start
    pub fn set_exit_code(&self, binary: &str, code: i32) {
        lock(&self.exit_codes).insert(binary.to_string(), code);
    }

    pub fn fail_make_oneshot(&self, fail: bool) {
        self.fail_make_oneshot.store(fail, Ordering::SeqCst);
    }

    pub fn fail_exec_start(&self, fail: bool) {
        self.fail_exec_start.store(fail, Ordering::SeqCst);
    }

    fn start_record(record: &mut ServiceRecord, post_data_marked: bool) -> io::Result<()> {
        if record.decl.missing_binary {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("cannot find executable for '{}'", record.decl.name),
            ));
        }
        if !record.running {
            record.running = true;
            record.post_data = post_data_marked;
        }
        Ok(())
    }
}

impl ServiceList for MemoryServiceList {
    fn class_members(&self, class: &str) -> Vec<String> {
        lock(&self.services)
            .iter()
            .filter(|s| s.decl.classes.iter().any(|c| c == class))
            .map(|s| s.decl.name.clone())
            .collect()
    }

    fn contains(&self, name: &str) -> bool {
        lock(&self.services).iter().any(|s| s.decl.name == name)
    }

    fn find_interface(&self, interface: &str) -> Option<String> {
        lock(&self.services)
            .iter()
            .find(|s| s.decl.interfaces.iter().any(|i| i == interface))
            .map(|s| s.decl.name.clone())
    }

    fn apply(&self, name: &str, transition: Transition) -> io::Result<()> {
        lock(&self.history).push((name.to_string(), transition));
        let marked = self.post_data_marked.load(Ordering::SeqCst);

        let mut services = lock(&self.services);
        let record = services
            .iter_mut()
            .find(|s| s.decl.name == name)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("service {} not found", name))
            })?;

        match transition {
            Transition::Start | Transition::ExecStart => Self::start_record(record, marked),
            Transition::StartIfNotDisabled => {
                if record.decl.disabled {
                    Ok(())
                } else {
                    Self::start_record(record, marked)
                }
            }
            Transition::StartIfPostData => {
                if record.reset_post_data {
                    record.reset_post_data = false;
                    Self::start_record(record, marked)
                } else {
                    Ok(())
                }
            }
            Transition::Stop | Transition::Reset => {
                record.running = false;
                Ok(())
            }
            Transition::Restart => {
                record.running = false;
                Self::start_record(record, marked)
            }
            Transition::ResetIfPostData => {
                if record.running && record.post_data {
                    record.running = false;
                    record.reset_post_data = true;
                }
                Ok(())
            }
            Transition::Enable => {
                record.decl.disabled = false;
                Ok(())
            }
        }
    }

    fn make_oneshot(&self, argv: &[String]) -> io::Result<Box<dyn OneshotService>> {
        if self.fail_make_oneshot.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "oneshot creation disabled"));
        }
        // argv[0] is the command name ("exec"), the program follows
        let Some(program) = argv.get(1) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "No such executable to run",
            ));
        };
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let name = format!("exec {} ({})", pid, program);
        let shared = Arc::new(Mutex::new(OneshotShared::default()));
        lock(&self.oneshots).push((name.clone(), Arc::clone(&shared)));

        Ok(Box::new(MemoryOneshot {
            name,
            argv: argv[1..].to_vec(),
            pid,
            shared,
            fail_exec_start: self.fail_exec_start.load(Ordering::SeqCst),
            exit_code: lock(&self.exit_codes).get(program).copied(),
        }))
    }

    fn add_service(&self, service: Box<dyn OneshotService>) {
        if let Some((_, shared)) = lock(&self.oneshots)
            .iter()
            .find(|(name, _)| name == service.name())
        {
            lock(shared).registered = true;
        }
    }

    fn mark_post_data(&self) {
        self.post_data_marked.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Mount subsystem
// ============================================================================

/// fs_mgr stand-in that returns scripted codes
#[derive(Debug, Default)]
pub struct ScriptedFsManager {
    script: FsManagerScript,
    tables: Mutex<HashMap<String, Fstab>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFsManager {
    pub fn new(script: FsManagerScript) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Serve `fstab` for reads of `path` without touching the disk
    pub fn with_table(self, path: &str, fstab: Fstab) -> Self {
        lock(&self.tables).insert(path.to_string(), fstab);
        self
    }

    /// Calls made so far, e.g. `mount_all:late`
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }
}

impl FsManager for ScriptedFsManager {
    fn read_fstab(&self, path: &str) -> io::Result<Fstab> {
        self.record(format!("read_fstab:{}", path));
        if let Some(fstab) = lock(&self.tables).get(path) {
            return Ok(fstab.clone());
        }
        Fstab::load_from_file(path)
            .map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("{:#}", e)))
    }

    fn read_default_fstab(&self) -> io::Result<Fstab> {
        let path = self.script.default_fstab.clone();
        self.read_fstab(&path)
    }

    fn mount_all(&self, _fstab: &Fstab, mode: MountMode) -> i32 {
        self.record(format!("mount_all:{}", mode));
        self.script.mount_all_code(mode)
    }

    fn umount_all(&self, _fstab: &Fstab) -> i32 {
        self.record("umount_all".to_string());
        self.script.umount_all_code
    }

    fn swapon_all(&self, _fstab: &Fstab) -> bool {
        self.record("swapon_all".to_string());
        self.script.swapon_ok
    }

    fn remount_userdata_into_checkpointing(&self, _fstab: &Fstab) -> i32 {
        self.record("remount_userdata".to_string());
        self.script.remount_code
    }

    fn install_keyring(&self) -> bool {
        self.record("install_keyring".to_string());
        self.script.keyring_ok
    }

    fn set_directory_policy(&self, dir: &str, key: KeyRef, action: FscryptAction) -> bool {
        self.record(format!("set_directory_policy:{}:{}:{}", dir, key, action));
        self.script.set_policy_ok
    }

    fn load_verity_state(&self) -> Option<i32> {
        self.record("load_verity_state".to_string());
        self.script.verity_mode
    }
}

// ============================================================================
// Bootloader message and power
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryBootloader {
    messages: Mutex<Vec<Vec<String>>>,
    fail: AtomicBool,
}

impl MemoryBootloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<Vec<String>> {
        lock(&self.messages).clone()
    }
}

impl BootloaderMessage for MemoryBootloader {
    fn write(&self, options: &[String]) -> io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "misc partition not writable"));
        }
        lock(&self.messages).push(options.to_vec());
        Ok(())
    }
}

/// Records shutdown requests instead of performing them
#[derive(Debug, Default)]
pub struct RecordingPower {
    requests: Mutex<Vec<String>>,
}

impl RecordingPower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }
}

impl PowerControl for RecordingPower {
    fn shutdown(&self, reason: &str) {
        log::warn!("Shutdown requested: {}", reason);
        lock(&self.requests).push(reason.to_string());
    }

    fn is_shutting_down(&self) -> bool {
        !lock(&self.requests).is_empty()
    }
}

// ============================================================================
// Simulated device
// ============================================================================

/// A full set of in-memory collaborators seeded from a profile.
///
/// Keeps typed handles so callers can inspect the state after running
/// commands through the [`Platform`] view.
#[derive(Clone)]
pub struct SimulatedDevice {
    pub properties: Arc<MemoryProperties>,
    pub actions: Arc<MemoryActionQueue>,
    pub services: Arc<MemoryServiceList>,
    pub fs_mgr: Arc<ScriptedFsManager>,
    pub bootloader: Arc<MemoryBootloader>,
    pub power: Arc<RecordingPower>,
    pub device: DeviceFlags,
}

impl SimulatedDevice {
    pub fn new(profile: &DeviceProfile) -> Self {
        let services = MemoryServiceList::new(&profile.services);
        for (binary, code) in &profile.exec_exit_codes {
            services.set_exit_code(binary, *code);
        }
        Self {
            properties: Arc::new(MemoryProperties::with_values(&profile.properties)),
            actions: Arc::new(MemoryActionQueue::new()),
            services: Arc::new(services),
            fs_mgr: Arc::new(ScriptedFsManager::new(profile.fs_mgr.clone())),
            bootloader: Arc::new(MemoryBootloader::new()),
            power: Arc::new(RecordingPower::new()),
            device: profile.device_flags(),
        }
    }

    /// Replace the mount subsystem, e.g. to serve preloaded tables
    pub fn with_fs_mgr(mut self, fs_mgr: ScriptedFsManager) -> Self {
        self.fs_mgr = Arc::new(fs_mgr);
        self
    }

    /// Trait-object view handed to the builtins
    pub fn platform(&self) -> Platform {
        Platform {
            properties: self.properties.clone(),
            actions: self.actions.clone(),
            services: self.services.clone(),
            fs_mgr: self.fs_mgr.clone(),
            bootloader: self.bootloader.clone(),
            power: self.power.clone(),
            device: self.device,
        }
    }
}
