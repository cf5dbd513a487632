//! Builtin command handlers and the table that registers them.
//!
//! [`Builtins`] owns the per-boot state the handlers share: the collaborator
//! [`Platform`], the mount orchestrator with its stored primary outcome, and
//! the persistent-property call counter. Handlers are plain functions so the
//! registry can hold them as `fn` pointers.

pub mod fs;
pub mod props;

use crate::dispatch::{CommandInvocation, Flow};
use crate::error::{Result, ignore_enoent};
use crate::exec::ExecEscalation;
use crate::mount::{self, CRYPTO_TYPE_PROPERTY, MountAllArgs, MountOrchestrator};
use crate::platform::Platform;
use crate::readahead;
use crate::recovery::{RecoveryEscalation, RecoveryRequest};
use crate::registry::{CommandSpec, UNBOUNDED};
use crate::services::ServiceClassController;
use crate::types::CryptoType;
use props::PersistentProps;
use std::path::Path;

/// Directory created under the `installkey` argument, left unencrypted
const UNENCRYPTED_DIR: &str = "unencrypted";

/// Shared state for one boot
pub struct Builtins {
    platform: Platform,
    mounts: MountOrchestrator,
    services: ServiceClassController,
    exec: ExecEscalation,
    persistent: PersistentProps,
}

impl Builtins {
    pub fn new(platform: Platform) -> Self {
        Self {
            mounts: MountOrchestrator::new(),
            services: ServiceClassController::new(&platform),
            exec: ExecEscalation::new(&platform),
            persistent: PersistentProps::default(),
            platform,
        }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn mounts(&self) -> &MountOrchestrator {
        &self.mounts
    }
}

impl std::fmt::Debug for Builtins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtins")
            .field("platform", &self.platform)
            .field("mounts", &self.mounts)
            .finish_non_exhaustive()
    }
}

fn done(result: Result<()>) -> Result<Flow> {
    result.map(|()| Flow::Continue)
}

// ============================================================================
// Service control
// ============================================================================

fn do_class_start(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.start_class(&args[1]))
}

fn do_class_start_post_data(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.post_data_start(&args[1], args.context))
}

fn do_class_stop(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.stop_class(&args[1]))
}

fn do_class_reset(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.reset_class(&args[1]))
}

fn do_class_reset_post_data(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.post_data_reset(&args[1], args.context))
}

fn do_class_restart(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.restart_class(&args[1]))
}

fn do_start(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.start(&args[1]))
}

fn do_stop(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.stop(&args[1]))
}

fn do_restart(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.restart(&args[1]))
}

fn do_enable(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.enable(&args[1]))
}

fn do_exec_start(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.exec_start(&args[1]))
}

fn do_interface_start(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.interface_start(&args[1]))
}

fn do_interface_stop(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.interface_stop(&args[1]))
}

fn do_interface_restart(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.services.interface_restart(&args[1]))
}

fn do_mark_post_data(b: &mut Builtins, _: &CommandInvocation) -> Result<Flow> {
    b.services.mark_post_data();
    Ok(Flow::Continue)
}

fn do_exec(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.exec.exec(&args.args))
}

fn do_exec_background(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(b.exec.exec_background(&args.args))
}

// ============================================================================
// Storage
// ============================================================================

fn do_mount_all(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    let parsed = MountAllArgs::parse(args.params())?;
    b.mounts.mount_all(&b.platform, &parsed)
}

fn do_remount_userdata(b: &mut Builtins, _: &CommandInvocation) -> Result<Flow> {
    b.mounts.remount_userdata(&b.platform)
}

fn do_umount_all(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    b.mounts.umount_all(&b.platform, &args[1])
}

fn do_verity_update_state(b: &mut Builtins, _: &CommandInvocation) -> Result<Flow> {
    mount::update_verity_state(&b.platform)
}

fn do_swapon_all(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    b.mounts.swapon_all(&b.platform, &args[1])
}

fn is_file_crypto(b: &Builtins) -> bool {
    b.platform.properties.get(CRYPTO_TYPE_PROPERTY).as_deref()
        == Some(CryptoType::File.to_string().as_str())
}

fn do_installkey(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    if !is_file_crypto(b) {
        return Ok(Flow::Continue);
    }
    fs::make_dir_if_missing(&Path::new(&args[1]).join(UNENCRYPTED_DIR), 0o700)?;
    done(b.exec.exec_vdc_reboot_on_failure(&b.platform, "enablefilecrypto"))
}

fn do_init_user0(b: &mut Builtins, _: &CommandInvocation) -> Result<Flow> {
    done(b.exec.exec_vdc_reboot_on_failure(&b.platform, "init_user0"))
}

// ============================================================================
// Filesystem
// ============================================================================

fn do_mkdir(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    let options = fs::MkdirOptions::parse(args.params())?;
    if let Err(e) = fs::mkdir(&options) {
        return done(ignore_enoent(Err(e)));
    }
    if !b.platform.device.fscrypt_native {
        return Ok(Flow::Continue);
    }
    if !b.platform.fs_mgr.set_directory_policy(
        &options.target,
        options.key_ref,
        options.fscrypt_action,
    ) {
        let reason = format!("set_policy_failed:{}", options.target);
        return RecoveryEscalation::new(&b.platform)
            .reboot_into_recovery(&RecoveryRequest::prompt_and_wipe_data(&reason));
    }
    Ok(Flow::Continue)
}

fn do_chmod(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(ignore_enoent(fs::chmod(&args[1], &args[2])))
}

fn do_chown(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(ignore_enoent(fs::chown(args.params())))
}

fn do_symlink(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    // Often creates compatibility links whose parents only exist on some devices
    done(ignore_enoent(fs::symlink(&args[1], &args[2])))
}

fn do_rm(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(fs::rm(&args[1]))
}

fn do_rmdir(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(fs::rmdir(&args[1]))
}

fn do_write(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(ignore_enoent(fs::write(&args[1], &args[2])))
}

fn do_copy(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(fs::copy(&args[1], &args[2]))
}

fn do_mount(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    let request = fs::MountRequest::parse(args.params())?;
    done(ignore_enoent(fs::mount(&request)))
}

fn do_umount(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(fs::umount(&args[1]))
}

fn do_readahead(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    let fully = args.arg_count() == 2 && &args[2] == "--fully";
    done(readahead::spawn(Path::new(&args[1]), fully))
}

fn do_wait(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    let timeout = args.params().get(1).map(String::as_str);
    done(fs::wait(&args[1], timeout))
}

fn do_hostname(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(fs::write_kernel_value("/proc/sys/kernel/hostname", &args[1]))
}

fn do_domainname(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(fs::write_kernel_value("/proc/sys/kernel/domainname", &args[1]))
}

// ============================================================================
// Properties and misc
// ============================================================================

fn do_setprop(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(props::setprop(b.platform.properties.as_ref(), &args[1], &args[2]))
}

fn do_wait_for_prop(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(props::wait_for_prop(b.platform.properties.as_ref(), &args[1], &args[2]))
}

fn do_trigger(b: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    b.platform.actions.queue_event_trigger(&args[1]);
    Ok(Flow::Continue)
}

fn do_load_persist_props(b: &mut Builtins, _: &CommandInvocation) -> Result<Flow> {
    b.persistent.load(b.platform.properties.as_ref());
    Ok(Flow::Continue)
}

fn do_load_system_props(_: &mut Builtins, _: &CommandInvocation) -> Result<Flow> {
    log::info!("deprecated action `load_system_props` called.");
    Ok(Flow::Continue)
}

fn do_loglevel(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    done(props::loglevel(&args[1]))
}

fn do_export(_: &mut Builtins, args: &CommandInvocation) -> Result<Flow> {
    // SAFETY: no other thread may read or write the environment while this
    // runs. Commands run one at a time on the sequencing thread and readahead
    // workers never touch it; a host running other threads must keep them
    // off the environment during command execution.
    unsafe { std::env::set_var(&args[1], &args[2]) };
    Ok(Flow::Continue)
}

/// Every builtin with its argument bounds and context restriction
pub fn builtin_specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("chmod", 2, 2, do_chmod),
        CommandSpec::new("chown", 2, 3, do_chown),
        CommandSpec::new("class_reset", 1, 1, do_class_reset),
        CommandSpec::new("class_reset_post_data", 1, 1, do_class_reset_post_data).init_only(),
        CommandSpec::new("class_restart", 1, 1, do_class_restart),
        CommandSpec::new("class_start", 1, 1, do_class_start),
        CommandSpec::new("class_start_post_data", 1, 1, do_class_start_post_data).init_only(),
        CommandSpec::new("class_stop", 1, 1, do_class_stop),
        CommandSpec::new("copy", 2, 2, do_copy),
        CommandSpec::new("domainname", 1, 1, do_domainname),
        CommandSpec::new("enable", 1, 1, do_enable),
        CommandSpec::new("exec", 1, UNBOUNDED, do_exec),
        CommandSpec::new("exec_background", 1, UNBOUNDED, do_exec_background),
        CommandSpec::new("exec_start", 1, 1, do_exec_start),
        CommandSpec::new("export", 2, 2, do_export),
        CommandSpec::new("hostname", 1, 1, do_hostname),
        CommandSpec::new("init_user0", 0, 0, do_init_user0),
        CommandSpec::new("installkey", 1, 1, do_installkey),
        CommandSpec::new("interface_restart", 1, 1, do_interface_restart),
        CommandSpec::new("interface_start", 1, 1, do_interface_start),
        CommandSpec::new("interface_stop", 1, 1, do_interface_stop),
        CommandSpec::new("load_persist_props", 0, 0, do_load_persist_props),
        CommandSpec::new("load_system_props", 0, 0, do_load_system_props),
        CommandSpec::new("loglevel", 1, 1, do_loglevel),
        CommandSpec::new("mark_post_data", 0, 0, do_mark_post_data),
        CommandSpec::new("mkdir", 1, 6, do_mkdir),
        CommandSpec::new("mount_all", 1, UNBOUNDED, do_mount_all),
        CommandSpec::new("mount", 3, UNBOUNDED, do_mount),
        CommandSpec::new("umount", 1, 1, do_umount),
        CommandSpec::new("umount_all", 1, 1, do_umount_all),
        CommandSpec::new("readahead", 1, 2, do_readahead),
        CommandSpec::new("remount_userdata", 0, 0, do_remount_userdata),
        CommandSpec::new("restart", 1, 1, do_restart),
        CommandSpec::new("rm", 1, 1, do_rm),
        CommandSpec::new("rmdir", 1, 1, do_rmdir),
        CommandSpec::new("setprop", 2, 2, do_setprop),
        CommandSpec::new("start", 1, 1, do_start),
        CommandSpec::new("stop", 1, 1, do_stop),
        CommandSpec::new("swapon_all", 1, 1, do_swapon_all),
        CommandSpec::new("symlink", 2, 2, do_symlink),
        CommandSpec::new("trigger", 1, 1, do_trigger),
        CommandSpec::new("verity_update_state", 0, 0, do_verity_update_state),
        CommandSpec::new("wait", 1, 2, do_wait),
        CommandSpec::new("wait_for_prop", 2, 2, do_wait_for_prop),
        CommandSpec::new("write", 2, 2, do_write),
    ]
}
