//! Filesystem builtins: directories, permissions, links, files and mounts.
//!
//! Failures carry the underlying `io::Error` so the ENOENT suppression rule
//! can recognise a missing path. Which commands apply the rule is decided by
//! the handlers in the parent module.

use crate::error::{BuiltinError, Result};
use crate::types::{FscryptAction, KeyRef};
use nix::mount::{MntFlags, MsFlags};
use nix::unistd::{Group, User};
use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Default `mkdir` mode
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// How long `wait` and `mount ... wait` poll for a path by default
pub const COMMAND_RETRY_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Parse an octal permission string such as `0700`
pub fn parse_mode(s: &str) -> Result<u32> {
    u32::from_str_radix(s, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .ok_or_else(|| BuiltinError::invalid(format!("invalid mode '{}'", s)))
}

/// Numeric id or user name
pub fn decode_uid(s: &str) -> Result<u32> {
    if let Ok(uid) = s.parse::<u32>() {
        return Ok(uid);
    }
    match User::from_name(s) {
        Ok(Some(user)) => Ok(user.uid.as_raw()),
        Ok(None) => Err(BuiltinError::invalid(format!("Unable to decode UID for '{}'", s))),
        Err(e) => Err(BuiltinError::errno(format!("getpwnam({}) failed", s), e)),
    }
}

/// Numeric id or group name
pub fn decode_gid(s: &str) -> Result<u32> {
    if let Ok(gid) = s.parse::<u32>() {
        return Ok(gid);
    }
    match Group::from_name(s) {
        Ok(Some(group)) => Ok(group.gid.as_raw()),
        Ok(None) => Err(BuiltinError::invalid(format!("Unable to decode GID for '{}'", s))),
        Err(e) => Err(BuiltinError::errno(format!("getgrnam({}) failed", s), e)),
    }
}

// ============================================================================
// mkdir
// ============================================================================

/// `mkdir <path> [mode] [owner] [group] [encryption=<action>] [key=<ref>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkdirOptions {
    pub target: String,
    pub mode: u32,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub fscrypt_action: FscryptAction,
    pub key_ref: KeyRef,
}

/// Top-level directories under this prefix are expected to state an
/// encryption action
const DATA_PREFIX: &str = "/data/";

impl MkdirOptions {
    pub fn parse(params: &[String]) -> Result<Self> {
        let target = params
            .first()
            .ok_or_else(|| BuiltinError::invalid("mkdir requires a path"))?
            .clone();
        let mode = match params.get(1) {
            Some(mode) => parse_mode(mode)?,
            None => DEFAULT_DIR_MODE,
        };
        let uid = params.get(2).map(|s| decode_uid(s)).transpose()?;
        let gid = params.get(3).map(|s| decode_gid(s)).transpose()?;

        let mut fscrypt_action = None;
        let mut key_ref = None;
        for option in params.iter().skip(4) {
            if let Some(value) = option.strip_prefix("encryption=") {
                if fscrypt_action.is_some() {
                    return Err(BuiltinError::invalid("Duplicated option: 'encryption'"));
                }
                let action = value.parse().map_err(|_| {
                    BuiltinError::invalid(format!("Unknown encryption option: '{}'", value))
                })?;
                fscrypt_action = Some(action);
            } else if let Some(value) = option.strip_prefix("key=") {
                if key_ref.is_some() {
                    return Err(BuiltinError::invalid("Duplicated option: 'key'"));
                }
                let key = value.parse().map_err(|_| {
                    BuiltinError::invalid(format!("Unknown key option: '{}'", value))
                })?;
                key_ref = Some(key);
            } else {
                return Err(BuiltinError::invalid(format!("Unknown option: '{}'", option)));
            }
        }

        if key_ref.is_some() && fscrypt_action.unwrap_or_default() == FscryptAction::None {
            return Err(BuiltinError::invalid(
                "Key option set but encryption action is none",
            ));
        }
        let is_top_level_data = target
            .strip_prefix(DATA_PREFIX)
            .is_some_and(|rest| !rest.contains('/'));
        if is_top_level_data {
            match fscrypt_action {
                None => log::warn!(
                    "Top-level directory needs encryption action, eg mkdir {} <mode> <uid> <gid> encryption=Require",
                    target
                ),
                Some(FscryptAction::None) => {
                    log::info!("Not setting encryption policy on: {}", target)
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            target,
            mode,
            uid,
            gid,
            fscrypt_action: fscrypt_action.unwrap_or_default(),
            key_ref: key_ref.unwrap_or_default(),
        })
    }
}

/// Create a directory, or bring an existing one to the requested mode and
/// ownership. Running it twice yields the same end state.
pub fn mkdir(options: &MkdirOptions) -> Result<()> {
    let target = Path::new(&options.target);
    let meta = match fs::symlink_metadata(target) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            DirBuilder::new()
                .mode(options.mode)
                .create(target)
                .map_err(|e| BuiltinError::io(format!("mkdir() failed on {}", options.target), e))?;
            fs::symlink_metadata(target).map_err(|e| {
                BuiltinError::io(format!("lstat() failed on new {}", options.target), e)
            })?
        }
        Err(e) => {
            return Err(BuiltinError::io(format!("lstat() failed on {}", options.target), e));
        }
    };

    if !meta.is_dir() {
        return Err(BuiltinError::general(format!(
            "Not a directory on {}",
            options.target
        )));
    }

    let mut needs_chmod = meta.mode() & 0o7777 != options.mode;
    let uid_differs = options.uid.is_some_and(|uid| uid != meta.uid());
    let gid_differs = options.gid.is_some_and(|gid| gid != meta.gid());
    if uid_differs || gid_differs {
        std::os::unix::fs::lchown(target, options.uid, options.gid)
            .map_err(|e| BuiltinError::io(format!("lchown failed on {}", options.target), e))?;
        // chown may clear the set-id bits
        needs_chmod = true;
    }
    if needs_chmod {
        fs::set_permissions(target, Permissions::from_mode(options.mode))
            .map_err(|e| BuiltinError::io(format!("chmod() failed on {}", options.target), e))?;
    }
    Ok(())
}

/// Create `path` with `mode`, treating an existing entry as success
pub fn make_dir_if_missing(path: &Path, mode: u32) -> Result<()> {
    match DirBuilder::new().mode(mode).create(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(BuiltinError::io(format!("Failed to create {}", path.display()), e)),
    }
}

// ============================================================================
// Permissions, links and files
// ============================================================================

pub fn chmod(mode: &str, path: &str) -> Result<()> {
    let mode = parse_mode(mode)?;
    fs::set_permissions(path, Permissions::from_mode(mode))
        .map_err(|e| BuiltinError::io("chmod() failed", e))
}

/// `chown <owner> [<group>] <path>`
pub fn chown(params: &[String]) -> Result<()> {
    let (owner, group, path) = match params {
        [owner, path] => (owner, None, path),
        [owner, group, path] => (owner, Some(group), path),
        _ => return Err(BuiltinError::invalid("chown expects owner [group] path")),
    };
    let uid = decode_uid(owner)?;
    let gid = group.map(|g| decode_gid(g)).transpose()?;
    std::os::unix::fs::lchown(path, Some(uid), gid)
        .map_err(|e| BuiltinError::io("lchown() failed", e))
}

pub fn symlink(target: &str, link: &str) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| BuiltinError::io("symlink() failed", e))
}

pub fn rm(path: &str) -> Result<()> {
    fs::remove_file(path).map_err(|e| BuiltinError::io("unlink() failed", e))
}

pub fn rmdir(path: &str) -> Result<()> {
    fs::remove_dir(path).map_err(|e| BuiltinError::io("rmdir() failed", e))
}

/// Truncate and write `content` without following a final symlink.
/// New files are created 0600.
pub fn write_file(path: &str, content: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .custom_flags(nix::libc::O_NOFOLLOW)
        .open(path)?;
    file.write_all(content)
}

pub fn write(path: &str, content: &str) -> Result<()> {
    write_file(path, content.as_bytes())
        .map_err(|e| BuiltinError::io(format!("Unable to write to file '{}'", path), e))
}

pub fn copy(from: &str, to: &str) -> Result<()> {
    let content = fs::read(from)
        .map_err(|e| BuiltinError::io(format!("Could not read input file '{}'", from), e))?;
    write_file(to, &content)
        .map_err(|e| BuiltinError::io(format!("Could not write to output file '{}'", to), e))
}

/// Write a kernel tunable such as `/proc/sys/kernel/hostname`
pub fn write_kernel_value(path: &str, value: &str) -> Result<()> {
    fs::write(path, value).map_err(|e| BuiltinError::io(format!("Unable to write to {}", path), e))
}

/// Poll until `path` exists or `timeout` elapses
pub fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if path.exists() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// `wait <path> [timeout-seconds]`
pub fn wait(path: &str, timeout: Option<&str>) -> Result<()> {
    let timeout = match timeout {
        Some(secs) => Duration::from_secs(
            secs.parse::<u64>()
                .map_err(|_| BuiltinError::invalid("failed to parse timeout"))?,
        ),
        None => COMMAND_RETRY_TIMEOUT,
    };
    if wait_for_file(Path::new(path), timeout) {
        Ok(())
    } else {
        Err(BuiltinError::general("wait_for_file() failed"))
    }
}

// ============================================================================
// mount / umount
// ============================================================================

/// Flag words accepted by `mount`
const MOUNT_FLAGS: &[(&str, MsFlags)] = &[
    ("noatime", MsFlags::MS_NOATIME),
    ("noexec", MsFlags::MS_NOEXEC),
    ("nosuid", MsFlags::MS_NOSUID),
    ("nodev", MsFlags::MS_NODEV),
    ("nodiratime", MsFlags::MS_NODIRATIME),
    ("ro", MsFlags::MS_RDONLY),
    ("rw", MsFlags::empty()),
    ("remount", MsFlags::MS_REMOUNT),
    ("bind", MsFlags::MS_BIND),
    ("rec", MsFlags::MS_REC),
    ("unbindable", MsFlags::MS_UNBINDABLE),
    ("private", MsFlags::MS_PRIVATE),
    ("slave", MsFlags::MS_SLAVE),
    ("shared", MsFlags::MS_SHARED),
    ("defaults", MsFlags::empty()),
];

/// `mount <type> <device> <path> [<flag>...] [wait] [<options>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub fs_type: String,
    pub source: String,
    pub target: String,
    pub flags: MsFlags,
    pub wait: bool,
    /// A trailing word that is neither a flag nor `wait`
    pub options: Option<String>,
}

impl MountRequest {
    pub fn parse(params: &[String]) -> Result<Self> {
        let [fs_type, source, target, rest @ ..] = params else {
            return Err(BuiltinError::invalid("mount expects type, device and path"));
        };
        if source.starts_with("loop@") {
            return Err(BuiltinError::invalid(format!(
                "loop device sources are not supported: {}",
                source
            )));
        }

        let mut flags = MsFlags::empty();
        let mut wait = false;
        let mut options = None;
        for (idx, word) in rest.iter().enumerate() {
            if let Some((_, flag)) = MOUNT_FLAGS.iter().find(|(name, _)| *name == word.as_str()) {
                flags |= *flag;
            } else if word == "wait" {
                wait = true;
            } else if idx + 1 == rest.len() {
                options = Some(word.clone());
            }
        }

        Ok(Self {
            fs_type: fs_type.clone(),
            source: source.clone(),
            target: target.clone(),
            flags,
            wait,
            options,
        })
    }
}

pub fn mount(request: &MountRequest) -> Result<()> {
    if request.wait {
        wait_for_file(Path::new(&request.source), COMMAND_RETRY_TIMEOUT);
    }
    nix::mount::mount(
        Some(request.source.as_str()),
        request.target.as_str(),
        Some(request.fs_type.as_str()),
        request.flags,
        request.options.as_deref(),
    )
    .map_err(|e| BuiltinError::errno("mount() failed", e))
}

pub fn umount(path: &str) -> Result<()> {
    nix::mount::umount2(path, MntFlags::empty())
        .map_err(|e| BuiltinError::errno("umount() failed", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(w: &[&str]) -> Vec<String> {
        w.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("0700").unwrap(), 0o700);
        assert_eq!(parse_mode("2750").unwrap(), 0o2750);
        assert!(parse_mode("0999").is_err());
        assert!(parse_mode("77777").is_err());
    }

    #[test]
    fn test_mkdir_creates_with_mode_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("foo");
        let options =
            MkdirOptions::parse(&words(&[target.to_str().unwrap(), "0700"])).expect("parse");

        mkdir(&options).expect("first mkdir");
        let meta = fs::metadata(&target).unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.mode() & 0o7777, 0o700);

        mkdir(&options).expect("second mkdir");
        let meta = fs::metadata(&target).unwrap();
        assert_eq!(meta.mode() & 0o7777, 0o700);
    }

    #[test]
    fn test_mkdir_fixes_existing_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("bar");
        fs::create_dir(&target).unwrap();
        fs::set_permissions(&target, Permissions::from_mode(0o777)).unwrap();

        let options =
            MkdirOptions::parse(&words(&[target.to_str().unwrap(), "0750"])).expect("parse");
        mkdir(&options).expect("mkdir");
        assert_eq!(fs::metadata(&target).unwrap().mode() & 0o7777, 0o750);
    }

    #[test]
    fn test_mkdir_rejects_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("file");
        fs::write(&target, b"x").unwrap();
        let options = MkdirOptions::parse(&words(&[target.to_str().unwrap()])).expect("parse");
        assert!(mkdir(&options).unwrap_err().to_string().starts_with("Not a directory"));
    }

    #[test]
    fn test_mkdir_missing_parent_is_enoent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("missing/child");
        let options = MkdirOptions::parse(&words(&[target.to_str().unwrap()])).expect("parse");
        assert!(mkdir(&options).unwrap_err().is_enoent());
    }

    #[test]
    fn test_mkdir_numeric_owner_parses() {
        let options = MkdirOptions::parse(&words(&["/data/x", "0771", "1000", "1000"])).unwrap();
        assert_eq!(options.uid, Some(1000));
        assert_eq!(options.gid, Some(1000));
        assert_eq!(options.mode, 0o771);
        assert_eq!(options.fscrypt_action, FscryptAction::None);
        assert_eq!(options.key_ref, KeyRef::Ref);
    }

    #[test]
    fn test_mkdir_encryption_options() {
        let base = ["/data/vendor", "0771", "1000", "1000"];
        let parse = |extra: &[&str]| {
            let all: Vec<&str> = base.iter().chain(extra).copied().collect();
            MkdirOptions::parse(&words(&all))
        };

        let options = parse(&["encryption=DeleteIfNecessary", "key=per_boot_ref"]).unwrap();
        assert_eq!(options.fscrypt_action, FscryptAction::DeleteIfNecessary);
        assert_eq!(options.key_ref, KeyRef::PerBootRef);

        let options = parse(&["key=ref", "encryption=Require"]).unwrap();
        assert_eq!(options.fscrypt_action, FscryptAction::Require);

        for (extra, message) in [
            (&["encryption=Sometimes"][..], "Unknown encryption option: 'Sometimes'"),
            (&["key=device"][..], "Unknown key option: 'device'"),
            (&["key=ref"][..], "Key option set but encryption action is none"),
            (&["encryption=None", "key=ref"][..], "Key option set but encryption action is none"),
            (&["encryption=Require", "encryption=None"][..], "Duplicated option: 'encryption'"),
            (&["mode=0700"][..], "Unknown option: 'mode=0700'"),
        ] {
            let err = parse(extra).unwrap_err();
            assert_eq!(err.to_string(), format!("Invalid argument: {}", message));
        }
    }

    #[test]
    fn test_write_copy_and_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");

        write(src.to_str().unwrap(), "hello").expect("write");
        assert_eq!(fs::metadata(&src).unwrap().mode() & 0o777, 0o600);
        copy(src.to_str().unwrap(), dst.to_str().unwrap()).expect("copy");
        assert_eq!(fs::read_to_string(&dst).unwrap(), "hello");

        rm(dst.to_str().unwrap()).expect("rm");
        assert!(!dst.exists());
        assert!(rm(dst.to_str().unwrap()).unwrap_err().is_enoent());
    }

    #[test]
    fn test_write_does_not_follow_symlink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let real = dir.path().join("real");
        let link = dir.path().join("link");
        fs::write(&real, b"orig").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        assert!(write(link.to_str().unwrap(), "new").is_err());
        assert_eq!(fs::read_to_string(&real).unwrap(), "orig");
    }

    #[test]
    fn test_symlink_and_rmdir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let link = dir.path().join("sdcard");
        symlink("/storage/self/primary", link.to_str().unwrap()).expect("symlink");
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("/storage/self/primary"));

        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        rmdir(sub.to_str().unwrap()).expect("rmdir");
        assert!(!sub.exists());
    }

    #[test]
    fn test_chmod() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        chmod("0640", file.to_str().unwrap()).expect("chmod");
        assert_eq!(fs::metadata(&file).unwrap().mode() & 0o777, 0o640);
        assert!(chmod("0640", "/nonexistent/file").unwrap_err().is_enoent());
    }

    #[test]
    fn test_wait() {
        let dir = tempfile::tempdir().expect("tempdir");
        wait(dir.path().to_str().unwrap(), Some("1")).expect("existing path");
        assert!(wait("/nonexistent/dev/block", Some("0")).is_err());
        assert!(wait("/tmp", Some("soon")).is_err());
    }

    #[test]
    fn test_parse_mount_request() {
        let req = MountRequest::parse(&words(&[
            "tmpfs", "tmpfs", "/mnt", "nosuid", "nodev", "wait", "mode=0755,uid=0",
        ]))
        .expect("parse");
        assert_eq!(req.flags, MsFlags::MS_NOSUID | MsFlags::MS_NODEV);
        assert!(req.wait);
        assert_eq!(req.options.as_deref(), Some("mode=0755,uid=0"));

        let req = MountRequest::parse(&words(&["ext4", "/dev/block/vdb", "/vendor", "ro"]))
            .expect("parse");
        assert_eq!(req.flags, MsFlags::MS_RDONLY);
        assert_eq!(req.options, None);
    }

    #[test]
    fn test_loop_sources_rejected() {
        let err = MountRequest::parse(&words(&["ext4", "loop@/data/img", "/mnt"])).unwrap_err();
        assert!(matches!(err, BuiltinError::InvalidArgument(_)));
    }
}
