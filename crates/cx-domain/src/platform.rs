use std::env::consts;

const NON_X86_LINUX_MACHINES: &[&str] = &["armv6l", "armv7l", "ppc64le"];

/// Package subdirectory for the running platform, e.g. `linux-64`,
/// `osx-64`, `win-32` or `linux-armv7l`.
#[must_use]
pub fn current_subdir(force_32bit: bool) -> String {
    let bits = if force_32bit {
        32
    } else if cfg!(target_pointer_width = "64") {
        64
    } else {
        32
    };
    subdir_for(consts::OS, machine(), bits)
}

/// Subdir for an OS name (as reported by `std::env::consts::OS`), a machine
/// name and a pointer width.
#[must_use]
pub fn subdir_for(os: &str, machine: &str, bits: u8) -> String {
    let platform = match os {
        "linux" => "linux",
        "macos" => "osx",
        "windows" => "win",
        "openbsd" => "openbsd",
        _ => "unknown",
    };
    if platform == "linux" && NON_X86_LINUX_MACHINES.contains(&machine) {
        format!("linux-{machine}")
    } else {
        format!("{platform}-{bits}")
    }
}

fn machine() -> &'static str {
    match consts::ARCH {
        "arm" if cfg!(target_feature = "v7") => "armv7l",
        "arm" => "armv6l",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        other => other,
    }
}
