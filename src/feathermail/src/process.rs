/*
 * FeatherMail SMTP server framework
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

/// Path of the pid file under the configuration folder.
#[must_use]
pub fn pid_file_path() -> std::path::PathBuf {
    feather_config::config_folder().join("feathermail.pid")
}

/// Detach from the controlling terminal, `daemon(3)` style.
///
/// # Errors
///
/// * the underlying libc call failed
#[allow(unsafe_code)]
pub fn daemon(nochdir: bool, noclose: bool) -> anyhow::Result<()> {
    // SAFETY: daemon(3) touches no rust-managed state; the single-threaded
    // call happens before the runtime starts
    match unsafe { libc::daemon(i32::from(nochdir), i32::from(noclose)) } {
        0 => Ok(()),
        _ => Err(anyhow::anyhow!(
            "daemon failed: {}",
            std::io::Error::last_os_error()
        )),
    }
}

/// Record our pid for the `stop` subcommand.
///
/// # Errors
///
/// * the pid file is not writable
pub fn write_pid_file() -> anyhow::Result<()> {
    let path = pid_file_path();
    std::fs::write(&path, std::process::id().to_string())
        .map_err(|e| anyhow::anyhow!("cannot write pid file '{}': {e}", path.display()))
}

/// Drop the pid file; a missing one is fine.
pub fn remove_pid_file() {
    let _ignored = std::fs::remove_file(pid_file_path());
}

/// Send SIGTERM to the daemon recorded in the pid file.
///
/// # Errors
///
/// * no pid file, an unreadable one, or the signal was refused
#[allow(unsafe_code)]
pub fn stop_daemon() -> anyhow::Result<()> {
    let path = pid_file_path();
    let pid = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("cannot read pid file '{}': {e}", path.display()))?
        .trim()
        .parse::<i32>()
        .map_err(|e| anyhow::anyhow!("pid file '{}' is corrupted: {e}", path.display()))?;

    // SAFETY: kill(2) with a plain SIGTERM
    match unsafe { libc::kill(pid, libc::SIGTERM) } {
        0 => {
            remove_pid_file();
            Ok(())
        }
        _ => Err(anyhow::anyhow!(
            "cannot stop pid {pid}: {}",
            std::io::Error::last_os_error()
        )),
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    // one test only: the config folder override is process-wide
    #[test]
    fn pid_file_round_trip() {
        let folder = std::env::temp_dir().join(format!("feather-pid-{}", std::process::id()));
        std::fs::create_dir_all(&folder).unwrap();
        std::env::set_var(feather_config::ENV_CONFIG_FOLDER, &folder);

        assert!(stop_daemon().is_err(), "no pid file yet");

        write_pid_file().unwrap();
        let content = std::fs::read_to_string(pid_file_path()).unwrap();
        assert_eq!(content, std::process::id().to_string());

        remove_pid_file();
        assert!(!pid_file_path().exists());

        std::env::remove_var(feather_config::ENV_CONFIG_FOLDER);
        std::fs::remove_dir_all(&folder).unwrap();
    }
}
