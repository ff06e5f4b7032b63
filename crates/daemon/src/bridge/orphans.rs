//! Detection and cleanup of bridge processes left over from a previous run.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use super::supervisor::terminate;

/// Basename of a program path or name.
fn basename(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(program)
}

/// Pids whose command line runs `program`, excluding this process.
///
/// Matches on the basename of `argv[0]`, so `/usr/bin/ttyd` and `ttyd`
/// are the same program. Reads `/proc`; returns nothing where it is absent.
pub fn find_processes(program: &str) -> Vec<u32> {
    let wanted = basename(program);
    let own_pid = std::process::id();

    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut pids: Vec<u32> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|&pid| pid != own_pid)
        .filter(|pid| {
            // Processes can vanish mid-scan; unreadable cmdlines are skipped.
            let Ok(cmdline) = fs::read(format!("/proc/{pid}/cmdline")) else {
                return false;
            };
            let argv0 = cmdline.split(|&b| b == 0).next().unwrap_or_default();
            std::str::from_utf8(argv0)
                .map(|arg| basename(arg) == wanted)
                .unwrap_or(false)
        })
        .collect();
    pids.sort_unstable();
    pids
}

/// Terminate every process running `program` whose pid is not in `keep`.
///
/// Returns how many processes were signalled.
pub fn sweep_orphans(program: &str, keep: &HashSet<u32>) -> usize {
    let mut killed = 0;
    for pid in find_processes(program) {
        if keep.contains(&pid) {
            continue;
        }
        if terminate(pid) {
            tracing::info!(pid, program, "terminated orphaned bridge");
            killed += 1;
        }
    }
    killed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{await_process, ChildGuard};
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};

    /// A `sleep` child whose argv[0] is a name no other process uses.
    fn spawn_disguised(name: &str) -> ChildGuard {
        let child = Command::new("sleep")
            .arg0(name)
            .arg("60")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let child = ChildGuard::new(child);
        assert!(await_process(name, child.id()), "{name} never showed up");
        child
    }

    fn unique_name(tag: &str) -> String {
        format!("td-orphan-{}-{}", tag, std::process::id())
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/usr/bin/ttyd"), "ttyd");
        assert_eq!(basename("ttyd"), "ttyd");
    }

    #[test]
    fn test_find_processes_none() {
        assert!(find_processes(&unique_name("absent")).is_empty());
    }

    #[test]
    fn test_sweep_kills_untracked() {
        let name = unique_name("sweep");
        let mut child = spawn_disguised(&name);

        assert_eq!(find_processes(&name), vec![child.id()]);
        // A full path to the same program matches too
        assert_eq!(find_processes(&format!("/opt/bin/{name}")), vec![child.id()]);

        assert_eq!(sweep_orphans(&name, &HashSet::new()), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        let status = loop {
            if let Some(status) = child.try_wait().unwrap() {
                break status;
            }
            assert!(Instant::now() < deadline, "orphan survived the sweep");
            std::thread::sleep(Duration::from_millis(10));
        };
        assert!(!status.success());
        assert!(find_processes(&name).is_empty());
    }

    #[test]
    fn test_sweep_spares_kept_pids() {
        let name = unique_name("keep");
        let mut child = spawn_disguised(&name);
        let keep: HashSet<u32> = [child.id()].into_iter().collect();

        assert_eq!(sweep_orphans(&name, &keep), 0);
        assert!(child.try_wait().unwrap().is_none());
    }
}
