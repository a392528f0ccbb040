//! §4.3 step 4: spawn the task command with the jobmon environment and
//! stdout/stderr redirected to the resolved log paths.

use std::path::Path;
use std::process::Stdio;

use tokio::fs::File;
use tokio::process::{Child, Command};

pub struct SpawnSpec<'a> {
    pub command: &'a str,
    pub workflow_id: i64,
    pub task_id: i64,
    pub task_instance_id: i64,
    pub stdout_path: &'a Path,
    pub stderr_path: &'a Path,
}

pub async fn spawn(spec: SpawnSpec<'_>) -> std::io::Result<Child> {
    let stdout = File::create(spec.stdout_path).await?.into_std().await;
    let stderr = File::create(spec.stderr_path).await?.into_std().await;

    Command::new("sh")
        .arg("-c")
        .arg(spec.command)
        .env("JOBMON_WORKFLOW_ID", spec.workflow_id.to_string())
        .env("JOBMON_TASK_ID", spec.task_id.to_string())
        .env("JOBMON_TASK_INSTANCE_ID", spec.task_instance_id.to_string())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
}

/// Truncate to the trailing `STDERR_TAIL_BYTES` bytes (§4.3, §8): the most
/// recent output is almost always the cause of a failure.
pub fn truncate_tail(bytes: &[u8], max_len: usize) -> Vec<u8> {
    if bytes.len() <= max_len {
        bytes.to_vec()
    } else {
        bytes[bytes.len() - max_len..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_untouched() {
        assert_eq!(truncate_tail(b"hello", 10), b"hello");
    }

    #[test]
    fn long_output_keeps_tail() {
        let data = vec![b'x'; 20];
        let truncated = truncate_tail(&data, 5);
        assert_eq!(truncated.len(), 5);
    }
}
