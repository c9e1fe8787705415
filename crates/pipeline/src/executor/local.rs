use crate::output::{OutputSink, Stream};
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Name of the variable holding the path of the per-command export file.
pub const ENV_FILE_VAR: &str = "DECKHAND_ENV";

async fn pump<R: AsyncRead + Unpin>(
    reader: Option<R>,
    source: &str,
    stream: Stream,
    sink: &dyn OutputSink,
) {
    let Some(reader) = reader else { return };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink.line(source, stream, &line);
    }
}

pub(super) struct LocalCommand<'a> {
    pub shell: &'a str,
    pub command: &'a str,
    pub workdir: &'a Path,
    pub env: &'a [(String, String)],
    pub env_file: &'a Path,
    pub source: &'a str,
}

/// Runs one command through `<shell> -c` and returns its exit code.
///
/// The child is killed when the returned future is dropped.
pub(super) async fn run(cmd: LocalCommand<'_>, sink: &dyn OutputSink) -> io::Result<i32> {
    let mut child = Command::new(cmd.shell)
        .arg("-c")
        .arg(cmd.command)
        .current_dir(cmd.workdir)
        .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .env(ENV_FILE_VAR, cmd.env_file)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (_, _, status) = tokio::join!(
        pump(stdout, cmd.source, Stream::Stdout, sink),
        pump(stderr, cmd.source, Stream::Stderr, sink),
        child.wait(),
    );
    Ok(status?.code().unwrap_or(-1))
}
