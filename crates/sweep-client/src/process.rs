//! Subprocess bridge: spawn the sweeper and hand back the control socket.
//!
//! Two attachment modes exist. The default creates a connected Unix socket
//! pair and lets the child inherit the remote end; the alternative binds a
//! rendezvous socket in the temp directory, accepts exactly one connection,
//! and unlinks the path immediately after.

use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::SweepError;

const IO_SOCKET_FLAG: &str = "--io-socket";

fn command(program: &str, args: &[String]) -> Command {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    command
}

fn spawn(mut command: Command) -> Result<Child, SweepError> {
    let rendered = format!("{:?}", command.as_std());
    debug!("spawning sweep: {rendered}");
    command.spawn().map_err(|source| SweepError::Spawn {
        command: rendered,
        source,
    })
}

/// Spawn the sweeper connected through an inherited socket pair.
///
/// The remote end becomes the child's fd 0 and is advertised as
/// `--io-socket 0`; the local end is returned. The parent's copy of the
/// remote end is closed once the child is running.
pub(crate) fn spawn_pair_socket(
    program: &str,
    args: &[String],
) -> Result<(Child, UnixStream), SweepError> {
    let (local, remote) = StdUnixStream::pair()?;
    let mut command = command(program, args);
    command
        .arg(IO_SOCKET_FLAG)
        .arg("0")
        .stdin(Stdio::from(OwnedFd::from(remote)));
    let child = spawn(command)?;
    local.set_nonblocking(true)?;
    Ok((child, UnixStream::from_std(local)?))
}

/// Spawn the sweeper connected through an on-disk rendezvous socket.
///
/// The socket lives at `sweep-io-<pid>.socket` in the temp directory and is
/// unlinked as soon as the single expected connection is accepted.
pub(crate) async fn spawn_tmp_socket(
    program: &str,
    args: &[String],
) -> Result<(Child, UnixStream), SweepError> {
    let path = tmp_socket_path();
    if path.exists() {
        let _ = std::fs::remove_file(&path);
    }
    let listener = UnixListener::bind(&path)?;
    let mut command = command(program, args);
    command.arg(IO_SOCKET_FLAG).arg(&path);
    let child = spawn(command)?;
    let accepted = listener.accept().await;
    let _ = std::fs::remove_file(&path);
    let (stream, _addr) = accepted?;
    Ok((child, stream))
}

fn tmp_socket_path() -> PathBuf {
    std::env::temp_dir().join(format!("sweep-io-{}.socket", std::process::id()))
}
