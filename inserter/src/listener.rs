use crate::config::ListenSource;
use std::io;
use tokio::net::TcpListener;

/// Opens the socket the gateway accepts connections on.
pub async fn acquire(source: &ListenSource) -> io::Result<TcpListener> {
    match source {
        ListenSource::Port(port) => {
            tracing::info!(port, "listening on TCP port");
            TcpListener::bind(("0.0.0.0", *port)).await
        }
        ListenSource::Fd(fd) => {
            tracing::info!(fd, "listening on inherited file descriptor");
            from_fd(*fd)
        }
    }
}

#[cfg(unix)]
fn from_fd(fd: i32) -> io::Result<TcpListener> {
    use std::os::fd::FromRawFd;

    if fd < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid file descriptor {fd}"),
        ));
    }

    // SAFETY: the descriptor was handed to this process to listen on and nothing
    // else in the process owns it.
    let listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

#[cfg(not(unix))]
fn from_fd(_fd: i32) -> io::Result<TcpListener> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "listening on a file descriptor requires a unix platform",
    ))
}
