//! Blocking framed IO: every message is a u64 big-endian payload length
//! followed by a bincode payload.
use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

pub fn read_payload_len(stream: &mut TcpStream) -> Result<u64> {
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

pub fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let payload_len = read_payload_len(stream)? as usize;
    let mut buf = vec![0u8; payload_len];
    stream.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
    let len_buf = (payload.len() as u64).to_be_bytes();
    stream.write_all(&len_buf)?;
    stream.write_all(payload)?;
    Ok(())
}

pub fn recv_cmd<T: DeserializeOwned>(stream: &mut TcpStream) -> Result<T> {
    let buf = read_frame(stream)?;
    let cmd = bincode::deserialize(&buf)?;
    Ok(cmd)
}

pub fn send_cmd(stream: &mut TcpStream, cmd: &impl Serialize) -> Result<()> {
    let buf = bincode::serialize(cmd)?;
    write_frame(stream, &buf)
}

/// Bind a listener on an OS-assigned port and report the port.
pub fn bind_avail_port() -> Result<(TcpListener, u16)> {
    let listener = TcpListener::bind(("0.0.0.0", 0))?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// Time left until `deadline`, or `Timeout` if it already passed.
pub fn remaining(deadline: Instant, phase: &'static str) -> Result<Duration> {
    match deadline.checked_duration_since(Instant::now()) {
        Some(d) if !d.is_zero() => Ok(d),
        _ => Err(Error::Timeout(phase)),
    }
}

/// Dial `uri`, retrying with exponential backoff until `deadline`.
pub fn connect_retry(uri: &str, deadline: Instant) -> Result<TcpStream> {
    let mut sleep_time = Duration::from_millis(5);
    loop {
        match TcpStream::connect(uri) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                if Instant::now() + sleep_time >= deadline {
                    log::error!("failed to connect to {}: {}", uri, e);
                    return Err(Error::Timeout("connecting to a peer"));
                }
                std::thread::sleep(sleep_time);
                sleep_time *= 2;
            }
        }
    }
}
