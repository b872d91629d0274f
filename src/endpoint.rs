//! Server endpoint: one UDP up-socket and one UDP down-socket
//! per configured server, with independent live/dead state.

use crate::config::ServerConf;
use crate::error::GatewayError;
use std::io;
use std::net::UdpSocket;
use std::time::Duration;

/// A connected pair of sockets to one server, or `None` if startup
/// resolution/connect failed — the endpoint then stays configured but dead
/// for the lifetime of the process.
pub struct Endpoint {
    pub name: String,
    sockets: Option<Sockets>,
}

struct Sockets {
    up: UdpSocket,
    down: UdpSocket,
}

impl Endpoint {
    /// Resolve and connect both sockets for `conf`. A DNS/socket-creation/
    /// connect failure (spec §7 "endpoint errors") just leaves the endpoint
    /// dead; a `set_read_timeout` failure on an already-connected socket
    /// (spec §6/§7 "socket-option failure on a live socket") is fatal and
    /// bubbles up instead.
    pub fn connect(conf: &ServerConf, push_timeout_half: Duration, pull_timeout: Duration) -> Result<Self, GatewayError> {
        let name = format!("{}:{}/{}", conf.server_address, conf.serv_port_up, conf.serv_port_down);

        if !conf.serv_enabled {
            return Ok(Self { name, sockets: None });
        }

        let up = match connect_socket(&conf.server_address, conf.serv_port_up) {
            Ok(s) => s,
            Err(e) => {
                log::warn!(target: "main", "endpoint {name} failed to connect up-socket: {e}");
                return Ok(Self { name, sockets: None });
            }
        };
        up.set_read_timeout(Some(push_timeout_half))
            .map_err(GatewayError::SocketOption)?;

        let down = match connect_socket(&conf.server_address, conf.serv_port_down) {
            Ok(s) => s,
            Err(e) => {
                log::warn!(target: "main", "endpoint {name} failed to connect down-socket: {e}");
                return Ok(Self { name, sockets: None });
            }
        };
        down.set_read_timeout(Some(pull_timeout))
            .map_err(GatewayError::SocketOption)?;

        Ok(Self { name, sockets: Some(Sockets { up, down }) })
    }

    pub fn is_live(&self) -> bool {
        self.sockets.is_some()
    }

    pub fn send_up(&self, datagram: &[u8]) -> io::Result<()> {
        let sockets = self.sockets.as_ref().ok_or_else(dead_endpoint)?;
        sockets.up.send(datagram)?;
        Ok(())
    }

    pub fn recv_up(&self, buf: &mut [u8]) -> io::Result<usize> {
        let sockets = self.sockets.as_ref().ok_or_else(dead_endpoint)?;
        sockets.up.recv(buf)
    }

    pub fn send_down(&self, datagram: &[u8]) -> io::Result<()> {
        let sockets = self.sockets.as_ref().ok_or_else(dead_endpoint)?;
        sockets.down.send(datagram)?;
        Ok(())
    }

    pub fn recv_down(&self, buf: &mut [u8]) -> io::Result<usize> {
        let sockets = self.sockets.as_ref().ok_or_else(dead_endpoint)?;
        sockets.down.recv(buf)
    }
}

fn dead_endpoint() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "endpoint is dead")
}

fn connect_socket(address: &str, port: u16) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect((address, port))?;
    Ok(socket)
}
