pub mod loopback;

use std::net::SocketAddr;

pub fn test_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}
