//! Access to a node from other processes, through request / response datagrams on Unix
//!  domain sockets.
//!
//! Requests:
//! ```ascii
//! 0: kind (u8): 1 open, 2 bind, 3 send, 4 receive, 5 close
//! 1: request id (u32)
//! 5: owner (u32) - the client's process id
//! 9: body, depending on the kind
//! ```
//!
//! Responses:
//! ```ascii
//! 0: request id (u32) of the request this responds to
//! 4: status (u8): 0-15 success, 16+ error kinds
//! 5: body, depending on the status
//! ```
//!
//! Connection ids are sent as u16, socket addresses as a kind byte (0 none, 4 IPV4, 6 IPV6)
//!  followed by IP and port, payloads with a varint length prefix.

pub mod client;
pub mod messages;
pub mod server;

pub const MAX_IPC_DATAGRAM_LEN: usize = 64 * 1024;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use crate::client::ConnectionApi;
    use crate::config::MtpConfig;
    use crate::control::ControlPlane;
    use crate::error::MtpError;
    use crate::ipc::client::IpcClient;
    use crate::ipc::server::IpcServer;
    use crate::table::ConnectionTable;
    use crate::test_util::loopback::LoopbackTransport;
    use crate::test_util::test_addr;

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mtp-test-{}-{}.sock", std::process::id(), name))
    }

    #[tokio::test]
    async fn test_client_server_round_trip() {
        let config = MtpConfig { table_size: 2, payload_size: 8, ..MtpConfig::default() };
        let table = Arc::new(ConnectionTable::new(&config, Arc::new(LoopbackTransport::default())));
        let (control_plane, control) = ControlPlane::new(table.clone());
        let server = IpcServer::bind(socket_path("rt-server"), control, table.clone()).unwrap();
        let client = IpcClient::connect(server.path(), socket_path("rt-client")).unwrap();

        let session = async {
            let id = client.open().await.unwrap();
            assert!(!table.is_free(id).await);

            client.bind(id, test_addr(1), test_addr(2)).await.unwrap();
            assert_eq!(client.bind(id, test_addr(1), test_addr(2)).await, Err(MtpError::AlreadyBound(id)));

            client.send(id, test_addr(2), b"hello").await.unwrap();
            assert_eq!(client.send(id, test_addr(3), b"hello").await, Err(MtpError::NotConnected { expected: Some(test_addr(2)), actual: test_addr(3) }));
            assert_eq!(client.send(id, test_addr(2), b"much too long").await, Err(MtpError::MessageTooLong { len: 13, max: 8 }));
            assert_eq!(client.receive(id).await, Err(MtpError::NoMessage));

            client.close(id).await.unwrap();
            assert!(table.is_free(id).await);
        };

        tokio::select! {
            _ = session => {}
            r = server.run() => panic!("server terminated: {:?}", r),
            r = control_plane.run() => panic!("control plane terminated: {:?}", r),
        }
    }

    #[tokio::test]
    async fn test_connections_are_owned_by_client_process() {
        let config = MtpConfig { table_size: 2, ..MtpConfig::default() };
        let table = Arc::new(ConnectionTable::new(&config, Arc::new(LoopbackTransport::default())));
        let (control_plane, control) = ControlPlane::new(table.clone());
        let server = IpcServer::bind(socket_path("owner-server"), control, table.clone()).unwrap();
        let client = IpcClient::connect(server.path(), socket_path("owner-client")).unwrap();
        assert_eq!(client.owner(), std::process::id());

        let session = async {
            let id = client.open().await.unwrap();
            client.bind(id, test_addr(1), test_addr(2)).await.unwrap();
            table.reclaim_dead_owners(&crate::liveness::ProcessLivenessProbe).await.unwrap()
        };

        tokio::select! {
            reclaimed = session => assert!(reclaimed.is_empty()),
            r = server.run() => panic!("server terminated: {:?}", r),
            r = control_plane.run() => panic!("control plane terminated: {:?}", r),
        }
    }
}
