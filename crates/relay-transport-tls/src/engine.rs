use std::io::{self, Write};

use relay_core::ByteRegion;
use rustls::{
    ClientConnection, Connection, ProtocolVersion, ServerConnection, pki_types::ServerName,
};

use crate::{
    TlsNodeConfig,
    config::TlsCredentials,
    error::{HANDSHAKE, READ, TlsError, WRITE},
};

/// 单条连接的 rustls 状态机，外加按字节区域组织的读写入口。
///
/// 所有方法都只操作引擎自身与调用方传入的区域，从不回调邻居，
/// 调用方可以放心地在持有引擎锁时调用。
pub(crate) struct TlsEngine {
    conn: Connection,
}

/// 一次 [`TlsEngine::absorb`] 的结果。
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Absorbed {
    /// 从密文区域头部消费的字节数。
    pub(crate) consumed: usize,
    /// 追加进明文区域的字节数。
    pub(crate) decrypted: usize,
    /// 对端发送了 `close_notify`，且其之前的明文已全部取出。
    pub(crate) peer_closed: bool,
    pub(crate) handshaking: bool,
}

impl Absorbed {
    pub(crate) fn progressed(&self) -> bool {
        self.consumed > 0 || self.decrypted > 0
    }
}

impl TlsEngine {
    pub(crate) fn new(config: &TlsNodeConfig) -> Result<Self, TlsError> {
        let conn = match &config.credentials {
            TlsCredentials::Server(server) => Connection::Server(
                ServerConnection::new(server.clone())
                    .map_err(|err| TlsError::engine(HANDSHAKE, err))?,
            ),
            TlsCredentials::Client(client) => {
                let name = config.server_name.clone().unwrap_or_default();
                let server_name = ServerName::try_from(name.clone())
                    .map_err(|_| TlsError::ServerName(name))?;
                Connection::Client(
                    ClientConnection::new(client.clone(), server_name)
                        .map_err(|err| TlsError::engine(HANDSHAKE, err))?,
                )
            }
        };
        Ok(Self { conn })
    }

    pub(crate) fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    pub(crate) fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    pub(crate) fn wants_read(&self) -> bool {
        self.conn.wants_read()
    }

    pub(crate) fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// 吸收一批密文并尽量取出解密后的明文。
    ///
    /// 只有引擎愿意接收时才读入密文；引擎内仍有未取出的明文时它会拒绝，
    /// 调用方需要先腾出明文区域再重试。
    pub(crate) fn absorb(
        &mut self,
        ciphertext: &mut ByteRegion,
        plaintext: &mut ByteRegion,
    ) -> Result<Absorbed, TlsError> {
        let operation = if self.conn.is_handshaking() { HANDSHAKE } else { READ };
        let mut step = Absorbed::default();

        if !ciphertext.is_empty() && self.conn.wants_read() {
            let mut records = ciphertext.as_slice();
            step.consumed = self
                .conn
                .read_tls(&mut records)
                .map_err(|err| TlsError::io(operation, err))?;
            ciphertext.consume(step.consumed);
        }
        let io_state = self
            .conn
            .process_new_packets()
            .map_err(|err| TlsError::engine(operation, err))?;

        if io_state.plaintext_bytes_to_read() > 0 || io_state.peer_has_closed() {
            let mut reader = self.conn.reader();
            while plaintext.has_room() {
                match plaintext.read_from(&mut reader) {
                    Ok(0) => {
                        step.peer_closed = true;
                        break;
                    }
                    Ok(read) => step.decrypted += read,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => return Err(TlsError::io(READ, err)),
                }
            }
        }
        step.handshaking = self.conn.is_handshaking();
        Ok(step)
    }

    /// 接收暂存区中的明文，返回被引擎接受的字节数。握手期间写入的明文由引擎缓存，握手完成后发出。
    pub(crate) fn accept_plaintext(&mut self, staging: &mut ByteRegion) -> Result<usize, TlsError> {
        if staging.is_empty() {
            return Ok(0);
        }
        let accepted = self
            .conn
            .writer()
            .write(staging.as_slice())
            .map_err(|err| TlsError::io(WRITE, err))?;
        staging.consume(accepted);
        Ok(accepted)
    }

    /// 把待发记录写入出站区域，直到区域写满或引擎无记录可写。
    pub(crate) fn seal(&mut self, ciphertext: &mut ByteRegion) -> Result<usize, TlsError> {
        let mut sealed = 0;
        while self.conn.wants_write() && ciphertext.has_room() {
            let written = self
                .conn
                .write_tls(ciphertext)
                .map_err(|err| TlsError::io(WRITE, err))?;
            if written == 0 {
                break;
            }
            sealed += written;
        }
        Ok(sealed)
    }

    pub(crate) fn send_close_notify(&mut self) {
        self.conn.send_close_notify();
    }
}

#[cfg(test)]
mod tests {
    use rcgen::CertifiedKey;
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};

    use super::*;

    fn pair() -> (TlsEngine, TlsEngine) {
        let CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["relay.test".to_owned()]).expect("certificate");
        let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        let server = TlsCredentials::server(vec![cert.der().clone()], key).expect("server");
        let client = TlsCredentials::client([cert.der().clone()]).expect("client");

        let server = TlsEngine::new(&TlsNodeConfig::new(server)).expect("server engine");
        let client = TlsEngine::new(&TlsNodeConfig::new(client).with_server_name("relay.test"))
            .expect("client engine");
        (server, client)
    }

    /// 把 `from` 的待发记录交给 `to`，解出的明文追加到 `sink`；返回是否搬运了记录。
    fn pass(from: &mut TlsEngine, to: &mut TlsEngine, sink: &mut Vec<u8>) -> bool {
        let mut wire = ByteRegion::with_capacity(64 * 1024);
        if from.seal(&mut wire).expect("seal") == 0 {
            return false;
        }
        let mut plaintext = ByteRegion::with_capacity(64 * 1024);
        loop {
            let step = to.absorb(&mut wire, &mut plaintext).expect("absorb");
            sink.extend_from_slice(&plaintext.take_all());
            if !step.progressed() {
                return true;
            }
        }
    }

    fn shuttle(a: &mut TlsEngine, b: &mut TlsEngine, sink_a: &mut Vec<u8>, sink_b: &mut Vec<u8>) {
        for _ in 0..32 {
            let forward = pass(a, b, sink_b);
            let backward = pass(b, a, sink_a);
            if !forward && !backward {
                return;
            }
        }
    }

    #[test]
    fn engines_complete_a_handshake_through_regions() {
        let (mut server, mut client) = pair();
        assert!(client.wants_write(), "client speaks first");
        assert!(server.is_handshaking());

        let (mut to_client, mut to_server) = (Vec::new(), Vec::new());
        shuttle(&mut client, &mut server, &mut to_client, &mut to_server);
        assert!(!client.is_handshaking());
        assert!(!server.is_handshaking());
        assert!(client.protocol_version().is_some());

        let mut staging = ByteRegion::with_capacity(64);
        staging.put_slice(b"sealed payload");
        assert_eq!(client.accept_plaintext(&mut staging).expect("accept"), 14);
        assert!(staging.is_empty());
        shuttle(&mut client, &mut server, &mut to_client, &mut to_server);
        assert_eq!(to_server, b"sealed payload");
        assert!(to_client.is_empty());
    }

    #[test]
    fn close_notify_is_reported_once_plaintext_is_drained() {
        let (mut server, mut client) = pair();
        let (mut to_client, mut to_server) = (Vec::new(), Vec::new());
        shuttle(&mut client, &mut server, &mut to_client, &mut to_server);

        client.send_close_notify();
        let mut wire = ByteRegion::with_capacity(4096);
        client.seal(&mut wire).expect("seal");
        let mut plaintext = ByteRegion::with_capacity(64);
        let step = server.absorb(&mut wire, &mut plaintext).expect("absorb");
        assert!(step.peer_closed);
        assert!(wire.is_empty());
    }

    #[test]
    fn garbage_records_fail_the_handshake() {
        let (mut server, _client) = pair();
        let mut wire = ByteRegion::with_capacity(64);
        wire.put_slice(&[0x16, 0x03, 0x01, 0x00, 0x05, 0xde, 0xad, 0xbe, 0xef, 0x00]);
        let mut plaintext = ByteRegion::with_capacity(64);
        let err = server.absorb(&mut wire, &mut plaintext).err().expect("rejected");
        assert_eq!(err.code(), "relay.transport.tls.handshake_failed");
    }
}
