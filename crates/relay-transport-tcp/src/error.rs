use std::io;

use relay_core::{PipelineError, error::IoOperation};

pub(crate) const READ: IoOperation = IoOperation {
    code: "relay.transport.tcp.read_failed",
    name: "tcp read",
};
pub(crate) const WRITE: IoOperation = IoOperation {
    code: "relay.transport.tcp.write_failed",
    name: "tcp write",
};
pub(crate) const REGISTER: IoOperation = IoOperation {
    code: "relay.transport.tcp.register_failed",
    name: "tcp register",
};
pub(crate) const POLL: IoOperation = IoOperation {
    code: "relay.transport.tcp.poll_failed",
    name: "tcp poll",
};
pub(crate) const CONFIGURE: IoOperation = IoOperation {
    code: "relay.transport.tcp.configure_failed",
    name: "tcp configure",
};
pub(crate) const SPAWN: IoOperation = IoOperation {
    code: "relay.transport.tcp.spawn_failed",
    name: "reactor spawn",
};

pub(crate) fn map_io_error(operation: IoOperation, error: io::Error) -> PipelineError {
    PipelineError::transport(operation, error)
}
