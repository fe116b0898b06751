//! 推送网关（legacy binary protocol）接入

pub mod codec;
pub mod tls;
pub mod transport;

pub use codec::{CodecError, ErrorFrame, ErrorStatus, decode_error, encode_notification};
pub use tls::TlsGatewayConnector;
pub use transport::{
    GatewayConnector, GatewayInput, GatewayStream, GatewayTransport, TransportError,
    TransportState,
};
