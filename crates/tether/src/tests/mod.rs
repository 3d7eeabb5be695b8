use crate::duplex::StreamAdapter;
use crate::{port_pair, Channel};

mod channel;
mod http_bridge;
mod relay;

/// Two channels over an in-memory port pair (envelope mode).
fn port_channels() -> (Channel, Channel) {
    let (a, b) = port_pair();
    (Channel::new(a), Channel::new(b))
}

/// Two channels over a byte duplex pipe (text mode, newline framing).
fn byte_channels() -> (Channel, Channel) {
    let (one, two) = tokio::io::duplex(64 * 1024);
    let (read_one, write_one) = tokio::io::split(one);
    let (read_two, write_two) = tokio::io::split(two);
    (
        Channel::new(StreamAdapter::named("peer-a", read_one, write_one)),
        Channel::new(StreamAdapter::named("peer-b", read_two, write_two)),
    )
}
