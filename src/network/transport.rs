use libp2p::core::muxing::StreamMuxerBox;
use libp2p::core::transport::Boxed;
use libp2p::core::upgrade::Version;
use libp2p::{PeerId, Transport, dns, identity, noise, tcp, yamux};

use crate::error::{ChatError, ChatResult};

/// TCP links, resolved through the system DNS, secured with noise and
/// multiplexed with yamux.
pub fn build_transport(
    local_key: &identity::Keypair,
) -> ChatResult<Boxed<(PeerId, StreamMuxerBox)>> {
    let noise_config =
        noise::Config::new(local_key).map_err(|err| ChatError::Link(format!("noise: {err}")))?;

    let tcp_transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
    let transport = dns::tokio::Transport::system(tcp_transport)
        .map_err(|err| ChatError::Link(format!("dns: {err}")))?
        .upgrade(Version::V1)
        .authenticate(noise_config)
        .multiplex(yamux::Config::default())
        .boxed();

    Ok(transport)
}
