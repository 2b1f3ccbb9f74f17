//! Handshake and message transport over a split duplex stream.

use rand::Rng;
use reef_types::PublicKey;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::crypto::FrameCipher;
use crate::error::NetError;
use crate::framing::{read_frame, write_frame};
use crate::message::{Hello, PROTOCOL, WireMessage};

/// Sending half of an established session.
pub(crate) struct MessageSender<W> {
    writer: W,
    cipher: Option<FrameCipher>,
}

impl<W: AsyncWrite + Unpin> MessageSender<W> {
    pub(crate) async fn send(&mut self, message: &WireMessage) -> Result<(), NetError> {
        let encoded = message.encode()?;
        let payload = match &mut self.cipher {
            Some(cipher) => cipher.seal(&encoded)?,
            None => encoded,
        };
        write_frame(&mut self.writer, &payload).await
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> W {
        self.writer
    }

    /// Signal end of stream to the peer.
    pub(crate) async fn shutdown(&mut self) -> Result<(), NetError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Receiving half of an established session.
pub(crate) struct MessageReceiver<R> {
    reader: R,
    cipher: Option<FrameCipher>,
}

impl<R: AsyncRead + Unpin> MessageReceiver<R> {
    /// Next message, or `None` once the peer closed the stream.
    pub(crate) async fn recv(&mut self) -> Result<Option<WireMessage>, NetError> {
        let Some(frame) = read_frame(&mut self.reader).await? else {
            return Ok(None);
        };
        let plain = match &mut self.cipher {
            Some(cipher) => cipher.open(&frame)?,
            None => frame,
        };
        WireMessage::decode(&plain)
            .map(Some)
            .map_err(|e| NetError::Protocol(format!("malformed message: {e}")))
    }
}

/// Exchange [`Hello`]s and set up encryption.
///
/// Both sides must name the same drive and agree on encryption.
pub(crate) async fn handshake<R, W>(
    mut reader: R,
    mut writer: W,
    key: &PublicKey,
    encrypt: bool,
) -> Result<(MessageReceiver<R>, MessageSender<W>), NetError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let nonce: [u8; 32] = rand::rng().random();
    let ours = Hello {
        protocol: PROTOCOL.to_string(),
        discovery_key: key.discovery_key(),
        nonce,
        encrypted: encrypt,
    };
    write_frame(&mut writer, &postcard::to_allocvec(&ours)?).await?;

    let frame = read_frame(&mut reader).await?.ok_or(NetError::Closed)?;
    let theirs: Hello = postcard::from_bytes(&frame)
        .map_err(|e| NetError::Protocol(format!("malformed hello: {e}")))?;

    if theirs.protocol != PROTOCOL {
        return Err(NetError::Protocol(format!(
            "unsupported protocol {:?}",
            theirs.protocol
        )));
    }
    if theirs.discovery_key != ours.discovery_key {
        return Err(NetError::Protocol(format!(
            "peer replicates {}, not {}",
            theirs.discovery_key, ours.discovery_key
        )));
    }
    if theirs.encrypted != encrypt {
        return Err(NetError::Protocol(format!(
            "encryption mismatch: local {encrypt}, remote {}",
            theirs.encrypted
        )));
    }
    if encrypt && theirs.nonce == nonce {
        return Err(NetError::Protocol("peer echoed our nonce".into()));
    }

    debug!(discovery_key = %ours.discovery_key, encrypt, "handshake complete");

    let (send_cipher, recv_cipher) = if encrypt {
        (
            Some(FrameCipher::sending(key, &nonce, &theirs.nonce)),
            Some(FrameCipher::receiving(key, &nonce, &theirs.nonce)),
        )
    } else {
        (None, None)
    };
    Ok((
        MessageReceiver {
            reader,
            cipher: recv_cipher,
        },
        MessageSender {
            writer,
            cipher: send_cipher,
        },
    ))
}
