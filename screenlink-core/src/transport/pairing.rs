//! Optional PIN pairing, run on the raw socket before the handshake.
//!
//! ```text
//! server → viewer   "PIN?"            4 bytes
//! viewer → server   4 ASCII digits    4 bytes
//! ```
//!
//! A wrong or missing PIN closes that socket only.

use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::LinkError;

pub const PIN_PROMPT: &[u8; 4] = b"PIN?";
pub const PIN_LEN: usize = 4;

/// Random 4-digit PIN, zero-padded.
pub fn generate_pin() -> String {
    let n: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("{n:04}")
}

pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == PIN_LEN && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Server side: prompt and verify.
pub async fn challenge<S>(stream: &mut S, expected: &str) -> Result<(), LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(PIN_PROMPT).await?;
    stream.flush().await?;

    let mut answer = [0u8; PIN_LEN];
    stream.read_exact(&mut answer).await?;

    // Compare every byte regardless of where the first mismatch is.
    let mismatch = answer
        .iter()
        .zip(expected.as_bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    if mismatch != 0 || expected.len() != PIN_LEN {
        warn!("viewer presented a wrong PIN");
        return Err(LinkError::PairingRejected);
    }
    debug!("pairing accepted");
    Ok(())
}

/// Viewer side: wait for the prompt and answer it.
pub async fn respond<S>(stream: &mut S, pin: &str) -> Result<(), LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !is_valid_pin(pin) {
        return Err(LinkError::InvalidParameters("PIN must be 4 ASCII digits".into()));
    }
    let mut prompt = [0u8; PIN_PROMPT.len()];
    stream.read_exact(&mut prompt).await?;
    if &prompt != PIN_PROMPT {
        return Err(LinkError::Other("server did not ask for a PIN".into()));
    }
    stream.write_all(pin.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_pins_are_valid() {
        for _ in 0..100 {
            assert!(is_valid_pin(&generate_pin()));
        }
        assert!(!is_valid_pin("123"));
        assert!(!is_valid_pin("12345"));
        assert!(!is_valid_pin("12a4"));
    }

    #[tokio::test]
    async fn matching_pin_is_accepted() {
        let (mut server, mut viewer) = tokio::io::duplex(64);
        let (a, b) = tokio::join!(challenge(&mut server, "0420"), respond(&mut viewer, "0420"));
        a.unwrap();
        b.unwrap();
    }

    #[tokio::test]
    async fn wrong_pin_is_rejected() {
        let (mut server, mut viewer) = tokio::io::duplex(64);
        let (a, b) = tokio::join!(challenge(&mut server, "0420"), respond(&mut viewer, "9999"));
        assert!(matches!(a, Err(LinkError::PairingRejected)));
        b.unwrap();
    }

    #[tokio::test]
    async fn viewer_hanging_up_is_an_io_error() {
        let (mut server, viewer) = tokio::io::duplex(64);
        drop(viewer);
        assert!(matches!(
            challenge(&mut server, "0420").await,
            Err(LinkError::Connection(_))
        ));
    }
}
