//! Signing and verification glue binding the raw wire codec
//! ([`toxcore_async_proto::exchange`]) to Ed25519 identity keys (§4.5, C9).

use std::time::SystemTime;

use toxcore_async_crypto::{IdentityKeyPair, PublicKeyPair};
use toxcore_async_proto::exchange::{self, ParsedExchange};

use crate::{
    error::ExchangeCodecError,
    model::{IdentityKey, PeerPreKeyEntry},
};

/// A decoded, signature-verified pre-key exchange packet, with
/// server-assigned (here: receive-time-assigned) sequential ids for the
/// offered keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Identity of the peer who sent this exchange.
    pub sender_pk: IdentityKey,
    /// Sender's ephemeral agreement key (currently advisory; forward
    /// security is carried by the one-time keys below).
    pub sender_ephemeral: [u8; 32],
    /// Offered one-time keys, numbered `0..N-1` in receipt order.
    pub pre_keys: Vec<PeerPreKeyEntry>,
    /// When this packet was received and verified.
    pub received_at: SystemTime,
}

/// Build and sign a pre-key exchange packet offering `one_time_keys` on
/// behalf of `identity`.
///
/// # Errors
///
/// Returns [`ExchangeCodecError::Malformed`] if `one_time_keys` is empty or
/// exceeds the 255-key wire limit.
pub fn create(
    identity: &IdentityKeyPair,
    ephemeral_agreement: &[u8; 32],
    one_time_keys: &[(u32, [u8; 32])],
) -> Result<Vec<u8>, ExchangeCodecError> {
    let keys: Vec<[u8; 32]> = one_time_keys.iter().map(|(_, public)| *public).collect();
    let public = identity.public();
    let unsigned = exchange::encode_unsigned(&public.signing, ephemeral_agreement, &keys)?;
    let signature = identity.sign(&unsigned);
    Ok(exchange::append_signature(unsigned, &signature))
}

/// Parse and verify a pre-key exchange packet.
///
/// `resolve_friend` looks up the sender's real, already-known `IdentityKey`
/// by signing key, gating acceptance on the sender being an established
/// friend (spam defense, P9) before the (cheap) signature check — matching
/// §4.5's ordering. The resolved identity, not the packet's ephemeral
/// agreement key, becomes `Exchange.sender_pk`.
///
/// # Errors
///
/// - [`ExchangeCodecError::Malformed`] if the byte structure is invalid.
/// - [`ExchangeCodecError::UnknownSender`] if `resolve_friend` returns
///   `None`.
/// - [`ExchangeCodecError::InvalidSignature`] if the Ed25519 signature does
///   not verify.
pub fn parse_and_verify(
    bytes: &[u8],
    resolve_friend: impl FnOnce(&[u8; 32]) -> Option<PublicKeyPair>,
) -> Result<Exchange, ExchangeCodecError> {
    let ParsedExchange { sender_identity_signing, sender_ephemeral_agreement, one_time_keys, signed_bytes, signature } =
        exchange::parse(bytes)?;

    // The packet only carries the sender's signing key and an ephemeral
    // agreement key, neither of which is the sender's real, stable
    // `agreement` half. The caller's friend table is the only source of the
    // real `IdentityKey`, so resolve it here rather than assembling a
    // `PublicKeyPair` out of wire bytes that would never match it.
    let sender_pk = resolve_friend(&sender_identity_signing).ok_or(ExchangeCodecError::UnknownSender)?;

    sender_pk.verify(&signed_bytes, &signature)?;

    let pre_keys = one_time_keys
        .into_iter()
        .enumerate()
        .map(|(id, public_key)| PeerPreKeyEntry { id: id as u32, public_key })
        .collect();

    Ok(Exchange {
        sender_pk,
        sender_ephemeral: sender_ephemeral_agreement,
        pre_keys,
        received_at: SystemTime::now(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    fn keys(n: usize) -> Vec<(u32, [u8; 32])> {
        (0..n)
            .map(|i| {
                let mut k = [0u8; 32];
                #[allow(clippy::cast_possible_truncation)]
                {
                    k[0] = i as u8;
                }
                (i as u32, k)
            })
            .collect()
    }

    #[test]
    fn create_then_verify_round_trips() {
        let bob = IdentityKeyPair::generate(&mut OsRng);
        let ephemeral = [3u8; 32];
        let bundle_keys = keys(5);

        let packet = create(&bob, &ephemeral, &bundle_keys).unwrap();
        let exchange = parse_and_verify(&packet, |signing| (*signing == bob.public().signing).then_some(bob.public())).unwrap();

        assert_eq!(exchange.sender_pk, bob.public());
        assert_eq!(exchange.pre_keys.len(), 5);
    }

    #[test]
    fn tampered_byte_fails_signature_check() {
        let bob = IdentityKeyPair::generate(&mut OsRng);
        let mut packet = create(&bob, &[1u8; 32], &keys(3)).unwrap();
        let flip_at = 80.min(packet.len() - 1);
        packet[flip_at] ^= 0xFF;

        let result = parse_and_verify(&packet, |signing| (*signing == bob.public().signing).then_some(bob.public()));
        assert!(matches!(result, Err(ExchangeCodecError::InvalidSignature(_))));
    }

    #[test]
    fn spoofed_sender_pk_fails_signature_check() {
        let bob = IdentityKeyPair::generate(&mut OsRng);
        let attacker = IdentityKeyPair::generate(&mut OsRng);

        // Attacker signs with their own key, then overwrites the sender_pk
        // field to claim to be Bob.
        let mut packet = create(&attacker, &[1u8; 32], &keys(2)).unwrap();
        packet[5..37].copy_from_slice(&bob.public().signing);

        let result = parse_and_verify(&packet, |_| Some(bob.public()));
        assert!(matches!(result, Err(ExchangeCodecError::InvalidSignature(_))));
    }

    #[test]
    fn unfriended_sender_is_rejected_before_signature_check() {
        let bob = IdentityKeyPair::generate(&mut OsRng);
        let packet = create(&bob, &[1u8; 32], &keys(2)).unwrap();

        let result = parse_and_verify(&packet, |_| None);
        assert!(matches!(result, Err(ExchangeCodecError::UnknownSender)));
    }
}
