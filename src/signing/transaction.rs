// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Legacy transactions with EIP-155 replay protection.
//!
//! The signing preimage is the RLP list
//! `(nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0)`; the
//! signed encoding replaces the trailing three items with `(v, r, s)`
//! where `v = chainId * 2 + 35 + recovery_id`. Only the fixed nine-item
//! list form is needed here, so the RLP writer is a small local codec;
//! transaction construction and broadcast belong to external
//! collaborators.

use super::{framing, framing::Address, RecoverableSignature};
use serde::{Deserialize, Serialize};

/// An unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Account nonce.
    pub nonce: u64,
    /// Gas price in wei.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Recipient; `None` deploys a contract.
    pub to: Option<Address>,
    /// Transferred value in wei.
    pub value: u128,
    /// Call data.
    pub data: Vec<u8>,
    /// EIP-155 chain id.
    pub chain_id: u64,
}

impl Transaction {
    /// The Keccak-256 digest of the EIP-155 signing preimage.
    pub fn signing_digest(&self) -> [u8; 32] {
        framing::keccak256(&self.signing_rlp())
    }

    /// The RLP signing preimage:
    /// `(nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0)`.
    pub(crate) fn signing_rlp(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        self.encode_common_fields(&mut payload);
        rlp::encode_uint(&mut payload, u128::from(self.chain_id));
        rlp::encode_uint(&mut payload, 0);
        rlp::encode_uint(&mut payload, 0);
        rlp::wrap_list(payload)
    }

    /// The raw signed transaction, ready for broadcast by the caller.
    pub fn raw_signed(&self, signature: &RecoverableSignature) -> Vec<u8> {
        let mut payload = Vec::new();
        self.encode_common_fields(&mut payload);
        rlp::encode_uint(&mut payload, u128::from(signature.v_eip155(self.chain_id)));
        rlp::encode_scalar_bytes(&mut payload, &signature.r().to_bytes());
        rlp::encode_scalar_bytes(&mut payload, &signature.s().to_bytes());
        rlp::wrap_list(payload)
    }

    fn encode_common_fields(&self, payload: &mut Vec<u8>) {
        rlp::encode_uint(payload, u128::from(self.nonce));
        rlp::encode_uint(payload, self.gas_price);
        rlp::encode_uint(payload, u128::from(self.gas_limit));
        match &self.to {
            Some(address) => rlp::encode_bytes(payload, address.as_bytes()),
            None => rlp::encode_bytes(payload, &[]),
        }
        rlp::encode_uint(payload, self.value);
        rlp::encode_bytes(payload, &self.data);
    }
}

mod rlp {
    //! A minimal RLP writer covering exactly what the transaction
    //! encoding needs: byte strings, unsigned integers, and one level of
    //! list framing.

    const STRING_OFFSET: u8 = 0x80;
    const LIST_OFFSET: u8 = 0xc0;
    const SHORT_LIMIT: usize = 55;

    /// Append the RLP encoding of a byte string.
    pub(super) fn encode_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
        if bytes.len() == 1 && bytes[0] < STRING_OFFSET {
            out.push(bytes[0]);
            return;
        }
        encode_length(out, bytes.len(), STRING_OFFSET);
        out.extend_from_slice(bytes);
    }

    /// Append the RLP encoding of an unsigned integer: its minimal
    /// big-endian byte form, with zero encoding as the empty string.
    pub(super) fn encode_uint(out: &mut Vec<u8>, value: u128) {
        let bytes = value.to_be_bytes();
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        encode_bytes(out, &bytes[start..]);
    }

    /// Append a fixed-width big-endian value as an RLP integer, i.e.
    /// with leading zero bytes stripped first.
    pub(super) fn encode_scalar_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        encode_bytes(out, &bytes[start..]);
    }

    /// Frame an already-encoded payload as an RLP list.
    pub(super) fn wrap_list(payload: Vec<u8>) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 9);
        encode_length(&mut out, payload.len(), LIST_OFFSET);
        out.extend_from_slice(&payload);
        out
    }

    fn encode_length(out: &mut Vec<u8>, length: usize, offset: u8) {
        if length <= SHORT_LIMIT {
            out.push(offset + length as u8);
            return;
        }
        let length_bytes = length.to_be_bytes();
        let start = length_bytes
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(length_bytes.len());
        out.push(offset + SHORT_LIMIT as u8 + (length_bytes.len() - start) as u8);
        out.extend_from_slice(&length_bytes[start..]);
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn encoded_bytes(bytes: &[u8]) -> Vec<u8> {
            let mut out = Vec::new();
            encode_bytes(&mut out, bytes);
            out
        }

        fn encoded_uint(value: u128) -> Vec<u8> {
            let mut out = Vec::new();
            encode_uint(&mut out, value);
            out
        }

        #[test]
        fn reference_vectors() {
            // The canonical examples from the RLP definition.
            assert_eq!(encoded_bytes(b"dog"), hex::decode("83646f67").unwrap());
            assert_eq!(encoded_bytes(b""), vec![0x80]);
            assert_eq!(encoded_bytes(&[0x0f]), vec![0x0f]);
            assert_eq!(encoded_uint(0), vec![0x80]);
            assert_eq!(encoded_uint(15), vec![0x0f]);
            assert_eq!(encoded_uint(1024), hex::decode("820400").unwrap());

            let mut payload = Vec::new();
            encode_bytes(&mut payload, b"cat");
            encode_bytes(&mut payload, b"dog");
            assert_eq!(
                wrap_list(payload),
                hex::decode("c88363617483646f67").unwrap()
            );
        }

        #[test]
        fn long_string_framing() {
            let long = vec![0x61u8; 56];
            let encoded = encoded_bytes(&long);
            assert_eq!(encoded[0], 0xb8);
            assert_eq!(encoded[1], 56);
            assert_eq!(&encoded[2..], &long[..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{field::Scalar, signing};

    /// The worked example from the EIP-155 specification.
    fn eip155_example() -> Transaction {
        Transaction {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: Some(
                Address::from_hex("0x3535353535353535353535353535353535353535").unwrap(),
            ),
            value: 1_000_000_000_000_000_000,
            data: vec![],
            chain_id: 1,
        }
    }

    #[test]
    fn eip155_signing_digest_matches_reference() {
        assert_eq!(
            hex::encode(eip155_example().signing_digest()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn eip155_signature_matches_reference() {
        let secret = Scalar::from_hex(
            "4646464646464646464646464646464646464646464646464646464646464646",
        )
        .unwrap();
        let transaction = eip155_example();
        let signature = signing::sign_digest(&transaction.signing_digest(), &secret).unwrap();

        assert_eq!(signature.v_eip155(transaction.chain_id), 37);
        assert_eq!(
            signature.r().to_hex(),
            "28ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276"
        );
        assert_eq!(
            signature.s().to_hex(),
            "67cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );

        let expected = concat!(
            "f86c098504a817c800825208943535353535353535353535353535353535353535",
            "880de0b6b3a76400008025",
            "a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276",
            "a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83",
        );
        assert_eq!(hex::encode(transaction.raw_signed(&signature)), expected);
    }

    #[test]
    fn contract_creation_encodes_empty_recipient() {
        let mut transaction = eip155_example();
        transaction.to = None;
        let rlp = transaction.signing_rlp();
        // The digest changes and the encoding still parses as one list.
        assert_ne!(
            transaction.signing_digest(),
            eip155_example().signing_digest()
        );
        assert!(rlp[0] >= 0xc0);
    }

    #[test]
    fn chain_id_is_bound_into_the_digest() {
        let mut transaction = eip155_example();
        transaction.chain_id = 137;
        assert_ne!(
            transaction.signing_digest(),
            eip155_example().signing_digest()
        );
    }
}
