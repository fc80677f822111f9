//! VeChain (Thor) transaction encoding and signing.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ethereum_types::{H160, H256, U256};
use rlp::RlpStream;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use super::abi::keccak256;

type Blake2b256 = Blake2b<U32>;

const TX_GAS: u64 = 5_000;
const CLAUSE_GAS: u64 = 16_000;
const CLAUSE_GAS_CONTRACT_CREATION: u64 = 48_000;
const ZERO_BYTE_GAS: u64 = 4;
const NON_ZERO_BYTE_GAS: u64 = 68;

/// Extra gas the node charges for entering the VM.
pub const VM_INVOCATION_GAS: u64 = 15_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub to: Option<H160>,
    pub value: U256,
    pub data: Vec<u8>,
}

impl Clause {
    pub fn call(to: H160, data: Vec<u8>) -> Self {
        Self {
            to: Some(to),
            value: U256::zero(),
            data,
        }
    }

    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        match &self.to {
            Some(to) => s.append(&to.as_bytes().to_vec()),
            None => s.append_empty_data(),
        };
        s.append(&trimmed_be(&self.value));
        s.append(&self.data);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionBody {
    pub chain_tag: u8,
    pub block_ref: u64,
    pub expiration: u32,
    pub clauses: Vec<Clause>,
    pub gas_price_coef: u8,
    pub gas: u64,
    pub depends_on: Option<H256>,
    pub nonce: u64,
}

impl TransactionBody {
    fn rlp_append_fields(&self, s: &mut RlpStream) {
        s.append(&self.chain_tag);
        s.append(&self.block_ref);
        s.append(&self.expiration);
        s.begin_list(self.clauses.len());
        for clause in &self.clauses {
            clause.rlp_append(s);
        }
        s.append(&self.gas_price_coef);
        s.append(&self.gas);
        match &self.depends_on {
            Some(id) => s.append(&id.as_bytes().to_vec()),
            None => s.append_empty_data(),
        };
        s.append(&self.nonce);
        // reserved
        s.begin_list(0);
    }

    pub fn encode_unsigned(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(9);
        self.rlp_append_fields(&mut s);
        s.out().to_vec()
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        blake2b256(&self.encode_unsigned())
    }

    pub fn sign(self, key: &SecretKey) -> SignedTransaction {
        let secp = Secp256k1::signing_only();
        let msg = Message::from_digest(self.signing_hash());
        let (recovery_id, compact) = secp.sign_ecdsa_recoverable(&msg, key).serialize_compact();

        let mut signature = [0u8; 65];
        signature[..64].copy_from_slice(&compact);
        signature[64] = recovery_id.to_i32() as u8;
        SignedTransaction {
            body: self,
            signature,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub body: TransactionBody,
    pub signature: [u8; 65],
}

impl SignedTransaction {
    pub fn encode(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(10);
        self.body.rlp_append_fields(&mut s);
        s.append(&self.signature.to_vec());
        s.out().to_vec()
    }
}

pub fn blake2b256(data: &[u8]) -> [u8; 32] {
    Blake2b256::digest(data).into()
}

/// Gas charged before any VM execution.
pub fn intrinsic_gas(clauses: &[Clause]) -> u64 {
    if clauses.is_empty() {
        return TX_GAS + CLAUSE_GAS;
    }
    clauses.iter().fold(TX_GAS, |total, clause| {
        let base = if clause.to.is_some() {
            CLAUSE_GAS
        } else {
            CLAUSE_GAS_CONTRACT_CREATION
        };
        let data: u64 = clause
            .data
            .iter()
            .map(|b| if *b == 0 { ZERO_BYTE_GAS } else { NON_ZERO_BYTE_GAS })
            .sum();
        total + base + data
    })
}

pub fn signer_address(key: &SecretKey) -> H160 {
    let secp = Secp256k1::signing_only();
    let public = PublicKey::from_secret_key(&secp, key).serialize_uncompressed();
    let hash = keccak256(&public[1..]);
    H160::from_slice(&hash[12..])
}

fn trimmed_be(value: &U256) -> Vec<u8> {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    let first = word.iter().position(|b| *b != 0).unwrap_or(word.len());
    word[first..].to_vec()
}
