//! Minimal Stellar primitives
//!
//! Just enough of the wire format for the anchor and Horizon clients:
//! strkey encoding, ed25519 keypairs, an XDR writer/reader, transaction
//! hashing, SEP-10 challenge co-signing and a single-payment transaction.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use crc::{CRC_16_XMODEM, Crc};
use ed25519_dalek::{Signer, SigningKey};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sha2::{Digest, Sha256};

use super::error::AdapterError;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

const VERSION_ACCOUNT_ID: u8 = 6 << 3; // 'G'
const VERSION_SEED: u8 = 18 << 3; // 'S'

const ENVELOPE_TYPE_TX: u32 = 2;
const KEY_TYPE_ED25519: u32 = 0;
const KEY_TYPE_MUXED_ED25519: u32 = 0x100;
const PRECOND_NONE: u32 = 0;
const PRECOND_TIME: u32 = 1;
const MEMO_NONE: u32 = 0;
const MEMO_TEXT: u32 = 1;
const MEMO_ID: u32 = 2;
const MEMO_HASH: u32 = 3;
const MEMO_RETURN: u32 = 4;
const OP_PAYMENT: u32 = 1;
const OP_MANAGE_DATA: u32 = 10;
const ASSET_TYPE_CREDIT_ALPHANUM4: u32 = 1;

/// Stroops per unit (7 decimal places)
const STROOPS_PER_UNIT: i64 = 10_000_000;

// ============================================================================
// Strkey
// ============================================================================

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = ((buffer << 8) | byte as u32) & 0xFFFF;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1F) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1F) as usize] as char);
    }
    out
}

fn base32_decode(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for c in input.bytes() {
        let value = BASE32_ALPHABET.iter().position(|&a| a == c)? as u32;
        buffer = ((buffer << 5) | value) & 0xFFFF;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xFF) as u8);
        }
    }
    // leftover bits are padding and must be zero
    if bits >= 5 || (buffer & ((1 << bits) - 1)) != 0 {
        return None;
    }
    Some(out)
}

fn strkey_encode(version: u8, payload: &[u8; 32]) -> String {
    let mut data = Vec::with_capacity(35);
    data.push(version);
    data.extend_from_slice(payload);
    let checksum = CRC16.checksum(&data);
    data.extend_from_slice(&checksum.to_le_bytes());
    base32_encode(&data)
}

fn strkey_decode(version: u8, key: &str) -> Result<[u8; 32], AdapterError> {
    let invalid = || AdapterError::Config(format!("invalid strkey: {}", redact(key)));
    let data = base32_decode(key).ok_or_else(invalid)?;
    if data.len() != 35 || data[0] != version {
        return Err(invalid());
    }
    let checksum = u16::from_le_bytes([data[33], data[34]]);
    if CRC16.checksum(&data[..33]) != checksum {
        return Err(invalid());
    }
    let mut payload = [0u8; 32];
    payload.copy_from_slice(&data[1..33]);
    Ok(payload)
}

fn redact(key: &str) -> String {
    key.chars().take(4).chain("…".chars()).collect()
}

/// Encode raw ed25519 public key bytes as a `G...` account ID
pub fn encode_account_id(public_key: &[u8; 32]) -> String {
    strkey_encode(VERSION_ACCOUNT_ID, public_key)
}

/// Decode a `G...` account ID into raw public key bytes
pub fn decode_account_id(account: &str) -> Result<[u8; 32], AdapterError> {
    strkey_decode(VERSION_ACCOUNT_ID, account)
}

// ============================================================================
// Keypair
// ============================================================================

/// Ed25519 signing key for a Stellar account
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Parse an `S...` secret seed
    pub fn from_secret(secret: &str) -> Result<Self, AdapterError> {
        let seed = strkey_decode(VERSION_SEED, secret.trim())?;
        Ok(Self::from_seed(&seed))
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn account_id(&self) -> String {
        encode_account_id(&self.public_key())
    }

    pub fn secret_seed(&self) -> String {
        strkey_encode(VERSION_SEED, &self.signing.to_bytes())
    }

    /// XDR `DecoratedSignature` over a transaction hash
    fn decorated_signature(&self, hash: &[u8; 32]) -> Vec<u8> {
        let public = self.public_key();
        let signature = self.signing.sign(hash).to_bytes();
        let mut w = XdrWriter::new();
        w.put_fixed(&public[28..]);
        w.put_var_opaque(&signature);
        w.into_bytes()
    }
}

// ============================================================================
// XDR
// ============================================================================

#[derive(Default)]
struct XdrWriter {
    buf: Vec<u8>,
}

impl XdrWriter {
    fn new() -> Self {
        Self::default()
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_fixed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn put_var_opaque(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
        let pad = (4 - bytes.len() % 4) % 4;
        self.buf.extend(std::iter::repeat_n(0u8, pad));
    }

    fn put_account(&mut self, public_key: &[u8; 32]) {
        self.put_u32(KEY_TYPE_ED25519);
        self.put_fixed(public_key);
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

struct XdrReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> XdrReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], AdapterError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| AdapterError::Decode("truncated XDR".to_string()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, AdapterError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn skip(&mut self, n: usize) -> Result<(), AdapterError> {
        self.take(n).map(|_| ())
    }

    fn skip_var_opaque(&mut self) -> Result<(), AdapterError> {
        let len = self.u32()? as usize;
        self.skip(len + (4 - len % 4) % 4)
    }

    fn skip_muxed_account(&mut self) -> Result<(), AdapterError> {
        match self.u32()? {
            KEY_TYPE_ED25519 => self.skip(32),
            KEY_TYPE_MUXED_ED25519 => self.skip(8 + 32),
            other => Err(AdapterError::Decode(format!("unsupported account type {other}"))),
        }
    }
}

/// Walk a v1 `Transaction` and return its encoded length.
/// Only the shapes a SEP-10 challenge uses are accepted.
fn transaction_len(data: &[u8]) -> Result<usize, AdapterError> {
    let mut r = XdrReader::new(data);
    r.skip_muxed_account()?;
    r.skip(4 + 8)?; // fee, seqNum
    match r.u32()? {
        PRECOND_NONE => {}
        PRECOND_TIME => r.skip(16)?,
        other => return Err(AdapterError::Decode(format!("unsupported preconditions {other}"))),
    }
    match r.u32()? {
        MEMO_NONE => {}
        MEMO_TEXT => r.skip_var_opaque()?,
        MEMO_ID => r.skip(8)?,
        MEMO_HASH | MEMO_RETURN => r.skip(32)?,
        other => return Err(AdapterError::Decode(format!("unknown memo type {other}"))),
    }
    let op_count = r.u32()?;
    for _ in 0..op_count {
        if r.u32()? == 1 {
            r.skip_muxed_account()?;
        }
        match r.u32()? {
            OP_MANAGE_DATA => {
                r.skip_var_opaque()?; // data name
                if r.u32()? == 1 {
                    r.skip_var_opaque()?; // data value
                }
            }
            other => {
                return Err(AdapterError::Decode(format!(
                    "unexpected operation {other} in challenge"
                )));
            }
        }
    }
    if r.u32()? != 0 {
        return Err(AdapterError::Decode("unsupported transaction ext".to_string()));
    }
    Ok(r.pos)
}

/// `sha256(sha256(passphrase) || ENVELOPE_TYPE_TX || tx)`
pub fn transaction_hash(network_passphrase: &str, tx: &[u8]) -> [u8; 32] {
    let network_id = Sha256::digest(network_passphrase.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(network_id);
    hasher.update(ENVELOPE_TYPE_TX.to_be_bytes());
    hasher.update(tx);
    hasher.finalize().into()
}

/// Add our signature to a base64 SEP-10 challenge envelope
pub fn sign_challenge(
    envelope_b64: &str,
    network_passphrase: &str,
    keypair: &Keypair,
) -> Result<String, AdapterError> {
    let envelope = BASE64
        .decode(envelope_b64.trim())
        .map_err(|e| AdapterError::Decode(format!("challenge is not base64: {e}")))?;

    let mut r = XdrReader::new(&envelope);
    if r.u32()? != ENVELOPE_TYPE_TX {
        return Err(AdapterError::Decode("challenge is not a v1 envelope".to_string()));
    }
    let tx_len = transaction_len(&envelope[4..])?;
    let tx = &envelope[4..4 + tx_len];

    let mut sigs = XdrReader::new(&envelope[4 + tx_len..]);
    let count = sigs.u32()?;
    let existing_start = 4 + tx_len + 4;
    for _ in 0..count {
        sigs.skip(4)?;
        sigs.skip_var_opaque()?;
    }
    let existing = &envelope[existing_start..4 + tx_len + sigs.pos];

    let hash = transaction_hash(network_passphrase, tx);
    let mut w = XdrWriter::new();
    w.put_u32(ENVELOPE_TYPE_TX);
    w.put_fixed(tx);
    w.put_u32(count + 1);
    w.put_fixed(existing);
    w.put_fixed(&keypair.decorated_signature(&hash));
    Ok(BASE64.encode(w.into_bytes()))
}

/// Memo attached to a settlement payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Memo {
    None,
    Id(u64),
    Text(String),
}

impl Memo {
    /// Numeric memos become MEMO_ID, anything else MEMO_TEXT (max 28 bytes)
    pub fn parse(memo: &str) -> Result<Self, AdapterError> {
        let memo = memo.trim();
        if memo.is_empty() {
            return Ok(Memo::None);
        }
        if let Ok(id) = memo.parse::<u64>() {
            return Ok(Memo::Id(id));
        }
        if memo.len() > 28 {
            return Err(AdapterError::Rejected(format!("memo too long: {memo}")));
        }
        Ok(Memo::Text(memo.to_string()))
    }
}

/// Convert a decimal amount to stroops, rejecting sub-stroop precision
pub fn to_stroops(amount: Decimal) -> Result<i64, AdapterError> {
    let scaled = amount * Decimal::from(STROOPS_PER_UNIT);
    if scaled.fract() != Decimal::ZERO || scaled <= Decimal::ZERO {
        return Err(AdapterError::Rejected(format!("invalid payment amount {amount}")));
    }
    scaled
        .to_i64()
        .ok_or_else(|| AdapterError::Rejected(format!("payment amount overflows: {amount}")))
}

/// Parameters for a single credit-asset payment
pub struct PaymentParams<'a> {
    pub source: &'a Keypair,
    pub sequence: i64,
    pub fee: u32,
    pub max_time: u64,
    pub destination: [u8; 32],
    pub asset_code: &'a str,
    pub asset_issuer: [u8; 32],
    pub amount_stroops: i64,
    pub memo: Memo,
}

/// Build and sign a one-operation payment envelope, base64 encoded
pub fn build_payment_envelope(
    params: &PaymentParams<'_>,
    network_passphrase: &str,
) -> Result<String, AdapterError> {
    let code = params.asset_code.as_bytes();
    if code.is_empty() || code.len() > 4 {
        return Err(AdapterError::Config(format!(
            "asset code must be 1-4 chars: {}",
            params.asset_code
        )));
    }
    let mut asset_code = [0u8; 4];
    asset_code[..code.len()].copy_from_slice(code);

    let mut tx = XdrWriter::new();
    tx.put_account(&params.source.public_key());
    tx.put_u32(params.fee);
    tx.put_i64(params.sequence);
    tx.put_u32(PRECOND_TIME);
    tx.put_u64(0);
    tx.put_u64(params.max_time);
    match &params.memo {
        Memo::None => tx.put_u32(MEMO_NONE),
        Memo::Id(id) => {
            tx.put_u32(MEMO_ID);
            tx.put_u64(*id);
        }
        Memo::Text(text) => {
            tx.put_u32(MEMO_TEXT);
            tx.put_var_opaque(text.as_bytes());
        }
    }
    tx.put_u32(1); // operations
    tx.put_u32(0); // no op source account
    tx.put_u32(OP_PAYMENT);
    tx.put_account(&params.destination);
    tx.put_u32(ASSET_TYPE_CREDIT_ALPHANUM4);
    tx.put_fixed(&asset_code);
    tx.put_account(&params.asset_issuer);
    tx.put_i64(params.amount_stroops);
    tx.put_u32(0); // ext
    let tx = tx.into_bytes();

    let hash = transaction_hash(network_passphrase, &tx);
    let mut envelope = XdrWriter::new();
    envelope.put_u32(ENVELOPE_TYPE_TX);
    envelope.put_fixed(&tx);
    envelope.put_u32(1);
    envelope.put_fixed(&params.source.decorated_signature(&hash));
    Ok(BASE64.encode(envelope.into_bytes()))
}
