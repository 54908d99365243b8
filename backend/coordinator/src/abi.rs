//! Minimal Solidity ABI codec for the fixed cart / factory / token surface.
//!
//! Only the argument and return shapes the coordinator actually uses are
//! supported: `address`, `uint256` (bounded to `u128`), `bool`, `string`,
//! `string[]` and `address[]`.

use crate::errors::{CartError, Result};
use crate::types::{Address, RawCartInfo};

const WORD: usize = 32;

// Function selectors: first four bytes of keccak256 of the signature.

/// `approve(address,uint256)`
pub const APPROVE: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];
/// `getAllCartAddresses()`
pub const GET_ALL_CART_ADDRESSES: [u8; 4] = [0xad, 0x50, 0xf4, 0x27];
/// `createCart(string,uint256,string[])`
pub const CREATE_CART: [u8; 4] = [0xea, 0x1d, 0xda, 0x06];
/// `getCartInfo()`
pub const GET_CART_INFO: [u8; 4] = [0xe9, 0x9c, 0xbf, 0xa0];
/// `depositMoreFunds(uint256)`
pub const DEPOSIT_MORE_FUNDS: [u8; 4] = [0x85, 0xd3, 0x86, 0x92];
/// `claimDelivery()`
pub const CLAIM_DELIVERY: [u8; 4] = [0xe0, 0x42, 0xcd, 0x0d];
/// `forfeitDelivery()`
pub const FORFEIT_DELIVERY: [u8; 4] = [0x0d, 0x5c, 0x12, 0xfe];
/// `deleteItems(string[])`
pub const DELETE_ITEMS: [u8; 4] = [0xbe, 0xe7, 0x57, 0x70];
/// `closeSuccessDelivery()`
pub const CLOSE_SUCCESS_DELIVERY: [u8; 4] = [0xef, 0x8d, 0x34, 0x96];
/// `withdrawAndDestroy()`
pub const WITHDRAW_AND_DESTROY: [u8; 4] = [0xe2, 0x79, 0x4d, 0x86];

/// A single ABI argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(u128),
    String(String),
    StringArray(Vec<String>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        matches!(self, Token::String(_) | Token::StringArray(_))
    }
}

// ─────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────

/// Build calldata: selector followed by the head/tail encoded arguments.
pub fn encode_call(selector: [u8; 4], args: &[Token]) -> Vec<u8> {
    let mut out = selector.to_vec();
    out.extend(encode_tuple(args));
    out
}

fn encode_tuple(args: &[Token]) -> Vec<u8> {
    let mut head = Vec::with_capacity(args.len() * WORD);
    let mut tail = Vec::new();
    let head_len = args.len() * WORD;

    for arg in args {
        if arg.is_dynamic() {
            head.extend(uint_word((head_len + tail.len()) as u128));
            tail.extend(encode_dynamic(arg));
        } else {
            head.extend(encode_static(arg));
        }
    }
    head.extend(tail);
    head
}

fn encode_static(token: &Token) -> [u8; WORD] {
    match token {
        Token::Address(a) => address_word(a),
        Token::Uint(v) => uint_word(*v),
        Token::String(_) | Token::StringArray(_) => unreachable!("dynamic token in static slot"),
    }
}

fn encode_dynamic(token: &Token) -> Vec<u8> {
    match token {
        Token::String(s) => encode_bytes(s.as_bytes()),
        Token::StringArray(items) => {
            let mut out = uint_word(items.len() as u128).to_vec();
            let elems: Vec<Token> = items.iter().cloned().map(Token::String).collect();
            out.extend(encode_tuple(&elems));
            out
        }
        Token::Address(_) | Token::Uint(_) => encode_static(token).to_vec(),
    }
}

fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = uint_word(bytes.len() as u128).to_vec();
    out.extend_from_slice(bytes);
    let padding = (WORD - bytes.len() % WORD) % WORD;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

fn uint_word(v: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&v.to_be_bytes());
    word
}

fn address_word(a: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(a.as_bytes());
    word
}

// ─────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────

fn malformed(what: &str) -> CartError {
    CartError::ReadUnavailable(format!("malformed ABI data: {what}"))
}

fn word_at(data: &[u8], offset: usize) -> Result<&[u8]> {
    offset
        .checked_add(WORD)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| malformed("truncated word"))
}

fn read_uint(data: &[u8], offset: usize) -> Result<u128> {
    let word = word_at(data, offset)?;
    if word[..16].iter().any(|b| *b != 0) {
        return Err(malformed("uint256 exceeds u128"));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(buf))
}

fn read_usize(data: &[u8], offset: usize) -> Result<usize> {
    usize::try_from(read_uint(data, offset)?).map_err(|_| malformed("offset out of range"))
}

fn read_bool(data: &[u8], offset: usize) -> Result<bool> {
    match read_uint(data, offset)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(malformed("bool is neither 0 nor 1")),
    }
}

fn read_address(data: &[u8], offset: usize) -> Result<Address> {
    let word = word_at(data, offset)?;
    if word[..12].iter().any(|b| *b != 0) {
        return Err(malformed("dirty address padding"));
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..]);
    Ok(Address::from_bytes(bytes))
}

/// `base + rel`, refusing offsets that do not fit in the address space.
fn offset_from(base: usize, rel: usize) -> Result<usize> {
    base.checked_add(rel)
        .ok_or_else(|| malformed("offset out of range"))
}

/// Byte offset of the `index`-th word after `base`.
fn nth_word(base: usize, index: usize) -> Result<usize> {
    index
        .checked_mul(WORD)
        .ok_or_else(|| malformed("offset out of range"))
        .and_then(|rel| offset_from(base, rel))
}

fn read_string(data: &[u8], offset: usize) -> Result<String> {
    let len = read_usize(data, offset)?;
    let start = offset_from(offset, WORD)?;
    let bytes = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| malformed("truncated string"))?;
    String::from_utf8(bytes.to_vec()).map_err(|_| malformed("string is not UTF-8"))
}

fn read_string_array(data: &[u8], offset: usize) -> Result<Vec<String>> {
    let len = read_usize(data, offset)?;
    let base = offset_from(offset, WORD)?;
    (0..len)
        .map(|i| {
            let rel = read_usize(data, nth_word(base, i)?)?;
            read_string(data, offset_from(base, rel)?)
        })
        .collect()
}

/// Decode the return data of `getCartInfo()`:
/// `(string name, string[] items, bool isCompleted, uint256 funds,
/// address fulfiller, address owner)`.
pub fn decode_cart_info(data: &[u8]) -> Result<RawCartInfo> {
    let name_offset = read_usize(data, 0)?;
    let items_offset = read_usize(data, WORD)?;
    Ok(RawCartInfo {
        name: read_string(data, name_offset)?,
        items: read_string_array(data, items_offset)?,
        is_completed: read_bool(data, 2 * WORD)?,
        funds: read_uint(data, 3 * WORD)?,
        fulfiller: read_address(data, 4 * WORD)?,
        owner: read_address(data, 5 * WORD)?,
    })
}

/// Decode a single `address[]` return value.
pub fn decode_address_array(data: &[u8]) -> Result<Vec<Address>> {
    let offset = read_usize(data, 0)?;
    let len = read_usize(data, offset)?;
    let base = offset_from(offset, WORD)?;
    (0..len)
        .map(|i| read_address(data, nth_word(base, i)?))
        .collect()
}

/// Decode a 32-byte log data word as an address (indexed topics) or amount.
pub(crate) fn address_from_topic(topic: &[u8]) -> Result<Address> {
    read_address(topic, 0)
}

pub(crate) fn uint_from_word(data: &[u8], index: usize) -> Result<u128> {
    read_uint(data, index * WORD)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
