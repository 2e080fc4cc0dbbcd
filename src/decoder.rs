//! Best-effort recovery of `(name, symbol)` from deployment calldata.
//!
//! Token constructors of the shape `(string name, string symbol, uint256
//! supply)` encode two dynamic heads with offsets `0x60` and `0xa0`. The
//! creation bytecode is followed by those arguments, so the last occurrence
//! of the two-offset header marks where the arguments begin.

use alloy::primitives::{U256, hex};
use alloy::sol_types::SolValue;

const HEAD_WORD_0X60: &str = "0000000000000000000000000000000000000000000000000000000000000060";
const HEAD_WORD_0XA0: &str = "00000000000000000000000000000000000000000000000000000000000000a0";

const MAX_NAME_CHARS: usize = 100;
const MAX_SYMBOL_CHARS: usize = 20;

/// Name and symbol read from constructor arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTokenArgs {
    pub name: String,
    pub symbol: String,
    pub initial_supply: U256,
}

fn normalized_hex(input: &str) -> String {
    let trimmed = input.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}

/// Byte-aligned offset of the last constructor-args header in `hex_input`.
fn last_marker_offset(hex_input: &str) -> Option<usize> {
    let marker = format!("{HEAD_WORD_0X60}{HEAD_WORD_0XA0}");
    hex_input
        .match_indices(&marker)
        .map(|(idx, _)| idx)
        .filter(|idx| idx % 2 == 0)
        .last()
}

/// Raw constructor-argument hex (no `0x`) following the creation bytecode.
pub fn constructor_args_hex(input: &str) -> Option<String> {
    let hex_input = normalized_hex(input);
    let offset = last_marker_offset(&hex_input)?;
    let args = &hex_input[offset..];
    // Drop a dangling nibble rather than failing the whole slice.
    let even_len = args.len() - args.len() % 2;
    Some(args[..even_len].to_string())
}

/// Decode `(string, string, uint256)` constructor arguments from deploy input.
///
/// Returns `None` on any failure: no header, bad hex, undecodable ABI, or
/// values outside the accepted shape.
pub fn decode_token_constructor(input: &str) -> Option<DecodedTokenArgs> {
    let args = constructor_args_hex(input)?;
    let bytes = hex::decode(&args).ok()?;
    let (name, symbol, initial_supply) =
        <(String, String, U256)>::abi_decode_params(&bytes, false).ok()?;

    let name = name.trim().to_string();
    let symbol = symbol.trim().to_string();
    if name.is_empty()
        || symbol.is_empty()
        || name.chars().count() >= MAX_NAME_CHARS
        || symbol.chars().count() >= MAX_SYMBOL_CHARS
    {
        return None;
    }

    Some(DecodedTokenArgs {
        name,
        symbol,
        initial_supply,
    })
}
