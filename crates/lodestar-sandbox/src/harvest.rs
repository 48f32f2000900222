//! Constant harvesting from a module's code section.
//!
//! Equality checks against magic numbers compile to `i32.const` /
//! `i64.const` immediates. Feeding those immediates to the value generator
//! turns a 2^64 guess into a dictionary pick.

use std::collections::BTreeSet;

const CODE_SECTION: u8 = 10;
const I32_CONST: u8 = 0x41;
const I64_CONST: u8 = 0x42;

/// Upper bound on harvested constants per module.
pub const MAX_CONSTANTS: usize = 256;

/// Collect the distinct integer constants appearing in function bodies.
///
/// Bodies are walked instruction by instruction. A body using an opcode
/// outside the MVP, sign-extension, reference-type, tail-call and `0xfc`
/// sets stops at that opcode, keeping what was found before it.
pub fn harvest_constants(wasm: &[u8]) -> Vec<i64> {
    let mut found = BTreeSet::new();
    if let Some(code) = find_section(wasm, CODE_SECTION) {
        for body in function_bodies(code) {
            scan_body(body, &mut found);
        }
    }
    found.into_iter().take(MAX_CONSTANTS).collect()
}

fn find_section(wasm: &[u8], id: u8) -> Option<&[u8]> {
    if wasm.len() < 8 || &wasm[0..4] != b"\0asm" {
        return None;
    }
    let mut pos = 8;
    while pos < wasm.len() {
        let section_id = wasm[pos];
        pos += 1;
        let (size, n) = read_u32(&wasm[pos..])?;
        pos += n;
        let end = pos.checked_add(size as usize)?;
        if end > wasm.len() {
            return None;
        }
        if section_id == id {
            return Some(&wasm[pos..end]);
        }
        pos = end;
    }
    None
}

fn function_bodies(code: &[u8]) -> Vec<&[u8]> {
    let mut bodies = Vec::new();
    let Some((count, mut pos)) = read_u32(code) else {
        return bodies;
    };
    for _ in 0..count {
        let Some((size, n)) = read_u32(&code[pos..]) else {
            break;
        };
        pos += n;
        let end = pos + size as usize;
        if end > code.len() {
            break;
        }
        if let Some(instructions) = skip_locals(&code[pos..end]) {
            bodies.push(instructions);
        }
        pos = end;
    }
    bodies
}

/// Skip the local declarations (`count` groups of `(n, valtype)`).
fn skip_locals(body: &[u8]) -> Option<&[u8]> {
    let (groups, mut pos) = read_u32(body)?;
    for _ in 0..groups {
        let (_, n) = read_u32(&body[pos..])?;
        pos += n + 1;
        if pos > body.len() {
            return None;
        }
    }
    Some(&body[pos..])
}

fn scan_body(body: &[u8], found: &mut BTreeSet<i64>) {
    let mut pos = 0;
    while pos < body.len() {
        let opcode = body[pos];
        pos += 1;
        let rest = &body[pos..];
        let consumed = match opcode {
            I32_CONST | I64_CONST => {
                let bits = if opcode == I32_CONST { 32 } else { 64 };
                read_i64(rest, bits).map(|(value, n)| {
                    found.insert(value);
                    n
                })
            }
            _ => immediates_len(opcode, rest),
        };
        let Some(n) = consumed else {
            return;
        };
        pos += n;
    }
}

/// Byte length of the immediates following `opcode`, or `None` for an
/// unknown opcode or truncated input.
fn immediates_len(opcode: u8, rest: &[u8]) -> Option<usize> {
    let n = match opcode {
        // unreachable, nop, else, end, return, drop, select
        0x00 | 0x01 | 0x05 | 0x0b | 0x0f | 0x1a | 0x1b => 0,
        // block, loop, if: a block type is an s33
        0x02..=0x04 => read_i64(rest, 33)?.1,
        // br, br_if, call, return_call, local.*, global.*, table.get/set,
        // memory.size/grow, ref.func
        0x0c | 0x0d | 0x10 | 0x12 | 0x20..=0x26 | 0x3f | 0x40 | 0xd2 => u32s(rest, 1)?,
        0x0e => {
            let (targets, n) = read_u32(rest)?;
            n + u32s(rest.get(n..)?, targets as usize + 1)?
        }
        // call_indirect, return_call_indirect
        0x11 | 0x13 => u32s(rest, 2)?,
        // typed select: a vector of single-byte value types
        0x1c => {
            let (count, n) = read_u32(rest)?;
            n + count as usize
        }
        // loads and stores: align, [memory index,] offset
        0x28..=0x3e => {
            let (align, _) = read_u32(rest)?;
            u32s(rest, if align & 0x40 != 0 { 3 } else { 2 })?
        }
        0x43 => 4,
        0x44 => 8,
        // comparisons, arithmetic, conversions, sign extension, ref.is_null
        0x45..=0xc4 | 0xd1 => 0,
        // ref.null: a heap type
        0xd0 => read_i64(rest, 33)?.1,
        0xfc => {
            let (sub, n) = read_u32(rest)?;
            let operands = match sub {
                0..=7 => 0,
                9 | 11 | 13 | 15..=17 => 1,
                8 | 10 | 12 | 14 => 2,
                _ => return None,
            };
            n + u32s(rest.get(n..)?, operands)?
        }
        _ => return None,
    };
    (n <= rest.len()).then_some(n)
}

/// Total length of `count` consecutive unsigned LEB128 values.
fn u32s(bytes: &[u8], count: usize) -> Option<usize> {
    let mut pos = 0;
    for _ in 0..count {
        pos += read_u32(bytes.get(pos..)?)?.1;
    }
    Some(pos)
}

fn read_u32(bytes: &[u8]) -> Option<(u32, usize)> {
    let mut result: u64 = 0;
    for (i, &byte) in bytes.iter().enumerate().take(5) {
        result |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return u32::try_from(result).ok().map(|v| (v, i + 1));
        }
    }
    None
}

/// Signed LEB128 of at most `bits` bits, sign-extended to `i64`.
fn read_i64(bytes: &[u8], bits: u32) -> Option<(i64, usize)> {
    let max_len = bits.div_ceil(7) as usize;
    let mut result: i64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in bytes.iter().enumerate().take(max_len) {
        if shift < 64 {
            result |= i64::from(byte & 0x7f) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 64 && byte & 0x40 != 0 {
                result |= -1i64 << shift;
            }
            if bits == 32 {
                result = i64::from(result as i32);
            }
            return Some((result, i + 1));
        }
    }
    None
}
