// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Linear scan over method code, yielding member-access sites
//!
//! Plain instructions (below [`MEMBER_OPCODE_BASE`]) carry no operands and
//! are skipped. A truncated operand or an unknown opcode at or above the
//! member base stops the scan with an error; the prelinker treats that as a
//! per-method fault and moves on.

use super::opcode::{AccessOpcode, MEMBER_OPCODE_BASE};
use dotlink_common::PoolIndex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodeError {
    #[error("unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("truncated operand for {mnemonic} at offset {offset}")]
    TruncatedOperand { mnemonic: &'static str, offset: usize },
}

/// One member-access instruction found in method code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessSite {
    pub opcode: AccessOpcode,
    pub pool_index: PoolIndex,
    /// Byte offset of the instruction within the method.
    pub offset: usize,
}

/// Iterator over the member-access sites of one method's code.
pub struct CodeScanner<'c> {
    code: &'c [u8],
    offset: usize,
    failed: bool,
}

impl<'c> CodeScanner<'c> {
    pub fn new(code: &'c [u8]) -> Self {
        CodeScanner { code, offset: 0, failed: false }
    }
}

impl<'c> Iterator for CodeScanner<'c> {
    type Item = Result<AccessSite, CodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while self.offset < self.code.len() {
            let offset = self.offset;
            let raw = self.code[offset];
            if raw < MEMBER_OPCODE_BASE {
                self.offset += 1;
                continue;
            }
            let Some(opcode) = AccessOpcode::from_u8(raw) else {
                self.failed = true;
                return Some(Err(CodeError::UnknownOpcode { opcode: raw, offset }));
            };
            if offset + 3 > self.code.len() {
                self.failed = true;
                return Some(Err(CodeError::TruncatedOperand {
                    mnemonic: opcode.to_mnemonic(),
                    offset,
                }));
            }
            let index = u16::from_le_bytes([self.code[offset + 1], self.code[offset + 2]]);
            self.offset = offset + 3;
            return Some(Ok(AccessSite {
                opcode,
                pool_index: PoolIndex::new(index),
                offset,
            }));
        }
        None
    }
}

/// Append one instruction to a code buffer; test and builder helper.
pub fn emit(code: &mut Vec<u8>, opcode: AccessOpcode, index: PoolIndex) {
    code.push(opcode.as_u8());
    code.extend_from_slice(&index.as_u16().to_le_bytes());
}
